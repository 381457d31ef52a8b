//! # tether-core
//!
//! The client-side data layer for Tether - THE LOGIC.
//!
//! This crate keeps a canonical, de-duplicated set of entity records and
//! the relationships between them, and converts between that model and
//! remote JSON payloads.
//!
//! ## Components
//!
//! - `identity`: one live handle per `(type, id)`
//! - `schema`: attribute and relationship definitions, inverse pairing
//! - `relationships`: canonical/current state with inverse synchronization
//! - `serializer`: payload normalization, request serialization, error extraction
//! - `store`: record lifecycle, push, coalesced fetches
//! - `record`: the per-entity façade
//!
//! ## Architectural Constraints
//!
//! The CORE:
//! - Performs no I/O: transport is an injected `Adapter`
//! - Is single-threaded: state lives in `Rc<RefCell<_>>` and is never
//!   borrowed across an await
//! - Is deterministic: ordered indices, insertion-ordered membership
//! - Is closed: definitions, serializers and transforms are injected at
//!   construction, never discovered

// =============================================================================
// MODULES
// =============================================================================

pub mod identity;
pub mod primitives;
pub mod record;
pub mod record_array;
pub mod relationships;
pub mod schema;
pub mod serializer;
pub mod snapshot;
pub mod store;
pub mod transform;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{LoadState, RecordHandle, RequestKind, TetherError};

// =============================================================================
// RE-EXPORTS: Data Layer
// =============================================================================

pub use identity::{Identity, IdentityRegistry, UnloadObserver};
pub use record::Record;
pub use record_array::RecordArray;
pub use relationships::{BelongsToState, GraphContext, HasManyState, RelationshipGraph, RelationshipState};
pub use schema::{
    AttributeDef, DefinitionSource, Definitions, Inverse, InverseRef, RelationshipDef,
    RelationshipKind, RelationshipType, Schema, TypeDef,
};
pub use snapshot::{RelatedRef, RelationshipSnapshot, Snapshot};
pub use store::{Adapter, AdapterFuture, Store, StoreConfig};
pub use transform::{IdentityTransform, Transform, Transforms};

// =============================================================================
// RE-EXPORTS: Wire Codec (from serializer module)
// =============================================================================

pub use serializer::{
    AttrOption, AttrsMap, Data, EmbedMode, ErrorMap, KeyMethod, Links, NormalizationWarning,
    NormalizedDocument, RelationshipData, RelationshipObject, ResourceIdentifier, ResourceObject,
    SerializeOptions, SerializePolicy, Serializer, SerializerContext, Serializers,
};
