//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the Tether data layer:
//! - Record handles (`RecordHandle`)
//! - Relationship load states (`LoadState`)
//! - Adapter operation kinds (`RequestKind`)
//! - Error types (`TetherError`)
//!
//! ## Ordering Guarantees
//!
//! Handles implement `Ord` so every index in the core can live in a
//! `BTreeMap`/`BTreeSet` and iterate deterministically.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// RECORD HANDLE
// =============================================================================

/// Canonical internal handle for one entity instance.
///
/// The inner value doubles as the record's client id: it is assigned once
/// when the handle is created and never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordHandle(pub u64);

impl RecordHandle {
    /// Get the raw client id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client:{}", self.0)
    }
}

// =============================================================================
// LOAD STATE
// =============================================================================

/// Load status of a single relationship on a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadState {
    /// Nothing is known about the relationship yet, or the related data is
    /// known to exist remotely but has not been fetched.
    #[default]
    NotLoaded,
    /// A remote fetch is in flight.
    Loading,
    /// Related data is present locally.
    Loaded,
    /// The relationship is known to be empty.
    Empty,
}

// =============================================================================
// REQUEST KIND
// =============================================================================

/// The adapter operation a payload answers.
///
/// Determines whether a response is normalized as a single resource or as
/// a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    FindRecord,
    QueryRecord,
    CreateRecord,
    UpdateRecord,
    DeleteRecord,
    FindAll,
    Query,
    FindMany,
    FindHasMany,
    FindBelongsTo,
}

impl RequestKind {
    /// Whether responses to this request carry a collection of resources.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(
            self,
            Self::FindAll | Self::Query | Self::FindMany | Self::FindHasMany
        )
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Tether data layer.
///
/// `Clone` so a single failure can be observed by every caller awaiting a
/// coalesced fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TetherError {
    /// A handle already carries a different id, or another handle owns it.
    #[error("identity conflict on {type_name}: cannot assign id {attempted:?}, already {existing:?}")]
    IdentityConflict {
        type_name: String,
        existing: String,
        attempted: String,
    },

    /// A synchronous relationship was read before its data was loaded.
    #[error(
        "relationship '{key}' on '{type_name}' is not loaded; use the async accessor or fetch the related records first"
    )]
    RelationshipNotLoaded { type_name: String, key: String },

    /// No definition is registered for the type.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// The type has no relationship with this name.
    #[error("type '{type_name}' has no relationship named '{key}'")]
    UnknownRelationship { type_name: String, key: String },

    /// The type has no attribute with this name.
    #[error("type '{type_name}' has no attribute named '{key}'")]
    UnknownAttribute { type_name: String, key: String },

    /// The relationship exists but was used as the other kind.
    #[error("relationship '{key}' on '{type_name}' is a {actual}, not a {expected}")]
    WrongKind {
        type_name: String,
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// The payload does not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The adapter collaborator failed.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// An attribute transform failed or is not registered.
    #[error("transform '{kind}' failed: {message}")]
    Transform { kind: String, message: String },

    /// The handle was unloaded.
    #[error("record {0} has been unloaded")]
    RecordUnloaded(RecordHandle),

    /// A type definition is invalid.
    #[error("invalid definition: {0}")]
    Schema(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_display_uses_client_prefix() {
        assert_eq!(RecordHandle(7).to_string(), "client:7");
        assert_eq!(RecordHandle(7).value(), 7);
    }

    #[test]
    fn handles_order_by_creation() {
        let mut handles = vec![RecordHandle(3), RecordHandle(1), RecordHandle(2)];
        handles.sort();
        assert_eq!(handles, vec![RecordHandle(1), RecordHandle(2), RecordHandle(3)]);
    }

    #[test]
    fn request_kind_collection_split() {
        assert!(RequestKind::FindAll.is_collection());
        assert!(RequestKind::Query.is_collection());
        assert!(RequestKind::FindHasMany.is_collection());
        assert!(!RequestKind::FindRecord.is_collection());
        assert!(!RequestKind::CreateRecord.is_collection());
        assert!(!RequestKind::FindBelongsTo.is_collection());
    }

    #[test]
    fn load_state_defaults_to_not_loaded() {
        assert_eq!(LoadState::default(), LoadState::NotLoaded);
    }

    #[test]
    fn not_loaded_error_names_relationship() {
        let err = TetherError::RelationshipNotLoaded {
            type_name: "comment".to_string(),
            key: "post".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'post'"));
        assert!(msg.contains("'comment'"));
    }
}
