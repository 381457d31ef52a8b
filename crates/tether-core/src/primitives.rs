//! # Wire Primitives
//!
//! Hardcoded key names and limits shared by the normalizer and serializer.
//!
//! These are the reserved words of the JSON wire format. Everything else in
//! a payload is mapped through a serializer's key hooks and `attrs` table.

/// Default payload key carrying a record's id.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Reserved discriminator key for polymorphic references and embedded records.
///
/// A domain attribute or relationship may share this name; the normalizer
/// only treats it as a discriminator when the relationship is polymorphic.
pub const TYPE_KEY: &str = "type";

/// Payload key holding relationship links.
pub const LINKS_KEY: &str = "links";

/// Payload key holding response metadata.
pub const META_KEY: &str = "meta";

/// Payload key holding the top-level resource list of an envelope response.
pub const DATA_KEY: &str = "data";

/// Payload key holding the error list of an invalid response.
pub const ERRORS_KEY: &str = "errors";

/// Error pointer prefix for attribute errors.
pub const ATTRIBUTE_POINTER_PREFIX: &str = "data/attributes/";

/// Error pointer prefix for relationship errors.
pub const RELATIONSHIP_POINTER_PREFIX: &str = "data/relationships/";

/// Error key receiving errors whose pointer targets the whole resource.
pub const BASE_ERROR_KEY: &str = "base";

/// Maximum nesting depth for embedded records.
///
/// Bounds recursion in both normalization and snapshot capture when
/// embedded relationships form a cycle.
pub const MAX_EMBED_DEPTH: usize = 16;
