//! # Normalizer / Serializer
//!
//! Bidirectional transform between wire payloads and `NormalizedDocument`s.
//!
//! A `Serializer` is plain configuration: a primary key, a layered `attrs`
//! table and optional hook closures. Each hook has a default; a custom hook
//! replaces the default and may call back into it explicitly (see
//! `default_extract_meta`).
//!
//! ## Key Resolution
//!
//! For every declared member the wire key is, in order:
//! 1. the `attrs` entry's key, if any
//! 2. the key hook (`key_for_attribute` / `key_for_relationship`)
//! 3. the local name

mod attrs;
mod document;
mod errors;
mod normalize;
mod serialize;

pub use attrs::{AttrOption, AttrsMap, EmbedMode, SerializePolicy};
pub use document::{
    Data, Links, NormalizationWarning, NormalizedDocument, RelationshipData, RelationshipObject,
    ResourceIdentifier, ResourceObject,
};
pub use errors::ErrorMap;
pub use serialize::SerializeOptions;

use crate::primitives::{DEFAULT_PRIMARY_KEY, META_KEY};
use crate::schema::{RelationshipDef, RelationshipKind, Schema};
use crate::snapshot::Snapshot;
use crate::transform::Transforms;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// HOOKS
// =============================================================================

/// Direction a key hook is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMethod {
    Serialize,
    Deserialize,
}

pub type KeyForAttribute = Arc<dyn Fn(&str, KeyMethod) -> String + Send + Sync>;
pub type KeyForRelationship = Arc<dyn Fn(&str, RelationshipKind, KeyMethod) -> String + Send + Sync>;
pub type KeyForLink = Arc<dyn Fn(&str, RelationshipKind) -> String + Send + Sync>;
/// `(definition, raw reference, parent hash) -> concrete type`
pub type ExtractPolymorphicType =
    Arc<dyn Fn(&RelationshipDef, &Value, &Map<String, Value>) -> Option<String> + Send + Sync>;
pub type SerializePolymorphicType =
    Arc<dyn Fn(&Snapshot, &mut Map<String, Value>, &RelationshipDef) + Send + Sync>;
/// Removes and returns metadata from the top-level payload.
pub type ExtractMeta = Arc<dyn Fn(&mut Map<String, Value>) -> Option<Value> + Send + Sync>;

/// The default meta extraction: take the top-level `meta` key.
pub fn default_extract_meta(payload: &mut Map<String, Value>) -> Option<Value> {
    payload.remove(META_KEY)
}

// =============================================================================
// SERIALIZER
// =============================================================================

/// Per-type wire mapping configuration.
#[derive(Clone)]
pub struct Serializer {
    pub primary_key: String,
    pub attrs: AttrsMap,
    pub key_for_attribute: Option<KeyForAttribute>,
    pub key_for_relationship: Option<KeyForRelationship>,
    pub key_for_link: Option<KeyForLink>,
    pub extract_polymorphic_type: Option<ExtractPolymorphicType>,
    pub serialize_polymorphic_type: Option<SerializePolymorphicType>,
    pub extract_meta: Option<ExtractMeta>,
}

impl Default for Serializer {
    fn default() -> Self {
        Self {
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            attrs: AttrsMap::new(),
            key_for_attribute: None,
            key_for_relationship: None,
            key_for_link: None,
            extract_polymorphic_type: None,
            serialize_polymorphic_type: None,
            extract_meta: None,
        }
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("primary_key", &self.primary_key)
            .field("attrs", &self.attrs)
            .field("key_for_attribute", &self.key_for_attribute.is_some())
            .field("key_for_relationship", &self.key_for_relationship.is_some())
            .field("key_for_link", &self.key_for_link.is_some())
            .field("extract_polymorphic_type", &self.extract_polymorphic_type.is_some())
            .field("serialize_polymorphic_type", &self.serialize_polymorphic_type.is_some())
            .field("extract_meta", &self.extract_meta.is_some())
            .finish()
    }
}

impl Serializer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    /// Layer `attrs` over the current table; the new entries win per member.
    #[must_use]
    pub fn with_attrs(mut self, attrs: AttrsMap) -> Self {
        self.attrs = attrs.merged_over(&self.attrs);
        self
    }

    /// Add or replace one `attrs` entry.
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, option: AttrOption) -> Self {
        self.attrs = self.attrs.with(name, option);
        self
    }

    #[must_use]
    pub fn key_for_attribute(
        mut self,
        hook: impl Fn(&str, KeyMethod) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_for_attribute = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn key_for_relationship(
        mut self,
        hook: impl Fn(&str, RelationshipKind, KeyMethod) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_for_relationship = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn key_for_link(
        mut self,
        hook: impl Fn(&str, RelationshipKind) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_for_link = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn extract_polymorphic_type(
        mut self,
        hook: impl Fn(&RelationshipDef, &Value, &Map<String, Value>) -> Option<String>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.extract_polymorphic_type = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn serialize_polymorphic_type(
        mut self,
        hook: impl Fn(&Snapshot, &mut Map<String, Value>, &RelationshipDef) + Send + Sync + 'static,
    ) -> Self {
        self.serialize_polymorphic_type = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn extract_meta(
        mut self,
        hook: impl Fn(&mut Map<String, Value>) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.extract_meta = Some(Arc::new(hook));
        self
    }

    // ===== KEY RESOLUTION =====

    fn mapped_key(&self, name: &str) -> Option<String> {
        self.attrs.get(name).and_then(|option| option.key.clone())
    }

    /// Wire key of an attribute.
    #[must_use]
    pub fn attribute_key(&self, name: &str, method: KeyMethod) -> String {
        if let Some(key) = self.mapped_key(name) {
            return key;
        }
        match &self.key_for_attribute {
            Some(hook) => hook(name, method),
            None => name.to_string(),
        }
    }

    /// Wire key of a relationship.
    #[must_use]
    pub fn relationship_key(&self, name: &str, kind: RelationshipKind, method: KeyMethod) -> String {
        if let Some(key) = self.mapped_key(name) {
            return key;
        }
        match &self.key_for_relationship {
            Some(hook) => hook(name, kind, method),
            None => name.to_string(),
        }
    }

    /// Key of a relationship inside the payload's `links` hash.
    #[must_use]
    pub fn link_key(&self, name: &str, kind: RelationshipKind) -> String {
        if let Some(key) = self.mapped_key(name) {
            return key;
        }
        match &self.key_for_link {
            Some(hook) => hook(name, kind),
            None => name.to_string(),
        }
    }

    #[must_use]
    pub fn serialize_policy(&self, name: &str) -> Option<SerializePolicy> {
        self.attrs.get(name).and_then(|option| option.serialize)
    }

    #[must_use]
    pub fn embeds_on_normalize(&self, name: &str) -> bool {
        self.attrs.get(name).is_some_and(AttrOption::embeds_on_normalize)
    }

    #[must_use]
    pub fn embeds_on_serialize(&self, name: &str) -> bool {
        self.attrs.get(name).is_some_and(AttrOption::embeds_on_serialize)
    }

    fn take_meta(&self, payload: &mut Map<String, Value>) -> Option<Value> {
        match &self.extract_meta {
            Some(hook) => hook(payload),
            None => default_extract_meta(payload),
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Explicit type -> serializer registry with a fallback default.
#[derive(Debug, Clone, Default)]
pub struct Serializers {
    default: Serializer,
    by_type: BTreeMap<String, Serializer>,
}

impl Serializers {
    #[must_use]
    pub fn new(default: Serializer) -> Self {
        Self {
            default,
            by_type: BTreeMap::new(),
        }
    }

    /// Register the serializer used for one type.
    #[must_use]
    pub fn register(mut self, type_name: impl Into<String>, serializer: Serializer) -> Self {
        self.by_type.insert(type_name.into(), serializer);
        self
    }

    #[must_use]
    pub fn serializer_for(&self, type_name: &str) -> &Serializer {
        self.by_type.get(type_name).unwrap_or(&self.default)
    }

    #[must_use]
    pub fn default_serializer(&self) -> &Serializer {
        &self.default
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Everything normalization and serialization read from.
#[derive(Debug, Clone, Copy)]
pub struct SerializerContext<'a> {
    pub schema: &'a Schema,
    pub serializers: &'a Serializers,
    pub transforms: &'a Transforms,
}

impl<'a> SerializerContext<'a> {
    #[must_use]
    pub fn new(schema: &'a Schema, serializers: &'a Serializers, transforms: &'a Transforms) -> Self {
        Self {
            schema,
            serializers,
            transforms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mapped_key_beats_hook() {
        let serializer = Serializer::new()
            .key_for_attribute(|name, _| name.to_uppercase())
            .attr("authorName", AttrOption::rename("author_name_key"));
        assert_eq!(
            serializer.attribute_key("authorName", KeyMethod::Deserialize),
            "author_name_key"
        );
        assert_eq!(serializer.attribute_key("title", KeyMethod::Serialize), "TITLE");
    }

    #[test]
    fn link_key_follows_mapping() {
        let serializer = Serializer::new().attr("comments", AttrOption::rename("my_comments"));
        assert_eq!(
            serializer.link_key("comments", RelationshipKind::HasMany),
            "my_comments"
        );
        assert_eq!(serializer.link_key("author", RelationshipKind::BelongsTo), "author");
    }

    #[test]
    fn with_attrs_layers_over_existing() {
        let base = Serializer::new().with_attrs(
            AttrsMap::new()
                .with("title", AttrOption::rename("title_payload_key"))
                .with("anotherString", AttrOption::rename("base_another_string_key")),
        );
        let derived = base.with_attrs(
            AttrsMap::new().with("anotherString", AttrOption::rename("overwritten_another_string_key")),
        );
        assert_eq!(
            derived.attribute_key("title", KeyMethod::Serialize),
            "title_payload_key"
        );
        assert_eq!(
            derived.attribute_key("anotherString", KeyMethod::Serialize),
            "overwritten_another_string_key"
        );
    }

    #[test]
    fn extract_meta_hook_can_extend_default() {
        let serializer = Serializer::new().extract_meta(|payload| {
            let mut meta = default_extract_meta(payload)?;
            if let Some(authors) = meta.get_mut("authors").and_then(Value::as_array_mut) {
                authors.push(json!("Tomhuda"));
            }
            Some(meta)
        });
        let mut payload = json!({ "id": "1", "meta": { "authors": ["Tomster"] } });
        let meta = payload
            .as_object_mut()
            .and_then(|map| serializer.take_meta(map))
            .expect("meta");
        assert_eq!(meta, json!({ "authors": ["Tomster", "Tomhuda"] }));
        assert!(payload.get("meta").is_none());
    }

    #[test]
    fn registry_falls_back_to_default() {
        let serializers = Serializers::default()
            .register("post", Serializer::new().primary_key("_ID_"));
        assert_eq!(serializers.serializer_for("post").primary_key, "_ID_");
        assert_eq!(serializers.serializer_for("comment").primary_key, "id");
    }
}
