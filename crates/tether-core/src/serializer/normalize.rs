//! Payload -> `NormalizedDocument`.

use super::{
    Data, KeyMethod, Links, NormalizationWarning, NormalizedDocument, RelationshipData,
    RelationshipObject, ResourceIdentifier, ResourceObject, Serializer, SerializerContext,
};
use crate::primitives::{DATA_KEY, LINKS_KEY, MAX_EMBED_DEPTH, TYPE_KEY};
use crate::schema::{RelationshipDef, RelationshipKind, TypeDef};
use crate::{RequestKind, TetherError};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Accumulates side-loaded records and warnings across one payload.
#[derive(Default)]
struct Collector {
    included: Vec<ResourceObject>,
    warnings: Vec<NormalizationWarning>,
}

impl Collector {
    fn warn(&mut self, type_name: &str, key: &str, message: String) {
        tracing::debug!(type_name, key, "{message}");
        self.warnings.push(NormalizationWarning {
            type_name: type_name.to_string(),
            key: key.to_string(),
            message,
        });
    }
}

impl SerializerContext<'_> {
    /// Normalize one resource hash of `type_name`.
    ///
    /// Only keys present in the payload appear in the result. Embedded
    /// relationships are extracted into `included`.
    pub fn normalize(&self, type_name: &str, raw: &Value) -> Result<NormalizedDocument, TetherError> {
        let mut collector = Collector::default();
        let resource = self.normalize_resource(type_name, raw, 0, &mut collector)?;
        let mut document = NormalizedDocument::single(Some(resource));
        document.included = collector.included;
        document.warnings = collector.warnings;
        Ok(document)
    }

    /// Normalize an adapter response for `kind`.
    ///
    /// Collection kinds accept either a bare array or an envelope object
    /// `{ data: [...], meta?, links? }`. Single kinds accept one resource
    /// hash; `null` yields `data: null`.
    pub fn normalize_response(
        &self,
        type_name: &str,
        payload: &Value,
        kind: RequestKind,
    ) -> Result<NormalizedDocument, TetherError> {
        let serializer = self.serializers.serializer_for(type_name);
        let mut payload = payload.clone();
        let meta = payload
            .as_object_mut()
            .and_then(|map| serializer.take_meta(map));

        let mut collector = Collector::default();
        let mut links = None;
        let data = if kind.is_collection() {
            let items = match payload {
                Value::Array(items) => items,
                Value::Object(mut envelope) => {
                    links = envelope.remove(LINKS_KEY);
                    match envelope.remove(DATA_KEY) {
                        Some(Value::Array(items)) => items,
                        _ => {
                            return Err(TetherError::InvalidPayload(format!(
                                "{kind:?} response for '{type_name}' must be an array or a data envelope"
                            )));
                        }
                    }
                }
                Value::Null => Vec::new(),
                other => {
                    return Err(TetherError::InvalidPayload(format!(
                        "{kind:?} response for '{type_name}' must be an array, got {}",
                        describe(&other)
                    )));
                }
            };
            let mut resources = Vec::with_capacity(items.len());
            for item in &items {
                resources.push(self.normalize_resource(type_name, item, 0, &mut collector)?);
            }
            Data::Collection(resources)
        } else {
            match &payload {
                Value::Null => Data::Single(None),
                Value::Object(map) if map.is_empty() && kind == RequestKind::DeleteRecord => {
                    Data::Single(None)
                }
                _ => Data::Single(Some(self.normalize_resource(
                    type_name,
                    &payload,
                    0,
                    &mut collector,
                )?)),
            }
        };

        Ok(NormalizedDocument {
            data,
            included: collector.included,
            meta,
            links,
            warnings: collector.warnings,
        })
    }

    fn normalize_resource(
        &self,
        type_name: &str,
        raw: &Value,
        depth: usize,
        collector: &mut Collector,
    ) -> Result<ResourceObject, TetherError> {
        if depth > MAX_EMBED_DEPTH {
            return Err(TetherError::InvalidPayload(format!(
                "embedded records nested deeper than {MAX_EMBED_DEPTH} levels"
            )));
        }
        let hash = raw.as_object().ok_or_else(|| {
            TetherError::InvalidPayload(format!(
                "expected a '{type_name}' object, got {}",
                describe(raw)
            ))
        })?;
        let type_def = self.schema.type_def(type_name)?;
        let serializer = self.serializers.serializer_for(type_name);
        warn_unmapped_attrs(&type_def, serializer, collector);

        let id = hash.get(&serializer.primary_key).and_then(coerce_id);
        let mut resource = ResourceObject::new(type_name, id);
        let mut consumed: BTreeSet<String> = BTreeSet::new();
        consumed.insert(serializer.primary_key.clone());
        consumed.insert(LINKS_KEY.to_string());
        if !type_def.has_member(TYPE_KEY) {
            consumed.insert(TYPE_KEY.to_string());
        }

        for attribute in &type_def.attributes {
            let key = serializer.attribute_key(&attribute.name, KeyMethod::Deserialize);
            if let Some(value) = hash.get(&key) {
                let value =
                    self.transforms
                        .deserialize(attribute.kind.as_deref(), value, &attribute.options)?;
                resource.attributes.insert(attribute.name.clone(), value);
                consumed.insert(key);
            }
        }

        let links = hash.get(LINKS_KEY).and_then(Value::as_object);
        for relationship in &type_def.relationships {
            let key =
                serializer.relationship_key(&relationship.name, relationship.kind, KeyMethod::Deserialize);
            let mut object = RelationshipObject::default();
            if let Some(value) = hash.get(&key) {
                object.data =
                    Some(self.normalize_linkage(serializer, relationship, value, hash, depth, collector)?);
                consumed.insert(key);
            }
            let related = links
                .and_then(|links| links.get(&serializer.link_key(&relationship.name, relationship.kind)))
                .and_then(Value::as_str);
            if let Some(related) = related {
                object.links = Some(Links {
                    related: Some(related.to_string()),
                    self_link: None,
                });
            }
            if object.data.is_some() || object.links.is_some() {
                resource.relationships.insert(relationship.name.clone(), object);
            }
        }

        for key in hash.keys().filter(|key| !consumed.contains(*key)) {
            collector.warn(
                type_name,
                key,
                format!("payload key '{key}' has no matching attribute or relationship on '{type_name}'"),
            );
        }
        Ok(resource)
    }

    fn normalize_linkage(
        &self,
        serializer: &Serializer,
        relationship: &RelationshipDef,
        value: &Value,
        parent: &Map<String, Value>,
        depth: usize,
        collector: &mut Collector,
    ) -> Result<RelationshipData, TetherError> {
        if value.is_null() {
            return Ok(RelationshipData::One(None));
        }
        match relationship.kind {
            RelationshipKind::BelongsTo => Ok(RelationshipData::One(Some(self.normalize_reference(
                serializer,
                relationship,
                value,
                parent,
                depth,
                collector,
            )?))),
            RelationshipKind::HasMany => {
                let items = value.as_array().ok_or_else(|| {
                    TetherError::InvalidPayload(format!(
                        "hasMany '{}' expects an array, got {}",
                        relationship.name,
                        describe(value)
                    ))
                })?;
                let mut references = Vec::with_capacity(items.len());
                for item in items {
                    references.push(self.normalize_reference(
                        serializer,
                        relationship,
                        item,
                        parent,
                        depth,
                        collector,
                    )?);
                }
                Ok(RelationshipData::Many(references))
            }
        }
    }

    fn normalize_reference(
        &self,
        serializer: &Serializer,
        relationship: &RelationshipDef,
        item: &Value,
        parent: &Map<String, Value>,
        depth: usize,
        collector: &mut Collector,
    ) -> Result<ResourceIdentifier, TetherError> {
        match item {
            Value::String(_) | Value::Number(_) => {
                let id = coerce_id(item).unwrap_or_default();
                let type_name = self.reference_type(serializer, relationship, item, parent);
                Ok(ResourceIdentifier::new(type_name, id))
            }
            Value::Object(hash) if serializer.embeds_on_normalize(&relationship.name) => {
                self.normalize_embedded(serializer, relationship, hash, parent, depth, collector)
            }
            Value::Object(hash) => {
                let id = hash.get("id").and_then(coerce_id).ok_or_else(|| {
                    TetherError::InvalidPayload(format!(
                        "reference in '{}' has no id",
                        relationship.name
                    ))
                })?;
                let explicit = hash
                    .get(TYPE_KEY)
                    .and_then(Value::as_str)
                    .filter(|_| relationship.is_polymorphic);
                let type_name = match explicit {
                    Some(explicit) => explicit.to_string(),
                    None => self.reference_type(serializer, relationship, item, parent),
                };
                Ok(ResourceIdentifier::new(type_name, id))
            }
            other => Err(TetherError::InvalidPayload(format!(
                "relationship '{}' cannot reference {}",
                relationship.name,
                describe(other)
            ))),
        }
    }

    /// Normalize an embedded record as its own resource and side-load it.
    ///
    /// Only a polymorphic relationship reads `type` as the discriminator; a
    /// non-polymorphic child keeps any member named `type` as domain data.
    fn normalize_embedded(
        &self,
        serializer: &Serializer,
        relationship: &RelationshipDef,
        hash: &Map<String, Value>,
        parent: &Map<String, Value>,
        depth: usize,
        collector: &mut Collector,
    ) -> Result<ResourceIdentifier, TetherError> {
        let (child_type, child_payload) = if relationship.is_polymorphic {
            let raw = Value::Object(hash.clone());
            let child_type = match hash.get(TYPE_KEY).and_then(Value::as_str) {
                Some(explicit) => explicit.to_string(),
                None => self.reference_type(serializer, relationship, &raw, parent),
            };
            let mut stripped = hash.clone();
            stripped.remove(TYPE_KEY);
            (child_type, Value::Object(stripped))
        } else {
            (relationship.target_type.clone(), Value::Object(hash.clone()))
        };

        let mut nested = Collector::default();
        let child = self.normalize_resource(&child_type, &child_payload, depth + 1, &mut nested)?;
        let identifier = child.identifier().ok_or_else(|| {
            TetherError::InvalidPayload(format!(
                "embedded '{child_type}' in '{}' has no id",
                relationship.name
            ))
        })?;
        collector.included.push(child);
        collector.included.extend(nested.included);
        collector.warnings.extend(nested.warnings);
        Ok(identifier)
    }

    fn reference_type(
        &self,
        serializer: &Serializer,
        relationship: &RelationshipDef,
        raw: &Value,
        parent: &Map<String, Value>,
    ) -> String {
        if !relationship.is_polymorphic {
            return relationship.target_type.clone();
        }
        serializer
            .extract_polymorphic_type
            .as_ref()
            .and_then(|hook| hook(relationship, raw, parent))
            .unwrap_or_else(|| relationship.target_type.clone())
    }
}

fn warn_unmapped_attrs(type_def: &TypeDef, serializer: &Serializer, collector: &mut Collector) {
    for (name, _) in serializer.attrs.iter() {
        if !type_def.has_member(name) {
            collector.warn(
                &type_def.name,
                name,
                format!(
                    "There is no attribute or relationship with the name '{name}' on '{}'; check your serializer's attrs",
                    type_def.name
                ),
            );
        }
    }
}

/// Ids are strings internally; numbers are stringified.
fn coerce_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::super::{AttrOption, Serializers};
    use super::*;
    use crate::schema::{AttributeDef, Definitions, Schema};
    use crate::transform::{Transform, Transforms};
    use serde_json::json;

    fn blog() -> Schema {
        Schema::new(
            Definitions::new()
                .define(
                    TypeDef::new("post")
                        .attr("title")
                        .relationship(RelationshipDef::has_many("comments").no_inverse().sync())
                        .relationship(RelationshipDef::belongs_to("author").target("person")),
                )
                .define(
                    TypeDef::new("comment")
                        .attr("body")
                        .relationship(RelationshipDef::belongs_to("post").no_inverse().sync()),
                )
                .define(TypeDef::new("person").relationship(RelationshipDef::has_many("posts")))
                .define(
                    TypeDef::new("favorite")
                        .relationship(RelationshipDef::belongs_to("item").target("post").polymorphic()),
                )
                .define(TypeDef::new("parent").relationship(RelationshipDef::belongs_to("child")))
                .define(TypeDef::new("child").attr("type"))
                .define(TypeDef::new("shelf").relationship(RelationshipDef::belongs_to("book")))
                .define(
                    TypeDef::new("book")
                        .relationship(RelationshipDef::belongs_to("type").target("kind")),
                )
                .define(TypeDef::new("kind").attr("name")),
        )
    }

    fn normalize(serializers: &Serializers, type_name: &str, raw: Value) -> NormalizedDocument {
        let schema = blog();
        let transforms = Transforms::new();
        let cx = SerializerContext::new(&schema, serializers, &transforms);
        cx.normalize_response(type_name, &raw, RequestKind::FindRecord)
            .expect("normalize")
    }

    #[test]
    fn attrs_rename_applies_on_extract() {
        let serializers = Serializers::default().register(
            "post",
            Serializer::new()
                .attr("title", AttrOption::rename("title_payload_key"))
                .attr("comments", AttrOption::rename("my_comments")),
        );
        let doc = normalize(
            &serializers,
            "post",
            json!({ "id": "1", "title_payload_key": "Rails is omakase", "my_comments": [1, 2] }),
        );
        assert_eq!(
            doc.to_value()["data"],
            json!({
                "id": "1",
                "type": "post",
                "attributes": { "title": "Rails is omakase" },
                "relationships": {
                    "comments": { "data": [
                        { "id": "1", "type": "comment" },
                        { "id": "2", "type": "comment" }
                    ] }
                }
            })
        );
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn primary_key_maps_and_coerces() {
        let serializers = Serializers::default().register("post", Serializer::new().primary_key("_ID_"));
        let doc = normalize(&serializers, "post", json!({ "_ID_": 1, "title": "Rails is omakase" }));
        let resource = doc.data.resources().next().expect("resource");
        assert_eq!(resource.id.as_deref(), Some("1"));
    }

    #[test]
    fn null_relationship_normalizes_to_null_data() {
        let doc = normalize(&Serializers::default(), "post", json!({ "id": "1", "comments": null }));
        assert_eq!(doc.to_value()["data"]["relationships"]["comments"], json!({ "data": null }));
        assert!(doc.included.is_empty());
    }

    #[test]
    fn embedded_child_keeps_type_attribute() {
        let serializers = Serializers::default()
            .register("parent", Serializer::new().attr("child", AttrOption::embedded_always()));
        let doc = normalize(
            &serializers,
            "parent",
            json!({ "id": 1, "child": { "id": 1, "type": "first_type" } }),
        );
        assert_eq!(
            serde_json::to_value(&doc.included).expect("json"),
            json!([{
                "id": "1",
                "type": "child",
                "attributes": { "type": "first_type" },
                "relationships": {}
            }])
        );
        assert_eq!(
            doc.to_value()["data"]["relationships"]["child"]["data"],
            json!({ "id": "1", "type": "child" })
        );
    }

    #[test]
    fn embedded_child_keeps_type_relationship() {
        let serializers = Serializers::default()
            .register("shelf", Serializer::new().attr("book", AttrOption::embedded_always()));
        let doc = normalize(
            &serializers,
            "shelf",
            json!({ "id": 1, "book": { "id": 2, "type": "3" } }),
        );
        assert_eq!(
            serde_json::to_value(&doc.included).expect("json"),
            json!([{
                "id": "2",
                "type": "book",
                "attributes": {},
                "relationships": { "type": { "data": { "id": "3", "type": "kind" } } }
            }])
        );
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn explicit_type_ignored_unless_polymorphic() {
        let doc = normalize(
            &Serializers::default(),
            "post",
            json!({ "id": "1", "author": { "id": "4", "type": "widget" } }),
        );
        assert_eq!(
            doc.to_value()["data"]["relationships"]["author"]["data"],
            json!({ "id": "4", "type": "person" })
        );
    }

    #[test]
    fn polymorphic_type_from_field_or_hook() {
        let serializers = Serializers::default().register(
            "favorite",
            Serializer::new().extract_polymorphic_type(|def, _raw, parent| {
                parent
                    .get(&format!("{}Type", def.name))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }),
        );
        let explicit = normalize(
            &serializers,
            "favorite",
            json!({ "id": "1", "item": { "id": "3", "type": "comment" } }),
        );
        assert_eq!(
            explicit.to_value()["data"]["relationships"]["item"]["data"],
            json!({ "id": "3", "type": "comment" })
        );

        let hooked = normalize(
            &serializers,
            "favorite",
            json!({ "id": "1", "item": "3", "itemType": "person" }),
        );
        assert_eq!(
            hooked.to_value()["data"]["relationships"]["item"]["data"],
            json!({ "id": "3", "type": "person" })
        );
    }

    #[test]
    fn links_use_mapped_key() {
        let serializers = Serializers::default()
            .register("post", Serializer::new().attr("comments", AttrOption::rename("my_comments")));
        let doc = normalize(
            &serializers,
            "post",
            json!({ "title": "Rails is omakase", "links": { "my_comments": "posts/1/comments" } }),
        );
        assert_eq!(
            doc.to_value()["data"]["relationships"]["comments"]["links"]["related"],
            json!("posts/1/comments")
        );
    }

    #[test]
    fn unknown_keys_and_attrs_entries_warn() {
        let serializers = Serializers::default().register(
            "post",
            Serializer::new()
                .attr("title", AttrOption::never_serialize())
                .attr("notInMapping", AttrOption::never_serialize()),
        );
        let doc = normalize(
            &serializers,
            "post",
            json!({ "id": "1", "notInMapping": "ignored", "title": "Rails is omakase" }),
        );
        let resource = doc.data.resources().next().expect("resource");
        assert_eq!(resource.attributes.get("title"), Some(&json!("Rails is omakase")));
        assert!(!resource.attributes.contains_key("notInMapping"));
        assert_eq!(doc.warnings.len(), 2);
        assert!(doc.warnings.iter().all(|w| w.key == "notInMapping"));
    }

    #[test]
    fn array_envelope_and_meta() {
        let schema = blog();
        let transforms = Transforms::new();
        let serializers = Serializers::default();
        let cx = SerializerContext::new(&schema, &serializers, &transforms);
        let doc = cx
            .normalize_response(
                "post",
                &json!({ "data": [{ "id": "1" }, { "id": "2" }], "meta": { "total": 2 } }),
                RequestKind::Query,
            )
            .expect("normalize");
        assert_eq!(doc.data.resources().count(), 2);
        assert_eq!(doc.meta, Some(json!({ "total": 2 })));

        let err = cx
            .normalize_response("post", &json!("nope"), RequestKind::FindAll)
            .expect_err("invalid");
        assert!(matches!(err, TetherError::InvalidPayload(_)));
    }

    #[test]
    fn transform_receives_options() {
        struct Tagged;
        impl Transform for Tagged {
            fn serialize(&self, value: &Value, _: &Map<String, Value>) -> Result<Value, TetherError> {
                Ok(value.clone())
            }
            fn deserialize(&self, value: &Value, options: &Map<String, Value>) -> Result<Value, TetherError> {
                Ok(json!({ "value": value, "options": options }))
            }
        }

        let schema = Schema::new(Definitions::new().define(TypeDef::new("post").attribute(
            AttributeDef::new("custom").kind("custom").option("custom", json!("config")),
        )));
        let transforms = Transforms::new().register("custom", Tagged);
        let serializers = Serializers::default();
        let cx = SerializerContext::new(&schema, &serializers, &transforms);
        let doc = cx.normalize("post", &json!({ "custom": "value" })).expect("normalize");
        let resource = doc.data.resources().next().expect("resource");
        assert_eq!(
            resource.attributes.get("custom"),
            Some(&json!({ "value": "value", "options": { "custom": "config" } }))
        );
    }
}
