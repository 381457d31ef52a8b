//! Invalid-response error extraction.

use super::{KeyMethod, SerializerContext};
use crate::primitives::{
    ATTRIBUTE_POINTER_PREFIX, BASE_ERROR_KEY, DATA_KEY, ERRORS_KEY, RELATIONSHIP_POINTER_PREFIX,
};
use crate::TetherError;
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Local member name -> messages, or the untouched payload when it carried
/// no `errors` list.
pub type ErrorMap = Map<String, Value>;

impl SerializerContext<'_> {
    /// Regroup `errors[].source.pointer` into local member names.
    ///
    /// `/data/attributes/<key>` and `/data/relationships/<key>` map to the
    /// member whose wire key is `<key>`, and `/data` maps to `base`. Other
    /// entries are dropped.
    pub fn extract_errors(&self, type_name: &str, payload: &Value) -> Result<ErrorMap, TetherError> {
        let map = payload.as_object().ok_or_else(|| {
            TetherError::InvalidPayload("error payload must be an object".to_string())
        })?;
        let Some(errors) = map.get(ERRORS_KEY) else {
            return Ok(map.clone());
        };
        let errors = errors.as_array().ok_or_else(|| {
            TetherError::InvalidPayload("'errors' must be an array".to_string())
        })?;

        let mut by_wire_key: IndexMap<String, Vec<String>> = IndexMap::new();
        for error in errors {
            let Some(pointer) = error.pointer("/source/pointer").and_then(Value::as_str) else {
                continue;
            };
            let pointer = pointer.trim_start_matches('/');
            let member = pointer
                .strip_prefix(ATTRIBUTE_POINTER_PREFIX)
                .or_else(|| pointer.strip_prefix(RELATIONSHIP_POINTER_PREFIX));
            let key = if let Some(key) = member {
                key.to_string()
            } else if pointer == DATA_KEY {
                BASE_ERROR_KEY.to_string()
            } else {
                continue;
            };
            let message = error
                .get("detail")
                .or_else(|| error.get("title"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            by_wire_key.entry(key).or_default().push(message);
        }

        let type_def = self.schema.type_def(type_name)?;
        let serializer = self.serializers.serializer_for(type_name);
        let mut local: IndexMap<String, Vec<String>> = IndexMap::new();
        for (wire_key, messages) in by_wire_key {
            let attribute = type_def.attributes.iter().find(|attribute| {
                serializer.attribute_key(&attribute.name, KeyMethod::Deserialize) == wire_key
            });
            let name = match attribute {
                Some(attribute) => attribute.name.clone(),
                None => type_def
                    .relationships
                    .iter()
                    .find(|relationship| {
                        serializer.relationship_key(
                            &relationship.name,
                            relationship.kind,
                            KeyMethod::Deserialize,
                        ) == wire_key
                    })
                    .map_or(wire_key, |relationship| relationship.name.clone()),
            };
            local.entry(name).or_default().extend(messages);
        }

        Ok(local
            .into_iter()
            .map(|(name, messages)| {
                let messages = messages.into_iter().map(Value::String).collect();
                (name, Value::Array(messages))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{AttrOption, Serializer, Serializers};
    use super::*;
    use crate::schema::{Definitions, RelationshipDef, Schema, TypeDef};
    use crate::transform::Transforms;
    use serde_json::json;

    fn extract(serializers: &Serializers, payload: Value) -> Value {
        let schema = Schema::new(Definitions::new().define(
            TypeDef::new("post")
                .attr("title")
                .relationship(RelationshipDef::has_many("comments").no_inverse()),
        ));
        let transforms = Transforms::new();
        let cx = SerializerContext::new(&schema, serializers, &transforms);
        Value::Object(cx.extract_errors("post", &payload).expect("extract"))
    }

    #[test]
    fn respects_custom_key_mappings() {
        let serializers = Serializers::default().register(
            "post",
            Serializer::new()
                .attr("title", AttrOption::rename("le_title"))
                .attr("comments", AttrOption::rename("my_comments")),
        );
        let errors = extract(
            &serializers,
            json!({ "errors": [
                { "source": { "pointer": "data/attributes/le_title" }, "detail": "title errors" },
                { "source": { "pointer": "data/attributes/my_comments" }, "detail": "comments errors" }
            ] }),
        );
        assert_eq!(
            errors,
            json!({ "title": ["title errors"], "comments": ["comments errors"] })
        );
    }

    #[test]
    fn only_the_errors_property_is_read() {
        let errors = extract(
            &Serializers::default(),
            json!({
                "attributeWhichWillBeRemovedinExtractErrors": ["true"],
                "errors": [
                    { "source": { "pointer": "/data/attributes/title" }, "detail": "title errors" },
                    { "source": { "pointer": "/data" }, "detail": "record invalid" },
                    { "detail": "no pointer" }
                ]
            }),
        );
        assert_eq!(
            errors,
            json!({ "title": ["title errors"], "base": ["record invalid"] })
        );
    }

    #[test]
    fn relationship_pointers_map_to_relationship_names() {
        let errors = extract(
            &Serializers::default(),
            json!({ "errors": [
                { "source": { "pointer": "/data/relationships/comments" }, "detail": "bad comments" },
                { "source": { "pointer": "/data/attributes/title" }, "detail": "bad title" },
                { "source": { "pointer": "/data/included/0" }, "detail": "ignored" }
            ] }),
        );
        assert_eq!(
            errors,
            json!({ "comments": ["bad comments"], "title": ["bad title"] })
        );
    }

    #[test]
    fn payload_without_errors_is_untouched() {
        let payload = json!({ "untouchedSinceNoErrorsSiblingPresent": ["true"] });
        assert_eq!(extract(&Serializers::default(), payload.clone()), payload);
    }

    #[test]
    fn key_hook_applies_to_pointers() {
        let serializers = Serializers::default()
            .register("post", Serializer::new().key_for_attribute(|name, _| name.to_uppercase()));
        let errors = extract(
            &serializers,
            json!({ "errors": [
                { "source": { "pointer": "data/attributes/TITLE" }, "detail": "too short" },
                { "source": { "pointer": "data/attributes/TITLE" }, "detail": "too plain" }
            ] }),
        );
        assert_eq!(errors, json!({ "title": ["too short", "too plain"] }));
    }
}
