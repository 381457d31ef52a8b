//! The normalized document: wire-agnostic records keyed by type and id.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// `{ id, type }` reference to a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceIdentifier {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl ResourceIdentifier {
    #[must_use]
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
        }
    }
}

/// Relationship linkage: one reference (possibly null) or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RelationshipData {
    One(Option<ResourceIdentifier>),
    Many(Vec<ResourceIdentifier>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Links {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// `{ data?, links? }` for one relationship key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelationshipObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<RelationshipData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
}

/// One normalized record. Only keys present in the payload appear.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceObject {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    pub attributes: Map<String, Value>,
    pub relationships: IndexMap<String, RelationshipObject>,
}

impl ResourceObject {
    #[must_use]
    pub fn new(type_name: impl Into<String>, id: Option<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            attributes: Map::new(),
            relationships: IndexMap::new(),
        }
    }

    /// Reference to this record, when it has an id.
    #[must_use]
    pub fn identifier(&self) -> Option<ResourceIdentifier> {
        self.id
            .as_ref()
            .map(|id| ResourceIdentifier::new(self.type_name.clone(), id.clone()))
    }
}

/// Primary data: a single record (possibly null) or a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Data {
    Single(Option<ResourceObject>),
    Collection(Vec<ResourceObject>),
}

impl Data {
    /// Primary records in order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceObject> {
        let slice: &[ResourceObject] = match self {
            Self::Single(Some(resource)) => std::slice::from_ref(resource),
            Self::Single(None) => &[],
            Self::Collection(resources) => resources,
        };
        slice.iter()
    }
}

/// A non-fatal normalization issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizationWarning {
    pub type_name: String,
    /// Payload key or `attrs` entry involved.
    pub key: String,
    pub message: String,
}

/// Result of normalizing one payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedDocument {
    pub data: Data,
    /// Side-loaded records; always present, possibly empty.
    pub included: Vec<ResourceObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
    #[serde(skip)]
    pub warnings: Vec<NormalizationWarning>,
}

impl NormalizedDocument {
    /// Wrap a single primary record.
    #[must_use]
    pub fn single(resource: Option<ResourceObject>) -> Self {
        Self {
            data: Data::Single(resource),
            included: Vec::new(),
            meta: None,
            links: None,
            warnings: Vec::new(),
        }
    }

    /// Wrap a primary collection.
    #[must_use]
    pub fn collection(resources: Vec<ResourceObject>) -> Self {
        Self {
            data: Data::Collection(resources),
            ..Self::single(None)
        }
    }

    /// Render as JSON.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_wire_shape() {
        let mut post = ResourceObject::new("post", Some("1".to_string()));
        post.attributes.insert("title".to_string(), json!("Rails is omakase"));
        post.relationships.insert(
            "author".to_string(),
            RelationshipObject {
                data: Some(RelationshipData::One(Some(ResourceIdentifier::new("person", "9")))),
                links: None,
            },
        );
        post.relationships.insert(
            "comments".to_string(),
            RelationshipObject {
                data: None,
                links: Some(Links {
                    related: Some("posts/1/comments".to_string()),
                    self_link: None,
                }),
            },
        );

        let doc = NormalizedDocument::single(Some(post));
        assert_eq!(
            doc.to_value(),
            json!({
                "data": {
                    "id": "1",
                    "type": "post",
                    "attributes": { "title": "Rails is omakase" },
                    "relationships": {
                        "author": { "data": { "id": "9", "type": "person" } },
                        "comments": { "links": { "related": "posts/1/comments" } }
                    }
                },
                "included": []
            })
        );
    }

    #[test]
    fn null_belongs_to_renders_null_data() {
        let object = RelationshipObject {
            data: Some(RelationshipData::One(None)),
            links: None,
        };
        assert_eq!(serde_json::to_value(object).expect("json"), json!({ "data": null }));
    }

    #[test]
    fn resources_iterates_primary_data() {
        let doc = NormalizedDocument::collection(vec![
            ResourceObject::new("post", Some("1".to_string())),
            ResourceObject::new("post", Some("2".to_string())),
        ]);
        let ids: Vec<_> = doc.data.resources().filter_map(|r| r.id.as_deref()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(NormalizedDocument::single(None).data.resources().count(), 0);
    }
}
