//! # Snapshots
//!
//! An immutable, owned view of one record taken at a single point in time.
//! Serialization only ever reads snapshots, so it cannot observe a record
//! that changes halfway through.

use crate::identity::Identity;
use crate::RecordHandle;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A related record as seen from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedRef {
    pub handle: RecordHandle,
    pub type_name: String,
    pub id: Option<String>,
}

impl From<&Identity> for RelatedRef {
    fn from(identity: &Identity) -> Self {
        Self {
            handle: identity.handle,
            type_name: identity.type_name.clone(),
            id: identity.id.clone(),
        }
    }
}

/// Current value of one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipSnapshot {
    BelongsTo {
        value: Option<RelatedRef>,
        has_data: bool,
    },
    HasMany {
        members: Vec<RelatedRef>,
        has_data: bool,
        has_local_additions: bool,
    },
}

impl RelationshipSnapshot {
    /// Whether the relationship was ever populated.
    #[must_use]
    pub fn has_data(&self) -> bool {
        match self {
            Self::BelongsTo { has_data, .. } => *has_data,
            Self::HasMany {
                has_data,
                has_local_additions,
                ..
            } => *has_data || *has_local_additions,
        }
    }
}

/// Immutable record view consumed by the serializer.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub identity: Identity,
    /// Effective attribute values; unset attributes are absent.
    pub attributes: Map<String, Value>,
    /// Every declared relationship, keyed by local name.
    pub relationships: BTreeMap<String, RelationshipSnapshot>,
    /// Nested snapshots for relationships embedded on serialize.
    pub embedded: BTreeMap<String, Vec<Snapshot>>,
}

impl Snapshot {
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            attributes: Map::new(),
            relationships: BTreeMap::new(),
            embedded: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_belongs_to(mut self, name: impl Into<String>, value: Option<RelatedRef>) -> Self {
        self.relationships.insert(
            name.into(),
            RelationshipSnapshot::BelongsTo {
                value,
                has_data: true,
            },
        );
        self
    }

    #[must_use]
    pub fn with_has_many(mut self, name: impl Into<String>, members: Vec<RelatedRef>) -> Self {
        self.relationships.insert(
            name.into(),
            RelationshipSnapshot::HasMany {
                members,
                has_data: true,
                has_local_additions: false,
            },
        );
        self
    }

    #[must_use]
    pub fn with_embedded(mut self, name: impl Into<String>, children: Vec<Snapshot>) -> Self {
        self.embedded.insert(name.into(), children);
        self
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.identity.type_name
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.identity.id.as_deref()
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Related record of a belongsTo, if set.
    #[must_use]
    pub fn belongs_to(&self, name: &str) -> Option<&RelatedRef> {
        match self.relationships.get(name)? {
            RelationshipSnapshot::BelongsTo { value, .. } => value.as_ref(),
            RelationshipSnapshot::HasMany { .. } => None,
        }
    }

    /// Members of a hasMany, if tracked.
    #[must_use]
    pub fn has_many(&self, name: &str) -> Option<&[RelatedRef]> {
        match self.relationships.get(name)? {
            RelationshipSnapshot::HasMany { members, .. } => Some(members),
            RelationshipSnapshot::BelongsTo { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(type_name: &str, id: Option<&str>, handle: u64) -> Identity {
        Identity {
            type_name: type_name.to_string(),
            id: id.map(str::to_string),
            handle: RecordHandle(handle),
        }
    }

    #[test]
    fn accessors_read_back_builders() {
        let post = identity("post", Some("1"), 0);
        let snapshot = Snapshot::new(identity("comment", None, 1))
            .with_attr("body", json!("hi"))
            .with_belongs_to("post", Some(RelatedRef::from(&post)));

        assert_eq!(snapshot.type_name(), "comment");
        assert_eq!(snapshot.id(), None);
        assert_eq!(snapshot.attr("body"), Some(&json!("hi")));
        assert_eq!(snapshot.belongs_to("post").and_then(|r| r.id.as_deref()), Some("1"));
        assert!(snapshot.has_many("post").is_none());
    }

    #[test]
    fn local_additions_count_as_data() {
        let state = RelationshipSnapshot::HasMany {
            members: Vec::new(),
            has_data: false,
            has_local_additions: true,
        };
        assert!(state.has_data());
    }
}
