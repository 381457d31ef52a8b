//! `Snapshot` -> request payload.

use super::{KeyMethod, SerializePolicy, SerializerContext};
use crate::schema::{RelationshipDef, RelationshipKind, RelationshipType};
use crate::snapshot::{RelationshipSnapshot, Snapshot};
use crate::TetherError;
use serde_json::{Map, Value};

/// Options for one serialize call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Emit the id under the serializer's primary key.
    pub include_id: bool,
}

impl SerializeOptions {
    #[must_use]
    pub fn with_id() -> Self {
        Self { include_id: true }
    }
}

impl SerializerContext<'_> {
    /// Serialize a snapshot into a request body.
    pub fn serialize(
        &self,
        snapshot: &Snapshot,
        options: SerializeOptions,
    ) -> Result<Map<String, Value>, TetherError> {
        self.serialize_record(snapshot, options, None)
    }

    /// Whether a hasMany is emitted at all.
    ///
    /// An explicit `serialize` policy decides; otherwise only relationships
    /// whose inverse cannot carry the link (`ManyToNone`, `ManyToMany`) are
    /// emitted.
    pub fn should_serialize_has_many(
        &self,
        snapshot: &Snapshot,
        def: &RelationshipDef,
    ) -> Result<bool, TetherError> {
        let serializer = self.serializers.serializer_for(snapshot.type_name());
        match serializer.serialize_policy(&def.name) {
            Some(SerializePolicy::Never) => Ok(false),
            Some(SerializePolicy::Always | SerializePolicy::Ids | SerializePolicy::Records) => Ok(true),
            None => Ok(matches!(
                self.schema.relationship_type(snapshot.type_name(), &def.name)?,
                RelationshipType::ManyToNone | RelationshipType::ManyToMany
            )),
        }
    }

    /// `parent` is the `(type, relationship)` this record is embedded under.
    fn serialize_record(
        &self,
        snapshot: &Snapshot,
        options: SerializeOptions,
        parent: Option<(&str, &RelationshipDef)>,
    ) -> Result<Map<String, Value>, TetherError> {
        let type_def = self.schema.type_def(snapshot.type_name())?;
        let serializer = self.serializers.serializer_for(snapshot.type_name());
        let mut json = Map::new();

        if let Some(id) = snapshot.id().filter(|_| options.include_id) {
            json.insert(serializer.primary_key.clone(), Value::String(id.to_string()));
        }

        for attribute in &type_def.attributes {
            if serializer.serialize_policy(&attribute.name) == Some(SerializePolicy::Never) {
                continue;
            }
            let Some(value) = snapshot.attr(&attribute.name) else {
                continue;
            };
            let value = self
                .transforms
                .serialize(attribute.kind.as_deref(), value, &attribute.options)?;
            json.insert(
                serializer.attribute_key(&attribute.name, KeyMethod::Serialize),
                value,
            );
        }

        // The embedded record's link back to its parent is implied by nesting.
        let back_reference = match parent {
            Some((parent_type, parent_def)) => self
                .schema
                .inverse_on(parent_type, parent_def, snapshot.type_name())?
                .map(|inverse| inverse.key),
            None => None,
        };

        for relationship in &type_def.relationships {
            if back_reference.as_deref() == Some(relationship.name.as_str()) {
                continue;
            }
            let policy = serializer.serialize_policy(&relationship.name);
            if policy == Some(SerializePolicy::Never) {
                continue;
            }
            let Some(state) = snapshot.relationships.get(&relationship.name) else {
                continue;
            };
            let key =
                serializer.relationship_key(&relationship.name, relationship.kind, KeyMethod::Serialize);
            let embed = serializer.embeds_on_serialize(&relationship.name);

            match (relationship.kind, state) {
                (RelationshipKind::BelongsTo, RelationshipSnapshot::BelongsTo { value, .. }) => {
                    let serialized = if embed {
                        match snapshot.embedded.get(&relationship.name).and_then(|c| c.first()) {
                            Some(child) => Value::Object(self.serialize_record(
                                child,
                                SerializeOptions::with_id(),
                                Some((snapshot.type_name(), relationship)),
                            )?),
                            None => Value::Null,
                        }
                    } else {
                        value
                            .as_ref()
                            .and_then(|related| related.id.clone())
                            .map_or(Value::Null, Value::String)
                    };
                    json.insert(key, serialized);
                    let polymorphic_hook = serializer
                        .serialize_polymorphic_type
                        .as_ref()
                        .filter(|_| relationship.is_polymorphic);
                    if let Some(hook) = polymorphic_hook {
                        hook(snapshot, &mut json, relationship);
                    }
                }
                (RelationshipKind::HasMany, RelationshipSnapshot::HasMany { members, .. }) => {
                    if !self.should_serialize_has_many(snapshot, relationship)? {
                        continue;
                    }
                    if !state.has_data() && policy != Some(SerializePolicy::Always) {
                        continue;
                    }
                    let serialized = if embed {
                        let mut children = Vec::new();
                        for child in snapshot.embedded.get(&relationship.name).into_iter().flatten() {
                            children.push(Value::Object(self.serialize_record(
                                child,
                                SerializeOptions::with_id(),
                                Some((snapshot.type_name(), relationship)),
                            )?));
                        }
                        children
                    } else {
                        members
                            .iter()
                            .filter_map(|member| member.id.clone().map(Value::String))
                            .collect()
                    };
                    json.insert(key, Value::Array(serialized));
                }
                _ => {
                    return Err(TetherError::WrongKind {
                        type_name: snapshot.type_name().to_string(),
                        key: relationship.name.clone(),
                        expected: relationship.kind.as_str(),
                        actual: match relationship.kind {
                            RelationshipKind::BelongsTo => RelationshipKind::HasMany.as_str(),
                            RelationshipKind::HasMany => RelationshipKind::BelongsTo.as_str(),
                        },
                    });
                }
            }
        }
        Ok(json)
    }
}
