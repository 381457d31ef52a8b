//! Applying normalized documents to the store.
//!
//! Included records are applied before primary data so references in the
//! primary records resolve to already-populated handles. The whole document
//! is validated first: a rejected push leaves the store untouched.

use super::{RecordState, Store, StoreState, Tombstones};
use crate::identity::IdentityRegistry;
use crate::record::Record;
use crate::relationships::GraphContext;
use crate::schema::{RelationshipKind, Schema};
use crate::serializer::{NormalizedDocument, RelationshipData, ResourceIdentifier, ResourceObject};
use crate::{RecordHandle, RequestKind, TetherError};
use serde_json::Value;

impl Store {
    /// Apply a normalized document; returns the primary records.
    pub fn push(&self, document: &NormalizedDocument) -> Result<Vec<Record>, TetherError> {
        let handles = self.apply_document(document, None)?;
        handles.into_iter().map(|handle| self.record_for(handle)).collect()
    }

    /// Normalize a raw payload for `kind`, then push it.
    pub fn push_payload(
        &self,
        type_name: &str,
        payload: &Value,
        kind: RequestKind,
    ) -> Result<Vec<Record>, TetherError> {
        let document = self.normalize_response(type_name, payload, kind)?;
        self.push(&document)
    }

    /// Validate, then apply a document.
    ///
    /// With `since`, ids unloaded after that unload sequence are skipped
    /// instead of recreated.
    pub(crate) fn apply_document(
        &self,
        document: &NormalizedDocument,
        since: Option<u64>,
    ) -> Result<Vec<RecordHandle>, TetherError> {
        let schema = &self.inner.schema;
        for resource in document.included.iter().chain(document.data.resources()) {
            validate_resource(schema, resource)?;
        }

        let mut state = self.inner.state.borrow_mut();
        for resource in &document.included {
            apply_resource(schema, &mut state, resource, since)?;
        }
        let mut primary = Vec::new();
        for resource in document.data.resources() {
            if let Some(handle) = apply_resource(schema, &mut state, resource, since)? {
                primary.push(handle);
            }
        }
        Ok(primary)
    }
}

/// Check everything `apply_resource` could reject.
fn validate_resource(schema: &Schema, resource: &ResourceObject) -> Result<(), TetherError> {
    let type_def = schema.type_def(&resource.type_name)?;
    if resource.id.is_none() {
        return Err(TetherError::InvalidPayload(format!(
            "cannot push a '{}' record without an id",
            resource.type_name
        )));
    }
    if let Some(name) = resource
        .attributes
        .keys()
        .find(|name| type_def.attribute_named(name).is_none())
    {
        return Err(TetherError::UnknownAttribute {
            type_name: resource.type_name.clone(),
            key: name.clone(),
        });
    }

    for (name, object) in &resource.relationships {
        let def = schema.relationship(&resource.type_name, name)?;
        let Some(data) = &object.data else {
            continue;
        };
        let references = references(data);
        if def.kind == RelationshipKind::BelongsTo && references.len() > 1 {
            return Err(TetherError::InvalidPayload(format!(
                "belongsTo '{name}' on '{}' received a list",
                resource.type_name
            )));
        }
        for reference in references {
            schema.type_def(&reference.type_name)?;
            schema.inverse_on(&resource.type_name, &def, &reference.type_name)?;
        }
    }
    Ok(())
}

/// Upsert one resource: identity, canonical attributes, canonical links.
///
/// Returns `None` when the resource itself was unloaded during the fetch.
fn apply_resource(
    schema: &Schema,
    state: &mut StoreState,
    resource: &ResourceObject,
    since: Option<u64>,
) -> Result<Option<RecordHandle>, TetherError> {
    let id = resource.id.as_deref().unwrap_or_default();
    let StoreState {
        registry,
        graph,
        records,
        tombstones,
    } = state;
    if was_unloaded(registry, tombstones, &resource.type_name, id, since) {
        tracing::debug!(type_name = %resource.type_name, id, "skipping record unloaded during fetch");
        return Ok(None);
    }
    let handle = registry.get_or_create(&resource.type_name, Some(id));

    let record = records.entry(handle).or_insert_with(RecordState::default);
    for (name, value) in &resource.attributes {
        if record.local.get(name) == Some(value) {
            record.local.remove(name);
        }
        record.canonical.insert(name.clone(), value.clone());
    }
    record.is_loaded = true;
    record.is_new = false;

    // Resolve every referenced handle before the graph borrows the registry.
    let mut linkage = Vec::new();
    for (name, object) in &resource.relationships {
        let def = schema.relationship(&resource.type_name, name)?;
        if let Some(data) = &object.data {
            let mut handles = Vec::new();
            for reference in references(data) {
                if was_unloaded(registry, tombstones, &reference.type_name, &reference.id, since) {
                    tracing::debug!(
                        type_name = %reference.type_name,
                        id = %reference.id,
                        "dropping reference to record unloaded during fetch"
                    );
                    continue;
                }
                handles.push(resolve(registry, reference));
            }
            linkage.push((def.name.clone(), def.kind, handles));
        }
        if let Some(related) = object.links.as_ref().and_then(|links| links.related.clone()) {
            graph.set_link(handle, name, def.kind, Some(related));
        }
    }

    let cx = GraphContext::new(schema, registry);
    for (name, kind, handles) in linkage {
        match kind {
            RelationshipKind::BelongsTo => {
                graph.push_belongs_to(&cx, handle, &name, handles.first().copied())?;
            }
            RelationshipKind::HasMany => graph.push_has_many(&cx, handle, &name, &handles)?,
        }
    }
    Ok(Some(handle))
}

fn references(data: &RelationshipData) -> Vec<&ResourceIdentifier> {
    match data {
        RelationshipData::One(reference) => reference.iter().collect(),
        RelationshipData::Many(references) => references.iter().collect(),
    }
}

/// Whether `(type, id)` has no live handle because it was unloaded after `since`.
fn was_unloaded(
    registry: &IdentityRegistry,
    tombstones: &Tombstones,
    type_name: &str,
    id: &str,
    since: Option<u64>,
) -> bool {
    since.is_some_and(|since| {
        registry.lookup(type_name, id).is_none() && tombstones.unloaded_since(type_name, id, since)
    })
}

fn resolve(registry: &mut IdentityRegistry, reference: &ResourceIdentifier) -> RecordHandle {
    registry.get_or_create(&reference.type_name, Some(&reference.id))
}
