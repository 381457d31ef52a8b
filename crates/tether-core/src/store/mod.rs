//! # Store
//!
//! The single owner of all data-layer state: the identity registry, the
//! relationship graph and per-record attribute buffers.
//!
//! ## Threading Model
//!
//! `Store` is a cheap `Rc` handle. State lives behind one `RefCell` that is
//! borrowed for the duration of a synchronous operation only; no borrow is
//! ever held across an `.await`. Async operations re-read the state after
//! every suspension point and check liveness before applying results.
//!
//! ## Record Lifecycle
//!
//! ```text
//! create_record ──> new ──save──> loaded <──push── (remote)
//!                                   │
//!                  delete_record ──> deleted ──save──> unloaded
//! ```

mod adapter;
mod fetch;
mod push;

pub use adapter::{Adapter, AdapterFuture};

pub(crate) use fetch::FetchOutcome;

use fetch::{FetchKey, SharedFetch};

use crate::identity::{Identity, IdentityRegistry, UnloadObserver};
use crate::primitives::{DEFAULT_PRIMARY_KEY, MAX_EMBED_DEPTH};
use crate::record::Record;
use crate::relationships::{GraphContext, RelationshipGraph};
use crate::schema::{DefinitionSource, RelationshipDef, RelationshipKind, Schema};
use crate::serializer::{
    Data, ErrorMap, NormalizedDocument, SerializeOptions, SerializerContext, Serializers,
};
use crate::snapshot::{RelatedRef, RelationshipSnapshot, Snapshot};
use crate::transform::Transforms;
use crate::{LoadState, RecordHandle, RequestKind, TetherError};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Everything a store is constructed from.
pub struct StoreConfig {
    pub definitions: Schema,
    pub serializers: Serializers,
    pub transforms: Transforms,
    pub adapter: Rc<dyn Adapter>,
}

impl StoreConfig {
    /// Default serializers and an empty transform registry.
    pub fn new(definitions: impl DefinitionSource + 'static, adapter: impl Adapter + 'static) -> Self {
        Self {
            definitions: Schema::new(definitions),
            serializers: Serializers::default(),
            transforms: Transforms::new(),
            adapter: Rc::new(adapter),
        }
    }

    #[must_use]
    pub fn serializers(mut self, serializers: Serializers) -> Self {
        self.serializers = serializers;
        self
    }

    #[must_use]
    pub fn transforms(mut self, transforms: Transforms) -> Self {
        self.transforms = transforms;
        self
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Attribute buffers and lifecycle flags of one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RecordState {
    /// Last server-confirmed values.
    pub canonical: Map<String, Value>,
    /// Local edits not yet persisted.
    pub local: Map<String, Value>,
    pub is_loaded: bool,
    pub is_new: bool,
    pub is_deleted: bool,
}

impl RecordState {
    fn value(&self, name: &str) -> Option<&Value> {
        self.local.get(name).or_else(|| self.canonical.get(name))
    }
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub registry: IdentityRegistry,
    pub graph: RelationshipGraph,
    pub records: BTreeMap<RecordHandle, RecordState>,
    pub tombstones: Tombstones,
}

/// Ids unloaded while fetches were pending, stamped with an unload sequence.
///
/// A fetch notes the sequence when it starts; on resolution it must not
/// recreate a handle whose id was unloaded after that point. Cleared once
/// nothing is in flight.
#[derive(Debug, Default)]
pub(crate) struct Tombstones {
    seq: u64,
    entries: BTreeMap<(String, String), u64>,
}

impl Tombstones {
    /// Current sequence, captured when a fetch starts.
    pub fn mark(&self) -> u64 {
        self.seq
    }

    fn record(&mut self, type_name: &str, id: &str) {
        self.seq = self.seq.saturating_add(1);
        self.entries
            .insert((type_name.to_string(), id.to_string()), self.seq);
    }

    /// Whether `(type, id)` was unloaded after `since`.
    pub fn unloaded_since(&self, type_name: &str, id: &str, since: u64) -> bool {
        self.entries
            .get(&(type_name.to_string(), id.to_string()))
            .is_some_and(|stamp| *stamp > since)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Drops every trace of an unloaded handle.
struct Pruner<'a> {
    graph: &'a mut RelationshipGraph,
    records: &'a mut BTreeMap<RecordHandle, RecordState>,
}

impl UnloadObserver for Pruner<'_> {
    fn record_unloaded(&mut self, handle: RecordHandle) {
        self.records.remove(&handle);
        self.graph.record_unloaded(handle);
    }
}

pub(crate) struct StoreInner {
    schema: Schema,
    serializers: Serializers,
    transforms: Transforms,
    adapter: Rc<dyn Adapter>,
    state: RefCell<StoreState>,
    in_flight: RefCell<BTreeMap<FetchKey, SharedFetch>>,
    /// Load state of each relationship before its pending fetch began.
    pending_loads: RefCell<BTreeMap<(RecordHandle, String), LoadState>>,
}

// =============================================================================
// STORE
// =============================================================================

/// Shared handle to one data layer instance.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Store");
        if let Ok(state) = self.inner.state.try_borrow() {
            debug
                .field("records", &state.registry.len())
                .field("relationship_owners", &state.graph.owner_count());
        }
        debug.field("schema", &self.inner.schema).finish()
    }
}

impl Store {
    /// Create a store from its configuration.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                schema: config.definitions,
                serializers: config.serializers,
                transforms: config.transforms,
                adapter: config.adapter,
                state: RefCell::new(StoreState::default()),
                in_flight: RefCell::new(BTreeMap::new()),
                pending_loads: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    /// Whether two handles refer to the same store.
    #[must_use]
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Context for direct normalize/serialize calls.
    #[must_use]
    pub fn serializer_context(&self) -> SerializerContext<'_> {
        SerializerContext::new(
            &self.inner.schema,
            &self.inner.serializers,
            &self.inner.transforms,
        )
    }

    // ===== STATE ACCESS =====

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        f(&mut self.inner.state.borrow_mut())
    }

    /// Run a graph operation with a context built from the current registry.
    pub(crate) fn with_graph<R>(
        &self,
        f: impl FnOnce(&mut RelationshipGraph, &GraphContext<'_>) -> Result<R, TetherError>,
    ) -> Result<R, TetherError> {
        let mut state = self.inner.state.borrow_mut();
        let StoreState {
            registry, graph, ..
        } = &mut *state;
        let cx = GraphContext::new(&self.inner.schema, registry);
        f(graph, &cx)
    }

    fn with_record<R>(
        &self,
        handle: RecordHandle,
        f: impl FnOnce(&mut RecordState) -> R,
    ) -> Result<R, TetherError> {
        let mut state = self.inner.state.borrow_mut();
        if !state.registry.is_live(handle) {
            return Err(TetherError::RecordUnloaded(handle));
        }
        Ok(f(state.records.entry(handle).or_default()))
    }

    // ===== IDENTITY =====

    /// Identity of a live handle.
    #[must_use]
    pub fn identity(&self, handle: RecordHandle) -> Option<Identity> {
        self.inner.state.borrow().registry.identity(handle).cloned()
    }

    /// Live handle for `(type, id)`, loaded or not.
    #[must_use]
    pub fn lookup(&self, type_name: &str, id: &str) -> Option<RecordHandle> {
        self.inner.state.borrow().registry.lookup(type_name, id)
    }

    #[must_use]
    pub fn is_live(&self, handle: RecordHandle) -> bool {
        self.inner.state.borrow().registry.is_live(handle)
    }

    /// Whether a live handle has data: pushed by the server or created locally.
    #[must_use]
    pub fn is_loaded(&self, handle: RecordHandle) -> bool {
        let state = self.inner.state.borrow();
        state.registry.is_live(handle) && state.records.get(&handle).is_some_and(|r| r.is_loaded)
    }

    #[must_use]
    pub fn is_new(&self, handle: RecordHandle) -> bool {
        self.flag(handle, |record| record.is_new)
    }

    #[must_use]
    pub fn is_deleted(&self, handle: RecordHandle) -> bool {
        self.flag(handle, |record| record.is_deleted)
    }

    /// Local attribute edits, relationship edits, or an unsaved lifecycle change.
    #[must_use]
    pub fn is_dirty(&self, handle: RecordHandle) -> bool {
        let state = self.inner.state.borrow();
        let record_dirty = state
            .records
            .get(&handle)
            .is_some_and(|r| r.is_new || r.is_deleted || !r.local.is_empty());
        record_dirty || state.graph.is_dirty(handle)
    }

    fn flag(&self, handle: RecordHandle, read: impl FnOnce(&RecordState) -> bool) -> bool {
        self.inner.state.borrow().records.get(&handle).is_some_and(read)
    }

    /// Façade for a live handle.
    pub fn record_for(&self, handle: RecordHandle) -> Result<Record, TetherError> {
        let identity = self
            .identity(handle)
            .ok_or(TetherError::RecordUnloaded(handle))?;
        Ok(Record::new(self.clone(), handle, identity.type_name))
    }

    /// A loaded record by id, without fetching.
    #[must_use]
    pub fn peek_record(&self, type_name: &str, id: &str) -> Option<Record> {
        let handle = self.lookup(type_name, id)?;
        if !self.is_loaded(handle) {
            return None;
        }
        self.record_for(handle).ok()
    }

    /// Every loaded record of a type, in creation order.
    #[must_use]
    pub fn peek_all(&self, type_name: &str) -> Vec<Record> {
        let handles: Vec<RecordHandle> = {
            let state = self.inner.state.borrow();
            state
                .registry
                .handles_for(type_name)
                .filter(|handle| state.records.get(handle).is_some_and(|r| r.is_loaded))
                .collect()
        };
        handles
            .into_iter()
            .map(|handle| Record::new(self.clone(), handle, type_name))
            .collect()
    }

    /// Number of loaded records of a type.
    #[must_use]
    pub fn record_count(&self, type_name: &str) -> usize {
        let state = self.inner.state.borrow();
        state
            .registry
            .handles_for(type_name)
            .filter(|handle| state.records.get(handle).is_some_and(|r| r.is_loaded))
            .count()
    }

    // ===== CREATION =====

    /// Create a client-side record from attribute properties.
    ///
    /// An `id` property assigns the id up front; it must not already belong
    /// to a live record of the type.
    pub fn create_record(&self, type_name: &str, properties: Value) -> Result<Record, TetherError> {
        let type_def = self.inner.schema.type_def(type_name)?;
        let properties = match properties {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            _ => {
                return Err(TetherError::InvalidPayload(format!(
                    "properties for a new '{type_name}' must be an object"
                )));
            }
        };

        let mut id = None;
        let mut local = Map::new();
        for (name, value) in properties {
            if name == DEFAULT_PRIMARY_KEY {
                id = match value {
                    Value::String(id) => Some(id),
                    Value::Number(id) => Some(id.to_string()),
                    Value::Null => None,
                    _ => {
                        return Err(TetherError::InvalidPayload(format!(
                            "id of a new '{type_name}' must be a string or number"
                        )));
                    }
                };
                continue;
            }
            if type_def.attribute_named(&name).is_none() {
                return Err(TetherError::UnknownAttribute {
                    type_name: type_name.to_string(),
                    key: name,
                });
            }
            local.insert(name, value);
        }

        let handle = {
            let mut state = self.inner.state.borrow_mut();
            let taken = id
                .as_deref()
                .and_then(|id| state.registry.lookup(type_name, id));
            if let (Some(id), Some(owner)) = (&id, taken) {
                return Err(TetherError::IdentityConflict {
                    type_name: type_name.to_string(),
                    existing: format!("{id} (owned by {owner})"),
                    attempted: id.clone(),
                });
            }
            let handle = state.registry.get_or_create(type_name, id.as_deref());
            state.records.insert(
                handle,
                RecordState {
                    local,
                    is_loaded: true,
                    is_new: true,
                    ..RecordState::default()
                },
            );
            handle
        };
        tracing::debug!(handle = %handle, type_name, "created record");
        Ok(Record::new(self.clone(), handle, type_name))
    }

    // ===== ATTRIBUTES =====

    /// Effective value of an attribute: the local edit, else the canonical value.
    pub fn attr(&self, handle: RecordHandle, name: &str) -> Result<Option<Value>, TetherError> {
        self.check_attribute(handle, name)?;
        Ok(self
            .inner
            .state
            .borrow()
            .records
            .get(&handle)
            .and_then(|record| record.value(name))
            .cloned())
    }

    /// Set an attribute locally. Setting the canonical value clears the edit.
    pub fn set_attr(&self, handle: RecordHandle, name: &str, value: Value) -> Result<(), TetherError> {
        self.check_attribute(handle, name)?;
        self.with_record(handle, |record| {
            if record.canonical.get(name) == Some(&value) {
                record.local.remove(name);
            } else {
                record.local.insert(name.to_string(), value);
            }
        })
    }

    /// Locally edited attributes as `name -> [canonical, current]`.
    pub fn changed_attributes(&self, handle: RecordHandle) -> Result<Map<String, Value>, TetherError> {
        self.with_record(handle, |record| {
            record
                .local
                .iter()
                .map(|(name, current)| {
                    let canonical = record.canonical.get(name).cloned().unwrap_or(Value::Null);
                    (name.clone(), Value::Array(vec![canonical, current.clone()]))
                })
                .collect()
        })
    }

    fn check_attribute(&self, handle: RecordHandle, name: &str) -> Result<(), TetherError> {
        let identity = self
            .identity(handle)
            .ok_or(TetherError::RecordUnloaded(handle))?;
        let type_def = self.inner.schema.type_def(&identity.type_name)?;
        if type_def.attribute_named(name).is_none() {
            return Err(TetherError::UnknownAttribute {
                type_name: identity.type_name,
                key: name.to_string(),
            });
        }
        Ok(())
    }

    // ===== RELATIONSHIPS =====

    /// Resolve `owner.key` and check its kind.
    pub(crate) fn relationship_def(
        &self,
        owner: RecordHandle,
        key: &str,
        expected: RelationshipKind,
    ) -> Result<RelationshipDef, TetherError> {
        let identity = self
            .identity(owner)
            .ok_or(TetherError::RecordUnloaded(owner))?;
        let def = self.inner.schema.relationship(&identity.type_name, key)?;
        if def.kind != expected {
            return Err(TetherError::WrongKind {
                type_name: identity.type_name,
                key: key.to_string(),
                expected: expected.as_str(),
                actual: def.kind.as_str(),
            });
        }
        Ok(def)
    }

    /// `(current, has_data, related link)` of a belongsTo.
    pub(crate) fn belongs_to_parts(
        &self,
        owner: RecordHandle,
        key: &str,
    ) -> (Option<RecordHandle>, bool, Option<String>) {
        self.inner
            .state
            .borrow()
            .graph
            .belongs_to(owner, key)
            .map_or((None, false, None), |s| (s.current, s.has_data, s.link.clone()))
    }

    /// `(current members, has_data, related link)` of a hasMany.
    pub(crate) fn has_many_parts(
        &self,
        owner: RecordHandle,
        key: &str,
    ) -> (Vec<RecordHandle>, bool, Option<String>) {
        self.inner
            .state
            .borrow()
            .graph
            .has_many(owner, key)
            .map_or((Vec::new(), false, None), |s| {
                (s.members(), s.has_data, s.link.clone())
            })
    }

    /// Load state of one relationship; `NotLoaded` until first touched.
    #[must_use]
    pub fn load_state(&self, owner: RecordHandle, key: &str) -> LoadState {
        self.inner
            .state
            .borrow()
            .graph
            .load_state(owner, key)
            .unwrap_or_default()
    }

    /// Set a load state unless the owner was unloaded meanwhile.
    pub(crate) fn mark_load_state(
        &self,
        owner: RecordHandle,
        key: &str,
        kind: RelationshipKind,
        load_state: LoadState,
    ) {
        let mut state = self.inner.state.borrow_mut();
        if state.registry.is_live(owner) {
            state.graph.set_load_state(owner, key, kind, load_state);
        }
    }

    fn not_loaded(&self, owner: RecordHandle, key: &str) -> TetherError {
        TetherError::RelationshipNotLoaded {
            type_name: self
                .identity(owner)
                .map(|identity| identity.type_name)
                .unwrap_or_default(),
            key: key.to_string(),
        }
    }

    /// Synchronous belongsTo read.
    ///
    /// Fails with `RelationshipNotLoaded` when the related record is known
    /// but not loaded, or only reachable through a link.
    pub fn belongs_to(&self, owner: RecordHandle, key: &str) -> Result<Option<Record>, TetherError> {
        self.relationship_def(owner, key, RelationshipKind::BelongsTo)?;
        let (current, has_data, link) = self.belongs_to_parts(owner, key);
        match current {
            Some(related) if self.is_loaded(related) => self.record_for(related).map(Some),
            Some(_) => Err(self.not_loaded(owner, key)),
            None if link.is_some() && !has_data => Err(self.not_loaded(owner, key)),
            None => Ok(None),
        }
    }

    /// Synchronous hasMany read; every member must be loaded.
    pub fn has_many(&self, owner: RecordHandle, key: &str) -> Result<Vec<Record>, TetherError> {
        self.relationship_def(owner, key, RelationshipKind::HasMany)?;
        let (members, has_data, link) = self.has_many_parts(owner, key);
        if (link.is_some() && !has_data) || members.iter().any(|member| !self.is_loaded(*member)) {
            return Err(self.not_loaded(owner, key));
        }
        members
            .into_iter()
            .map(|member| self.record_for(member))
            .collect()
    }

    pub fn set_belongs_to(
        &self,
        owner: RecordHandle,
        key: &str,
        value: Option<RecordHandle>,
    ) -> Result<(), TetherError> {
        self.with_graph(|graph, cx| graph.set_belongs_to(cx, owner, key, value))
    }

    /// Add a member, at `index` or at the end.
    pub fn add_to_has_many(
        &self,
        owner: RecordHandle,
        key: &str,
        member: RecordHandle,
        index: Option<usize>,
    ) -> Result<(), TetherError> {
        self.with_graph(|graph, cx| graph.add_to_has_many(cx, owner, key, member, index))
    }

    pub fn remove_from_has_many(
        &self,
        owner: RecordHandle,
        key: &str,
        member: RecordHandle,
    ) -> Result<(), TetherError> {
        self.with_graph(|graph, cx| graph.remove_from_has_many(cx, owner, key, member))
    }

    pub fn reorder_has_many(
        &self,
        owner: RecordHandle,
        key: &str,
        order: &[RecordHandle],
    ) -> Result<(), TetherError> {
        self.with_graph(|graph, cx| graph.reorder_has_many(cx, owner, key, order))
    }

    pub fn set_has_many(
        &self,
        owner: RecordHandle,
        key: &str,
        members: &[RecordHandle],
    ) -> Result<(), TetherError> {
        self.with_graph(|graph, cx| graph.set_has_many(cx, owner, key, members))
    }

    // ===== SNAPSHOT / SERIALIZE =====

    /// Capture an immutable view of a record.
    pub fn snapshot(&self, handle: RecordHandle) -> Result<Snapshot, TetherError> {
        let state = self.inner.state.borrow();
        self.capture(&state, handle, 0)
    }

    fn capture(
        &self,
        state: &StoreState,
        handle: RecordHandle,
        depth: usize,
    ) -> Result<Snapshot, TetherError> {
        let identity = state
            .registry
            .identity(handle)
            .cloned()
            .ok_or(TetherError::RecordUnloaded(handle))?;
        let type_def = self.inner.schema.type_def(&identity.type_name)?;
        let serializer = self.inner.serializers.serializer_for(&identity.type_name);
        let record = state.records.get(&handle);
        let related = |handle: &RecordHandle| state.registry.identity(*handle).map(RelatedRef::from);

        let mut snapshot = Snapshot::new(identity);
        for attribute in &type_def.attributes {
            if let Some(value) = record.and_then(|r| r.value(&attribute.name)) {
                snapshot
                    .attributes
                    .insert(attribute.name.clone(), value.clone());
            }
        }

        for relationship in &type_def.relationships {
            let captured = match relationship.kind {
                RelationshipKind::BelongsTo => {
                    let s = state.graph.belongs_to(handle, &relationship.name);
                    RelationshipSnapshot::BelongsTo {
                        value: s.and_then(|s| s.current.as_ref()).and_then(related),
                        has_data: s.is_some_and(|s| s.has_data),
                    }
                }
                RelationshipKind::HasMany => match state.graph.has_many(handle, &relationship.name) {
                    Some(s) => RelationshipSnapshot::HasMany {
                        members: s.current.iter().filter_map(related).collect(),
                        has_data: s.has_data,
                        has_local_additions: s.has_local_additions,
                    },
                    None => RelationshipSnapshot::HasMany {
                        members: Vec::new(),
                        has_data: false,
                        has_local_additions: false,
                    },
                },
            };

            if depth < MAX_EMBED_DEPTH && serializer.embeds_on_serialize(&relationship.name) {
                let children: Vec<RecordHandle> = match &captured {
                    RelationshipSnapshot::BelongsTo { value, .. } => {
                        value.iter().map(|r| r.handle).collect()
                    }
                    RelationshipSnapshot::HasMany { members, .. } => {
                        members.iter().map(|r| r.handle).collect()
                    }
                };
                let mut nested = Vec::with_capacity(children.len());
                for child in children {
                    nested.push(self.capture(state, child, depth + 1)?);
                }
                snapshot.embedded.insert(relationship.name.clone(), nested);
            }
            snapshot
                .relationships
                .insert(relationship.name.clone(), captured);
        }
        Ok(snapshot)
    }

    /// Serialize a record's current state into a request body.
    pub fn serialize(
        &self,
        handle: RecordHandle,
        options: SerializeOptions,
    ) -> Result<Map<String, Value>, TetherError> {
        let snapshot = self.snapshot(handle)?;
        self.serializer_context().serialize(&snapshot, options)
    }

    /// Normalize one raw resource hash without applying it.
    pub fn normalize(&self, type_name: &str, raw: &Value) -> Result<NormalizedDocument, TetherError> {
        self.serializer_context().normalize(type_name, raw)
    }

    /// Normalize an adapter response without applying it.
    pub fn normalize_response(
        &self,
        type_name: &str,
        payload: &Value,
        kind: RequestKind,
    ) -> Result<NormalizedDocument, TetherError> {
        self.serializer_context()
            .normalize_response(type_name, payload, kind)
    }

    /// Map an invalid-response payload to local member names.
    pub fn extract_errors(&self, type_name: &str, payload: &Value) -> Result<ErrorMap, TetherError> {
        self.serializer_context().extract_errors(type_name, payload)
    }

    // ===== LIFECYCLE =====

    /// Mark a record deleted locally; `save_record` persists the deletion.
    pub fn delete_record(&self, handle: RecordHandle) -> Result<(), TetherError> {
        self.with_record(handle, |record| record.is_deleted = true)
    }

    /// Persist a record: create, update or delete depending on its state.
    ///
    /// A successful create assigns the returned id. Attribute values sent in
    /// the request and every current relationship value become canonical.
    pub async fn save_record(&self, handle: RecordHandle) -> Result<(), TetherError> {
        let identity = self
            .identity(handle)
            .ok_or(TetherError::RecordUnloaded(handle))?;
        let (is_new, is_deleted) = self
            .inner
            .state
            .borrow()
            .records
            .get(&handle)
            .map_or((false, false), |r| (r.is_new, r.is_deleted));
        if is_deleted {
            return self.persist_delete(identity, is_new).await;
        }

        let snapshot = self.snapshot(handle)?;
        let body = self
            .serializer_context()
            .serialize(&snapshot, SerializeOptions::with_id())?;
        let (kind, request) = if is_new {
            let request = self.inner.adapter.create_record(&identity.type_name, body);
            (RequestKind::CreateRecord, request)
        } else {
            let id = identity.id.as_deref().ok_or_else(|| {
                TetherError::InvalidPayload(format!("cannot update client-only record {handle}"))
            })?;
            let request = self
                .inner
                .adapter
                .update_record(&identity.type_name, id, body);
            (RequestKind::UpdateRecord, request)
        };
        tracing::debug!(handle = %handle, type_name = %identity.type_name, ?kind, "saving record");

        let payload = request.await?;
        if !self.is_live(handle) {
            tracing::warn!(handle = %handle, "discarding save response for unloaded record");
            return Ok(());
        }
        let document = self.normalize_response(&identity.type_name, &payload, kind)?;
        self.commit_saved(handle, &snapshot, &document)?;
        self.apply_document(&document, None)?;
        Ok(())
    }

    /// Fold a successful save into canonical state.
    fn commit_saved(
        &self,
        handle: RecordHandle,
        sent: &Snapshot,
        document: &NormalizedDocument,
    ) -> Result<(), TetherError> {
        let returned_id = match &document.data {
            Data::Single(Some(resource)) => resource.id.clone(),
            _ => None,
        };
        let mut state = self.inner.state.borrow_mut();
        let StoreState {
            registry,
            graph,
            records,
            ..
        } = &mut *state;

        if let Some(id) = &returned_id {
            registry.assign_id(handle, id)?;
        }
        if registry.identity(handle).and_then(|i| i.id.as_ref()).is_none() {
            return Err(TetherError::InvalidPayload(format!(
                "save response did not assign an id to {handle}"
            )));
        }

        if let Some(record) = records.get_mut(&handle) {
            for (name, value) in &sent.attributes {
                if record.local.get(name) == Some(value) {
                    record.local.remove(name);
                }
                record.canonical.insert(name.clone(), value.clone());
            }
            record.is_new = false;
            record.is_loaded = true;
        }
        graph.commit(&GraphContext::new(&self.inner.schema, registry), handle)
    }

    async fn persist_delete(&self, identity: Identity, is_new: bool) -> Result<(), TetherError> {
        let handle = identity.handle;
        if let (false, Some(id)) = (is_new, identity.id.as_deref()) {
            tracing::debug!(handle = %handle, type_name = %identity.type_name, "deleting record");
            let payload = self
                .inner
                .adapter
                .delete_record(&identity.type_name, id)
                .await?;
            if !self.is_live(handle) {
                return Ok(());
            }
            let document =
                self.normalize_response(&identity.type_name, &payload, RequestKind::DeleteRecord)?;
            self.apply_document(&document, None)?;
        }
        self.unload_record(handle)
    }

    /// Drop a record and every reference to it.
    ///
    /// In-flight fetches guarded by the handle resolve to nothing; a later
    /// reference to the same id gets a fresh handle.
    pub fn unload_record(&self, handle: RecordHandle) -> Result<(), TetherError> {
        let mut state = self.inner.state.borrow_mut();
        let StoreState {
            registry,
            graph,
            records,
            tombstones,
        } = &mut *state;
        let identity = registry.unload(handle, &mut Pruner { graph, records })?;
        if let Some(id) = identity.id.as_deref().filter(|_| self.in_flight_count() > 0) {
            tombstones.record(&identity.type_name, id);
        }
        tracing::debug!(handle = %handle, type_name = %identity.type_name, "unloaded record");
        Ok(())
    }

    /// Discard local attribute and relationship edits and any pending deletion.
    pub fn rollback(&self, handle: RecordHandle) -> Result<(), TetherError> {
        self.with_record(handle, |record| {
            record.local.clear();
            record.is_deleted = false;
        })?;
        self.with_graph(|graph, cx| graph.rollback(cx, handle))
    }
}

// =============================================================================
// TESTS
// =============================================================================
