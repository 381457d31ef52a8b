//! # Record Façade
//!
//! A `Record` is a store plus a handle. It holds no data itself: every read
//! goes through the store, so two façades for the same handle always agree.

use crate::serializer::SerializeOptions;
use crate::snapshot::Snapshot;
use crate::store::Store;
use crate::{LoadState, RecordHandle, TetherError};
use serde_json::{Map, Value};
use std::fmt;
use std::rc::Rc;

/// User-facing view of one entity.
#[derive(Clone)]
pub struct Record {
    store: Store,
    handle: RecordHandle,
    type_name: Rc<str>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type_name", &self.type_name)
            .field("handle", &self.handle)
            .field("id", &self.id())
            .finish()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.store.ptr_eq(&other.store)
    }
}

impl Eq for Record {}

impl Record {
    pub(crate) fn new(store: Store, handle: RecordHandle, type_name: impl Into<Rc<str>>) -> Self {
        Self {
            store,
            handle,
            type_name: type_name.into(),
        }
    }

    // ===== IDENTITY =====

    #[must_use]
    pub fn handle(&self) -> RecordHandle {
        self.handle
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Server id; `None` until persisted or after unload.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.store.identity(self.handle).and_then(|identity| identity.id)
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    // ===== STATE FLAGS =====

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.store.is_new(self.handle)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty(self.handle)
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.store.is_deleted(self.handle)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.store.is_loaded(self.handle)
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.store.is_live(self.handle)
    }

    // ===== ATTRIBUTES =====

    pub fn attr(&self, name: &str) -> Result<Option<Value>, TetherError> {
        self.store.attr(self.handle, name)
    }

    pub fn set_attr(&self, name: &str, value: Value) -> Result<(), TetherError> {
        self.store.set_attr(self.handle, name, value)
    }

    /// Locally edited attributes as `name -> [canonical, current]`.
    pub fn changed_attributes(&self) -> Result<Map<String, Value>, TetherError> {
        self.store.changed_attributes(self.handle)
    }

    // ===== BELONGS TO =====

    /// Synchronous read; errors if the related record is not loaded.
    pub fn belongs_to(&self, key: &str) -> Result<Option<Record>, TetherError> {
        self.store.belongs_to(self.handle, key)
    }

    /// Read, fetching through the adapter when async and unloaded.
    pub async fn belongs_to_async(&self, key: &str) -> Result<Option<Record>, TetherError> {
        self.store.belongs_to_async(self.handle, key).await
    }

    pub async fn reload_belongs_to(&self, key: &str) -> Result<Option<Record>, TetherError> {
        self.store.reload_belongs_to(self.handle, key).await
    }

    pub fn set_belongs_to(&self, key: &str, value: Option<&Record>) -> Result<(), TetherError> {
        self.store
            .set_belongs_to(self.handle, key, value.map(Record::handle))
    }

    // ===== HAS MANY =====

    /// Synchronous read; errors if any member is not loaded.
    pub fn has_many(&self, key: &str) -> Result<Vec<Record>, TetherError> {
        self.store.has_many(self.handle, key)
    }

    pub async fn has_many_async(&self, key: &str) -> Result<Vec<Record>, TetherError> {
        self.store.has_many_async(self.handle, key).await
    }

    pub fn add_to_has_many(&self, key: &str, member: &Record) -> Result<(), TetherError> {
        self.store
            .add_to_has_many(self.handle, key, member.handle, None)
    }

    /// Insert at `index`; past the end appends.
    pub fn insert_into_has_many(
        &self,
        key: &str,
        index: usize,
        member: &Record,
    ) -> Result<(), TetherError> {
        self.store
            .add_to_has_many(self.handle, key, member.handle, Some(index))
    }

    pub fn remove_from_has_many(&self, key: &str, member: &Record) -> Result<(), TetherError> {
        self.store
            .remove_from_has_many(self.handle, key, member.handle)
    }

    pub fn reorder_has_many(&self, key: &str, order: &[Record]) -> Result<(), TetherError> {
        let order: Vec<RecordHandle> = order.iter().map(Record::handle).collect();
        self.store.reorder_has_many(self.handle, key, &order)
    }

    pub fn set_has_many(&self, key: &str, members: &[Record]) -> Result<(), TetherError> {
        let members: Vec<RecordHandle> = members.iter().map(Record::handle).collect();
        self.store.set_has_many(self.handle, key, &members)
    }

    #[must_use]
    pub fn load_state(&self, key: &str) -> LoadState {
        self.store.load_state(self.handle, key)
    }

    // ===== SERIALIZATION =====

    pub fn snapshot(&self) -> Result<Snapshot, TetherError> {
        self.store.snapshot(self.handle)
    }

    pub fn serialize(&self, options: SerializeOptions) -> Result<Map<String, Value>, TetherError> {
        self.store.serialize(self.handle, options)
    }

    // ===== LIFECYCLE =====

    pub async fn save(&self) -> Result<(), TetherError> {
        self.store.save_record(self.handle).await
    }

    /// Mark deleted locally; `save` persists it.
    pub fn delete(&self) -> Result<(), TetherError> {
        self.store.delete_record(self.handle)
    }

    /// Delete and persist in one step.
    pub async fn destroy(&self) -> Result<(), TetherError> {
        self.delete()?;
        self.save().await
    }

    pub async fn reload(&self) -> Result<Record, TetherError> {
        self.store.reload_record(self.handle).await
    }

    pub fn unload(&self) -> Result<(), TetherError> {
        self.store.unload_record(self.handle)
    }

    pub fn rollback(&self) -> Result<(), TetherError> {
        self.store.rollback(self.handle)
    }
}
