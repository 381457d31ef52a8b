//! # Identity Registry
//!
//! Maps `(type, id)` and `(type, client id)` to the canonical `RecordHandle`.
//!
//! At most one live handle exists per `(type, id)`. Handles without an id
//! are client-only until `assign_id` confirms persistence; after that the
//! id is immutable for the handle's lifetime.

use crate::{RecordHandle, TetherError};
use std::collections::BTreeMap;

// =============================================================================
// IDENTITY
// =============================================================================

/// The stable identity of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub type_name: String,
    /// Server id; `None` while the record is client-only.
    pub id: Option<String>,
    /// The handle, which is also the client id.
    pub handle: RecordHandle,
}

/// Receives synchronous notification when a handle is unloaded.
///
/// Called before `IdentityRegistry::unload` returns so no reader can observe
/// a reference to a handle that the registry no longer knows.
pub trait UnloadObserver {
    fn record_unloaded(&mut self, handle: RecordHandle);
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Index of every live handle.
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    /// Handle -> identity
    records: BTreeMap<RecordHandle, Identity>,

    /// (type, id) -> handle
    by_id: BTreeMap<(String, String), RecordHandle>,

    /// Next client id to hand out. Never reused.
    next_handle: u64,
}

impl IdentityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `(type, id)`, creating it if needed.
    ///
    /// With `id = None` a fresh client-only handle is always created.
    pub fn get_or_create(&mut self, type_name: &str, id: Option<&str>) -> RecordHandle {
        if let Some(existing) = id.and_then(|id| self.lookup(type_name, id)) {
            return existing;
        }

        let handle = RecordHandle(self.next_handle);
        self.next_handle = self.next_handle.saturating_add(1);

        let identity = Identity {
            type_name: type_name.to_string(),
            id: id.map(str::to_string),
            handle,
        };
        if let Some(id) = id {
            self.by_id
                .insert((type_name.to_string(), id.to_string()), handle);
        }
        self.records.insert(handle, identity);
        handle
    }

    /// Lookup a live handle by `(type, id)`.
    #[must_use]
    pub fn lookup(&self, type_name: &str, id: &str) -> Option<RecordHandle> {
        self.by_id
            .get(&(type_name.to_string(), id.to_string()))
            .copied()
    }

    /// Lookup a live handle by `(type, client id)`.
    #[must_use]
    pub fn lookup_client(&self, type_name: &str, handle: RecordHandle) -> Option<RecordHandle> {
        self.records
            .get(&handle)
            .filter(|identity| identity.type_name == type_name)
            .map(|identity| identity.handle)
    }

    /// Get the identity of a live handle.
    #[must_use]
    pub fn identity(&self, handle: RecordHandle) -> Option<&Identity> {
        self.records.get(&handle)
    }

    /// Check whether a handle is still registered.
    #[must_use]
    pub fn is_live(&self, handle: RecordHandle) -> bool {
        self.records.contains_key(&handle)
    }

    /// Assign the server id to a handle.
    ///
    /// Re-assigning the same id is a no-op. A different id, or an id already
    /// owned by another handle of the same type, is an `IdentityConflict`.
    pub fn assign_id(&mut self, handle: RecordHandle, id: &str) -> Result<(), TetherError> {
        let identity = self
            .records
            .get(&handle)
            .ok_or(TetherError::RecordUnloaded(handle))?;

        if let Some(existing) = &identity.id {
            if existing == id {
                return Ok(());
            }
            return Err(TetherError::IdentityConflict {
                type_name: identity.type_name.clone(),
                existing: existing.clone(),
                attempted: id.to_string(),
            });
        }

        let key = (identity.type_name.clone(), id.to_string());
        if let Some(&owner) = self.by_id.get(&key).filter(|owner| **owner != handle) {
            return Err(TetherError::IdentityConflict {
                type_name: identity.type_name.clone(),
                existing: format!("{id} (owned by {owner})"),
                attempted: id.to_string(),
            });
        }

        self.by_id.insert(key, handle);
        if let Some(identity) = self.records.get_mut(&handle) {
            identity.id = Some(id.to_string());
        }
        Ok(())
    }

    /// Remove a handle from every index and notify the observer.
    pub fn unload(
        &mut self,
        handle: RecordHandle,
        observer: &mut impl UnloadObserver,
    ) -> Result<Identity, TetherError> {
        let identity = self
            .records
            .remove(&handle)
            .ok_or(TetherError::RecordUnloaded(handle))?;
        if let Some(id) = &identity.id {
            self.by_id.remove(&(identity.type_name.clone(), id.clone()));
        }
        observer.record_unloaded(handle);
        Ok(identity)
    }

    /// All live handles of a type, in creation order.
    pub fn handles_for<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = RecordHandle> + 'a {
        self.records
            .values()
            .filter(move |identity| identity.type_name == type_name)
            .map(|identity| identity.handle)
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry holds no handles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
