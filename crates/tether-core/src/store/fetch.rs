//! In-flight fetch coalescing and the async read paths.
//!
//! Every remote read goes through `Store::fetch`. A second request for the
//! same `FetchKey` while the first is pending joins the existing shared
//! future instead of reaching the adapter again. On completion the future
//! removes itself from the in-flight map, checks that its guard handle is
//! still live, and only then normalizes and applies the payload. Ids
//! unloaded while it was pending are not recreated by the payload.

use super::adapter::{Adapter, AdapterFuture};
use super::Store;
use crate::record::Record;
use crate::record_array::RecordArray;
use crate::schema::RelationshipKind;
use crate::{LoadState, RecordHandle, RequestKind, TetherError};
use futures::future::{FutureExt, LocalBoxFuture, Shared, join_all};
use serde_json::Value;
use std::rc::Rc;

/// Identity of a remote read for coalescing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum FetchKey {
    Record(RecordHandle),
    All(String),
    /// Type and canonical query JSON.
    Query(String, String),
    Link(RecordHandle, String),
}

/// What a completed fetch did.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FetchOutcome {
    Applied {
        handles: Vec<RecordHandle>,
        meta: Option<Value>,
        links: Option<Value>,
    },
    /// The guard handle was unloaded while the request was pending.
    Discarded,
}

pub(crate) type SharedFetch = Shared<LocalBoxFuture<'static, Result<FetchOutcome, TetherError>>>;

/// A pending request and how to interpret its response.
pub(crate) struct FetchPlan {
    pub key: FetchKey,
    pub type_name: String,
    pub kind: RequestKind,
    /// Results are discarded when this handle is no longer live.
    pub guard: Option<RecordHandle>,
}

impl Store {
    /// Start a fetch, or join the one already in flight for the same key.
    pub(crate) fn fetch(
        &self,
        plan: FetchPlan,
        request: impl FnOnce(&dyn Adapter) -> AdapterFuture,
    ) -> SharedFetch {
        if let Some(existing) = self.inner.in_flight.borrow().get(&plan.key) {
            tracing::debug!(key = ?plan.key, "joining in-flight fetch");
            return existing.clone();
        }

        let pending = request(self.inner.adapter.as_ref());
        let weak = Rc::downgrade(&self.inner);
        let since = self.inner.state.borrow().tombstones.mark();
        let key = plan.key.clone();

        let future = async move {
            let result = pending.await;
            let Some(inner) = weak.upgrade() else {
                return Ok::<_, TetherError>(FetchOutcome::Discarded);
            };
            let store = Store { inner };
            store.inner.in_flight.borrow_mut().remove(&plan.key);
            let outcome = store.resolve(&plan, result, since);
            if store.in_flight_count() == 0 {
                store.with_state(|state| state.tombstones.clear());
            }
            outcome
        }
        .boxed_local()
        .shared();

        self.inner
            .in_flight
            .borrow_mut()
            .insert(key, future.clone());
        future
    }

    fn resolve(
        &self,
        plan: &FetchPlan,
        result: Result<Value, TetherError>,
        since: u64,
    ) -> Result<FetchOutcome, TetherError> {
        let payload = result?;
        if let Some(guard) = plan.guard.filter(|handle| !self.is_live(*handle)) {
            tracing::warn!(
                handle = %guard,
                key = ?plan.key,
                "discarding fetch result for unloaded record"
            );
            return Ok(FetchOutcome::Discarded);
        }

        let document = self.normalize_response(&plan.type_name, &payload, plan.kind)?;
        let handles = self.apply_document(&document, Some(since))?;
        Ok(FetchOutcome::Applied {
            handles,
            meta: document.meta,
            links: document.links,
        })
    }

    /// Number of fetches currently pending.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.borrow().len()
    }

    /// Coalesced fetch of one record by handle.
    pub(crate) fn fetch_record(&self, handle: RecordHandle) -> Result<SharedFetch, TetherError> {
        let identity = self
            .identity(handle)
            .ok_or(TetherError::RecordUnloaded(handle))?;
        let id = identity.id.ok_or_else(|| {
            TetherError::InvalidPayload(format!(
                "cannot fetch client-only record {handle} of type '{}'",
                identity.type_name
            ))
        })?;
        let plan = FetchPlan {
            key: FetchKey::Record(handle),
            type_name: identity.type_name.clone(),
            kind: RequestKind::FindRecord,
            guard: Some(handle),
        };
        Ok(self.fetch(plan, |adapter| adapter.find_record(&identity.type_name, &id)))
    }

    /// Find a record by id, fetching it only when it is not loaded.
    pub async fn find_record(&self, type_name: &str, id: &str) -> Result<Record, TetherError> {
        self.inner.schema.type_def(type_name)?;
        if let Some(record) = self.peek_record(type_name, id) {
            return Ok(record);
        }
        let handle = self.with_state(|state| state.registry.get_or_create(type_name, Some(id)));
        self.reload_record(handle).await
    }

    /// Fetch a record regardless of whether it is loaded.
    pub async fn reload_record(&self, handle: RecordHandle) -> Result<Record, TetherError> {
        let outcome = self.fetch_record(handle)?.await?;
        match outcome {
            FetchOutcome::Applied { .. } if self.is_loaded(handle) => self.record_for(handle),
            FetchOutcome::Applied { .. } => Err(TetherError::InvalidPayload(format!(
                "findRecord response did not contain record {handle}"
            ))),
            FetchOutcome::Discarded => Err(TetherError::RecordUnloaded(handle)),
        }
    }

    /// Fetch every record of a type.
    pub async fn find_all(&self, type_name: &str) -> Result<RecordArray, TetherError> {
        self.inner.schema.type_def(type_name)?;
        let array = RecordArray::new(self.clone(), type_name, None);
        array.update().await?;
        Ok(array)
    }

    /// Run a query; the result is an immutable adapter-populated array.
    pub async fn query(&self, type_name: &str, query: Value) -> Result<RecordArray, TetherError> {
        self.inner.schema.type_def(type_name)?;
        let array = RecordArray::new(self.clone(), type_name, Some(query));
        array.update().await?;
        Ok(array)
    }

    /// Coalesced collection fetch backing `RecordArray::update`.
    pub(crate) fn fetch_collection(&self, type_name: &str, query: Option<&Value>) -> SharedFetch {
        match query {
            None => {
                let plan = FetchPlan {
                    key: FetchKey::All(type_name.to_string()),
                    type_name: type_name.to_string(),
                    kind: RequestKind::FindAll,
                    guard: None,
                };
                self.fetch(plan, |adapter| adapter.find_all(type_name))
            }
            Some(query) => {
                let plan = FetchPlan {
                    key: FetchKey::Query(type_name.to_string(), canonical_json(query)),
                    type_name: type_name.to_string(),
                    kind: RequestKind::Query,
                    guard: None,
                };
                self.fetch(plan, |adapter| adapter.query(type_name, query))
            }
        }
    }

    // ===== ASYNC RELATIONSHIPS =====

    /// Resolve a belongsTo, fetching when it is async and not yet loaded.
    ///
    /// Resolved values are cached: later reads return without fetching.
    pub async fn belongs_to_async(
        &self,
        owner: RecordHandle,
        key: &str,
    ) -> Result<Option<Record>, TetherError> {
        let def = self.relationship_def(owner, key, RelationshipKind::BelongsTo)?;
        if !def.is_async {
            return self.belongs_to(owner, key);
        }
        let (current, has_data, link) = self.belongs_to_parts(owner, key);
        match current {
            Some(related) if self.is_loaded(related) => self.record_for(related).map(Some),
            Some(related) => {
                let fetch = self.fetch_record(related)?;
                self.await_relationship(owner, key, RelationshipKind::BelongsTo, fetch)
                    .await?;
                self.belongs_to_loaded(owner, key)
            }
            None => match link {
                Some(link) if !has_data => {
                    self.fetch_belongs_to_link(owner, key, &def.target_type, &link)
                        .await
                }
                _ => Ok(None),
            },
        }
    }

    /// Fetch a belongsTo again even if it is loaded.
    pub async fn reload_belongs_to(
        &self,
        owner: RecordHandle,
        key: &str,
    ) -> Result<Option<Record>, TetherError> {
        let def = self.relationship_def(owner, key, RelationshipKind::BelongsTo)?;
        let (current, _, link) = self.belongs_to_parts(owner, key);
        if let Some(link) = link {
            return self.fetch_belongs_to_link(owner, key, &def.target_type, &link).await;
        }
        match current {
            Some(related) => {
                let fetch = self.fetch_record(related)?;
                self.await_relationship(owner, key, RelationshipKind::BelongsTo, fetch)
                    .await?;
                self.belongs_to_loaded(owner, key)
            }
            None => Ok(None),
        }
    }

    async fn fetch_belongs_to_link(
        &self,
        owner: RecordHandle,
        key: &str,
        target_type: &str,
        link: &str,
    ) -> Result<Option<Record>, TetherError> {
        let plan = FetchPlan {
            key: FetchKey::Link(owner, key.to_string()),
            type_name: target_type.to_string(),
            kind: RequestKind::FindBelongsTo,
            guard: Some(owner),
        };
        let fetch = self.fetch(plan, |adapter| adapter.find_belongs_to(link));
        let outcome = self
            .await_relationship(owner, key, RelationshipKind::BelongsTo, fetch)
            .await?;
        if let FetchOutcome::Applied { handles, .. } = outcome {
            self.with_graph(|graph, cx| graph.push_belongs_to(cx, owner, key, handles.first().copied()))?;
        }
        self.belongs_to_loaded(owner, key)
    }

    /// Resolve a hasMany, fetching missing members or the related link.
    pub async fn has_many_async(
        &self,
        owner: RecordHandle,
        key: &str,
    ) -> Result<Vec<Record>, TetherError> {
        let def = self.relationship_def(owner, key, RelationshipKind::HasMany)?;
        if !def.is_async {
            return self.has_many(owner, key);
        }
        let (members, has_data, link) = self.has_many_parts(owner, key);

        if let (Some(link), false) = (&link, has_data) {
            let plan = FetchPlan {
                key: FetchKey::Link(owner, key.to_string()),
                type_name: def.target_type.clone(),
                kind: RequestKind::FindHasMany,
                guard: Some(owner),
            };
            let fetch = self.fetch(plan, |adapter| adapter.find_has_many(link));
            let outcome = self
                .await_relationship(owner, key, RelationshipKind::HasMany, fetch)
                .await?;
            if let FetchOutcome::Applied { handles, .. } = outcome {
                self.with_graph(|graph, cx| graph.push_has_many(cx, owner, key, &handles))?;
            }
            return self.has_many_loaded(owner, key);
        }

        let missing: Vec<RecordHandle> = members
            .into_iter()
            .filter(|member| !self.is_loaded(*member))
            .collect();
        if missing.is_empty() {
            return self.has_many_loaded(owner, key);
        }
        let mut fetches = Vec::with_capacity(missing.len());
        for member in missing {
            fetches.push(self.fetch_record(member)?);
        }
        let all = async {
            for result in join_all(fetches).await {
                result?;
            }
            Ok::<_, TetherError>(())
        };
        self.await_relationship(owner, key, RelationshipKind::HasMany, all)
            .await?;
        self.has_many_loaded(owner, key)
    }

    /// Await a relationship fetch, tracking the load state around it.
    ///
    /// Joined reads share the state saved by the first one. A failure
    /// restores that state instead of marking loaded.
    async fn await_relationship<T>(
        &self,
        owner: RecordHandle,
        key: &str,
        kind: RelationshipKind,
        fetch: impl Future<Output = Result<T, TetherError>>,
    ) -> Result<T, TetherError> {
        let slot = (owner, key.to_string());
        let previous = self.load_state(owner, key);
        self.inner
            .pending_loads
            .borrow_mut()
            .entry(slot.clone())
            .or_insert(previous);
        self.mark_load_state(owner, key, kind, LoadState::Loading);

        let result = fetch.await;
        let saved = self.inner.pending_loads.borrow_mut().remove(&slot);
        match (&result, saved) {
            (Ok(_), _) => self.mark_load_state(owner, key, kind, LoadState::Loaded),
            (Err(_), Some(previous)) => self.mark_load_state(owner, key, kind, previous),
            // A joined read already restored the saved state.
            (Err(_), None) => {}
        }
        result
    }

    /// Read a belongsTo after a fetch; the owner may have been unloaded.
    fn belongs_to_loaded(&self, owner: RecordHandle, key: &str) -> Result<Option<Record>, TetherError> {
        if !self.is_live(owner) {
            return Ok(None);
        }
        self.belongs_to(owner, key)
    }

    fn has_many_loaded(&self, owner: RecordHandle, key: &str) -> Result<Vec<Record>, TetherError> {
        if !self.is_live(owner) {
            return Ok(Vec::new());
        }
        self.has_many(owner, key)
    }
}

/// Query JSON with object keys sorted, so equal queries coalesce.
fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), sorted(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}
