//! # Record Arrays
//!
//! Immutable, adapter-populated result sets for `find_all` and `query`.
//! Content only changes through `update`, which re-runs the request and
//! swaps handles, meta and links in one step.

use crate::record::Record;
use crate::store::{FetchOutcome, Store};
use crate::{RecordHandle, TetherError};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Default)]
struct ArrayState {
    handles: Vec<RecordHandle>,
    meta: Option<Value>,
    links: Option<Value>,
    is_loaded: bool,
    is_updating: bool,
}

/// Result of a collection request.
///
/// Clones share content, so an `update` is visible through every clone.
#[derive(Debug, Clone)]
pub struct RecordArray {
    store: Store,
    type_name: String,
    query: Option<Value>,
    state: Rc<RefCell<ArrayState>>,
}

impl RecordArray {
    pub(crate) fn new(store: Store, type_name: &str, query: Option<Value>) -> Self {
        Self {
            store,
            type_name: type_name.to_string(),
            query,
            state: Rc::new(RefCell::new(ArrayState::default())),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The query this array answers; `None` for `find_all`.
    #[must_use]
    pub fn query(&self) -> Option<&Value> {
        self.query.as_ref()
    }

    /// Current members, skipping any unloaded since the last update.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        let handles = self.state.borrow().handles.clone();
        handles
            .into_iter()
            .filter_map(|handle| self.store.record_for(handle).ok())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn meta(&self) -> Option<Value> {
        self.state.borrow().meta.clone()
    }

    #[must_use]
    pub fn links(&self) -> Option<Value> {
        self.state.borrow().links.clone()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state.borrow().is_loaded
    }

    #[must_use]
    pub fn is_updating(&self) -> bool {
        self.state.borrow().is_updating
    }

    /// Re-run the request and replace the content.
    ///
    /// On failure the previous content is kept.
    pub async fn update(&self) -> Result<(), TetherError> {
        self.state.borrow_mut().is_updating = true;
        let fetch = self
            .store
            .fetch_collection(&self.type_name, self.query.as_ref());
        let result = fetch.await;

        let mut state = self.state.borrow_mut();
        state.is_updating = false;
        match result? {
            FetchOutcome::Applied {
                handles,
                meta,
                links,
            } => {
                state.handles = handles;
                state.meta = meta;
                state.links = links;
                state.is_loaded = true;
            }
            FetchOutcome::Discarded => {}
        }
        Ok(())
    }
}
