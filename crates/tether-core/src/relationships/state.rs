//! Per-record, per-key relationship state.
//!
//! Each state keeps a canonical value (last confirmed by the server) and a
//! current value (as mutated locally). The relationship is dirty whenever
//! the two diverge.

use crate::{LoadState, RecordHandle};
use indexmap::IndexSet;

/// State of one belongsTo relationship.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BelongsToState {
    pub(crate) canonical: Option<RecordHandle>,
    pub(crate) current: Option<RecordHandle>,
    pub(crate) load_state: LoadState,
    pub(crate) has_data: bool,
    pub(crate) link: Option<String>,
}

impl BelongsToState {
    #[must_use]
    pub fn canonical(&self) -> Option<RecordHandle> {
        self.canonical
    }

    #[must_use]
    pub fn current(&self) -> Option<RecordHandle> {
        self.current
    }

    #[must_use]
    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    /// Whether the value was ever populated, locally or from a payload.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Related link, if the payload supplied one.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.current != self.canonical
    }

    /// Drop every reference to `handle` from both canonical and current.
    pub(crate) fn prune(&mut self, handle: RecordHandle) {
        if self.canonical == Some(handle) {
            self.canonical = None;
        }
        if self.current == Some(handle) {
            self.current = None;
            self.load_state = LoadState::Empty;
        }
    }
}

/// State of one hasMany relationship.
///
/// Membership is an insertion-ordered set: duplicates are impossible and
/// order survives removals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HasManyState {
    pub(crate) canonical: IndexSet<RecordHandle>,
    pub(crate) current: IndexSet<RecordHandle>,
    pub(crate) load_state: LoadState,
    pub(crate) has_data: bool,
    pub(crate) has_local_additions: bool,
    pub(crate) link: Option<String>,
}

impl HasManyState {
    #[must_use]
    pub fn canonical(&self) -> &IndexSet<RecordHandle> {
        &self.canonical
    }

    #[must_use]
    pub fn current(&self) -> &IndexSet<RecordHandle> {
        &self.current
    }

    /// Current members in order.
    #[must_use]
    pub fn members(&self) -> Vec<RecordHandle> {
        self.current.iter().copied().collect()
    }

    #[must_use]
    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    #[must_use]
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Whether members were added locally and not yet confirmed.
    #[must_use]
    pub fn has_local_additions(&self) -> bool {
        self.has_local_additions
    }

    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    /// Order-sensitive: a local reorder makes the relationship dirty.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.current.iter().eq(self.canonical.iter())
    }

    pub(crate) fn prune(&mut self, handle: RecordHandle) {
        self.canonical.shift_remove(&handle);
        self.current.shift_remove(&handle);
    }
}

/// Either kind of relationship state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipState {
    BelongsTo(BelongsToState),
    HasMany(HasManyState),
}

impl RelationshipState {
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        match self {
            Self::BelongsTo(s) => s.is_dirty(),
            Self::HasMany(s) => s.is_dirty(),
        }
    }

    #[must_use]
    pub fn has_data(&self) -> bool {
        match self {
            Self::BelongsTo(s) => s.has_data,
            Self::HasMany(s) => s.has_data,
        }
    }

    #[must_use]
    pub fn load_state(&self) -> LoadState {
        match self {
            Self::BelongsTo(s) => s.load_state,
            Self::HasMany(s) => s.load_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn belongs_to_dirty_when_current_diverges() {
        let mut state = BelongsToState::default();
        assert!(!state.is_dirty());
        state.current = Some(RecordHandle(1));
        assert!(state.is_dirty());
        state.canonical = Some(RecordHandle(1));
        assert!(!state.is_dirty());
    }

    #[test]
    fn has_many_dirty_is_order_sensitive() {
        let mut state = HasManyState::default();
        state.canonical.extend([RecordHandle(1), RecordHandle(2)]);
        state.current.extend([RecordHandle(2), RecordHandle(1)]);
        assert!(state.is_dirty());
        state.current = state.canonical.clone();
        assert!(!state.is_dirty());
    }

    #[test]
    fn prune_preserves_remaining_order() {
        let mut state = HasManyState::default();
        state
            .current
            .extend([RecordHandle(1), RecordHandle(2), RecordHandle(3)]);
        state.prune(RecordHandle(2));
        assert_eq!(state.members(), vec![RecordHandle(1), RecordHandle(3)]);
    }

    #[test]
    fn prune_belongs_to_marks_empty() {
        let mut state = BelongsToState {
            canonical: Some(RecordHandle(4)),
            current: Some(RecordHandle(4)),
            load_state: LoadState::Loaded,
            has_data: true,
            link: None,
        };
        state.prune(RecordHandle(4));
        let wrapped = RelationshipState::BelongsTo(state);
        assert_eq!(wrapped.load_state(), LoadState::Empty);
        assert!(!wrapped.is_dirty());
        assert!(wrapped.has_data());
    }
}
