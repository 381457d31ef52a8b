//! The relationship graph.
//!
//! Owns every `RelationshipState` and is the only place links between two
//! handles are written. Each public operation resolves everything that can
//! fail (definitions, inverses, liveness) before mutating, then applies the
//! forward and inverse sides inside the same `&mut self` call. No caller can
//! observe one side of a link without the other.

use super::state::{BelongsToState, HasManyState, RelationshipState};
use crate::identity::{IdentityRegistry, UnloadObserver};
use crate::schema::{InverseRef, RelationshipDef, RelationshipKind, Schema};
use crate::{LoadState, RecordHandle, TetherError};
use indexmap::IndexSet;
use std::collections::BTreeMap;

// =============================================================================
// CONTEXT
// =============================================================================

/// Read-only collaborators needed to resolve definitions and inverses.
#[derive(Debug, Clone, Copy)]
pub struct GraphContext<'a> {
    pub schema: &'a Schema,
    pub registry: &'a IdentityRegistry,
}

impl<'a> GraphContext<'a> {
    #[must_use]
    pub fn new(schema: &'a Schema, registry: &'a IdentityRegistry) -> Self {
        Self { schema, registry }
    }

    fn type_of(&self, handle: RecordHandle) -> Result<&'a str, TetherError> {
        self.registry
            .identity(handle)
            .map(|identity| identity.type_name.as_str())
            .ok_or(TetherError::RecordUnloaded(handle))
    }

    /// Resolve `owner.key` and check it has the expected kind.
    fn definition(
        &self,
        owner: RecordHandle,
        key: &str,
        expected: RelationshipKind,
    ) -> Result<(&'a str, RelationshipDef), TetherError> {
        let owner_type = self.type_of(owner)?;
        let def = self.schema.relationship(owner_type, key)?;
        if def.kind != expected {
            return Err(TetherError::WrongKind {
                type_name: owner_type.to_string(),
                key: key.to_string(),
                expected: expected.as_str(),
                actual: def.kind.as_str(),
            });
        }
        Ok((owner_type, def))
    }

    fn inverse(
        &self,
        owner_type: &str,
        def: &RelationshipDef,
        related: RecordHandle,
    ) -> Result<Option<InverseRef>, TetherError> {
        let related_type = self.type_of(related)?;
        self.schema.inverse_on(owner_type, def, related_type)
    }
}

/// Which values of a state a write touches.
#[derive(Debug, Clone, Copy)]
struct Sides {
    current: bool,
    canonical: bool,
}

const LOCAL: Sides = Sides {
    current: true,
    canonical: false,
};

// =============================================================================
// GRAPH
// =============================================================================

/// Relationship states of one owner, split by kind.
///
/// A key lives in at most one of the two maps.
#[derive(Debug, Clone, Default)]
struct OwnerStates {
    belongs_to: BTreeMap<String, BelongsToState>,
    has_many: BTreeMap<String, HasManyState>,
}

impl OwnerStates {
    fn is_dirty(&self) -> bool {
        self.belongs_to.values().any(BelongsToState::is_dirty)
            || self.has_many.values().any(HasManyState::is_dirty)
    }

    fn references(&self, handle: RecordHandle) -> bool {
        self.belongs_to
            .values()
            .any(|s| s.current == Some(handle) || s.canonical == Some(handle))
            || self
                .has_many
                .values()
                .any(|s| s.current.contains(&handle) || s.canonical.contains(&handle))
    }

    fn snapshot(&self) -> Vec<(String, RelationshipState)> {
        let belongs_to = self
            .belongs_to
            .iter()
            .map(|(key, s)| (key.clone(), RelationshipState::BelongsTo(s.clone())));
        let has_many = self
            .has_many
            .iter()
            .map(|(key, s)| (key.clone(), RelationshipState::HasMany(s.clone())));
        belongs_to.chain(has_many).collect()
    }
}

/// All relationship state, keyed by owner handle then relationship key.
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    states: BTreeMap<RecordHandle, OwnerStates>,
}

impl RelationshipGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ===== READS =====

    #[must_use]
    pub fn belongs_to(&self, owner: RecordHandle, key: &str) -> Option<&BelongsToState> {
        self.states.get(&owner)?.belongs_to.get(key)
    }

    #[must_use]
    pub fn has_many(&self, owner: RecordHandle, key: &str) -> Option<&HasManyState> {
        self.states.get(&owner)?.has_many.get(key)
    }

    /// Load state of either kind, if the relationship was ever touched.
    #[must_use]
    pub fn load_state(&self, owner: RecordHandle, key: &str) -> Option<LoadState> {
        self.belongs_to(owner, key)
            .map(BelongsToState::load_state)
            .or_else(|| self.has_many(owner, key).map(HasManyState::load_state))
    }

    /// Whether any relationship of `owner` diverges from canonical.
    #[must_use]
    pub fn is_dirty(&self, owner: RecordHandle) -> bool {
        self.states
            .get(&owner)
            .is_some_and(OwnerStates::is_dirty)
    }

    /// Number of owners with at least one tracked relationship.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.states.len()
    }

    /// Whether any state anywhere references `handle`.
    #[must_use]
    pub fn references(&self, handle: RecordHandle) -> bool {
        self.states.values().any(|states| states.references(handle))
    }

    // ===== LOCAL MUTATION =====

    /// Replace the current value of a belongsTo, updating the inverse side.
    pub fn set_belongs_to(
        &mut self,
        cx: &GraphContext<'_>,
        owner: RecordHandle,
        key: &str,
        value: Option<RecordHandle>,
    ) -> Result<(), TetherError> {
        let (owner_type, def) = cx.definition(owner, key, RelationshipKind::BelongsTo)?;
        let previous = self.belongs_to(owner, key).and_then(|s| s.current);
        let old_inverse = resolve_inverse(cx, owner_type, &def, previous)?;
        let new_inverse = resolve_inverse(cx, owner_type, &def, value)?;

        let state = self.belongs_to_entry(owner, key);
        state.has_data = true;
        if previous == value {
            return Ok(());
        }
        state.current = value;
        state.load_state = if value.is_some() {
            LoadState::Loaded
        } else {
            LoadState::Empty
        };

        if let (Some(old), Some(inverse)) = (previous, old_inverse) {
            self.detach(old, &inverse.key, owner, LOCAL);
        }
        if let (Some(new), Some(inverse)) = (value, new_inverse) {
            self.attach_inverse(owner, key, new, &inverse, LOCAL);
        }
        Ok(())
    }

    /// Add `member` to the current list, at `index` or at the end.
    ///
    /// Adding an existing member is a no-op.
    pub fn add_to_has_many(
        &mut self,
        cx: &GraphContext<'_>,
        owner: RecordHandle,
        key: &str,
        member: RecordHandle,
        index: Option<usize>,
    ) -> Result<(), TetherError> {
        let (owner_type, def) = cx.definition(owner, key, RelationshipKind::HasMany)?;
        let inverse = resolve_inverse(cx, owner_type, &def, Some(member))?;

        let state = self.has_many_entry(owner, key);
        state.has_data = true;
        if state.current.contains(&member) {
            return Ok(());
        }
        insert_at(&mut state.current, member, index);
        if !state.canonical.contains(&member) {
            state.has_local_additions = true;
        }
        state.load_state = LoadState::Loaded;

        if let Some(inverse) = inverse {
            self.attach_inverse(owner, key, member, &inverse, LOCAL);
        }
        Ok(())
    }

    /// Remove `member` from the current list. Removing a non-member is a no-op.
    pub fn remove_from_has_many(
        &mut self,
        cx: &GraphContext<'_>,
        owner: RecordHandle,
        key: &str,
        member: RecordHandle,
    ) -> Result<(), TetherError> {
        let (owner_type, def) = cx.definition(owner, key, RelationshipKind::HasMany)?;
        let is_member = self
            .has_many(owner, key)
            .is_some_and(|s| s.current.contains(&member));
        if !is_member {
            return Ok(());
        }
        let inverse = resolve_inverse(cx, owner_type, &def, Some(member))?;

        let state = self.has_many_entry(owner, key);
        state.has_data = true;
        state.current.shift_remove(&member);
        if state.current.is_empty() {
            state.load_state = LoadState::Empty;
        }

        if let Some(inverse) = inverse {
            self.detach(member, &inverse.key, owner, LOCAL);
        }
        Ok(())
    }

    /// Reorder the current list.
    ///
    /// Listed members move to the front in the given order; unlisted members
    /// keep their relative order after them. Handles that are not members
    /// are ignored.
    pub fn reorder_has_many(
        &mut self,
        cx: &GraphContext<'_>,
        owner: RecordHandle,
        key: &str,
        order: &[RecordHandle],
    ) -> Result<(), TetherError> {
        cx.definition(owner, key, RelationshipKind::HasMany)?;
        let state = self.has_many_entry(owner, key);
        let mut reordered: IndexSet<RecordHandle> = order
            .iter()
            .copied()
            .filter(|h| state.current.contains(h))
            .collect();
        reordered.extend(state.current.iter().copied());
        state.current = reordered;
        Ok(())
    }

    /// Replace the current list wholesale through the inverse-aware paths.
    pub fn set_has_many(
        &mut self,
        cx: &GraphContext<'_>,
        owner: RecordHandle,
        key: &str,
        members: &[RecordHandle],
    ) -> Result<(), TetherError> {
        cx.definition(owner, key, RelationshipKind::HasMany)?;
        let target: IndexSet<RecordHandle> = members.iter().copied().collect();
        let existing = self
            .has_many(owner, key)
            .map(HasManyState::members)
            .unwrap_or_default();

        for stale in existing.iter().filter(|h| !target.contains(*h)) {
            self.remove_from_has_many(cx, owner, key, *stale)?;
        }
        for member in &target {
            self.add_to_has_many(cx, owner, key, *member, None)?;
        }
        let order: Vec<RecordHandle> = target.into_iter().collect();
        self.reorder_has_many(cx, owner, key, &order)?;
        self.has_many_entry(owner, key).has_data = true;
        Ok(())
    }

    // ===== CANONICAL UPDATES =====

    /// Apply a server-confirmed belongsTo value.
    ///
    /// The current value follows unless it was locally modified. The inverse
    /// side receives the canonical change.
    pub fn push_belongs_to(
        &mut self,
        cx: &GraphContext<'_>,
        owner: RecordHandle,
        key: &str,
        value: Option<RecordHandle>,
    ) -> Result<(), TetherError> {
        let (owner_type, def) = cx.definition(owner, key, RelationshipKind::BelongsTo)?;
        let (previous, was_dirty) = self
            .belongs_to(owner, key)
            .map_or((None, false), |s| (s.canonical, s.is_dirty()));
        let old_inverse = resolve_inverse(cx, owner_type, &def, previous)?;
        let new_inverse = resolve_inverse(cx, owner_type, &def, value)?;

        let state = self.belongs_to_entry(owner, key);
        state.has_data = true;
        state.canonical = value;
        if !was_dirty {
            state.current = value;
        }
        if state.current.is_none() {
            state.load_state = LoadState::Empty;
        } else if state.load_state == LoadState::Empty {
            state.load_state = LoadState::NotLoaded;
        }
        if previous == value {
            return Ok(());
        }

        let sides = Sides {
            current: !was_dirty,
            canonical: true,
        };
        if let (Some(old), Some(inverse)) = (previous, old_inverse) {
            self.detach(old, &inverse.key, owner, sides);
        }
        if let (Some(new), Some(inverse)) = (value, new_inverse) {
            self.attach_inverse(owner, key, new, &inverse, sides);
        }
        Ok(())
    }

    /// Apply a server-confirmed hasMany membership list.
    pub fn push_has_many(
        &mut self,
        cx: &GraphContext<'_>,
        owner: RecordHandle,
        key: &str,
        members: &[RecordHandle],
    ) -> Result<(), TetherError> {
        let (owner_type, def) = cx.definition(owner, key, RelationshipKind::HasMany)?;
        let incoming: IndexSet<RecordHandle> = members.iter().copied().collect();
        let (previous, was_dirty) = self
            .has_many(owner, key)
            .map_or((IndexSet::new(), false), |s| (s.canonical.clone(), s.is_dirty()));

        let mut removed = Vec::new();
        for handle in previous.iter().filter(|h| !incoming.contains(*h)) {
            removed.push((*handle, resolve_inverse(cx, owner_type, &def, Some(*handle))?));
        }
        let mut added = Vec::new();
        for handle in incoming.iter().filter(|h| !previous.contains(*h)) {
            added.push((*handle, resolve_inverse(cx, owner_type, &def, Some(*handle))?));
        }

        let state = self.has_many_entry(owner, key);
        state.has_data = true;
        state.canonical = incoming.clone();
        if !was_dirty {
            state.current = incoming;
            state.has_local_additions = false;
        }
        if state.current.is_empty() {
            state.load_state = LoadState::Empty;
        } else if state.load_state == LoadState::Empty {
            state.load_state = LoadState::NotLoaded;
        }

        let sides = Sides {
            current: !was_dirty,
            canonical: true,
        };
        for (handle, inverse) in removed {
            if let Some(inverse) = inverse {
                self.detach(handle, &inverse.key, owner, sides);
            }
        }
        for (handle, inverse) in added {
            if let Some(inverse) = inverse {
                self.attach_inverse(owner, key, handle, &inverse, sides);
            }
        }
        Ok(())
    }

    /// Record the related link of a relationship.
    pub fn set_link(
        &mut self,
        owner: RecordHandle,
        key: &str,
        kind: RelationshipKind,
        link: Option<String>,
    ) {
        match kind {
            RelationshipKind::BelongsTo => self.belongs_to_entry(owner, key).link = link,
            RelationshipKind::HasMany => self.has_many_entry(owner, key).link = link,
        }
    }

    pub fn set_load_state(
        &mut self,
        owner: RecordHandle,
        key: &str,
        kind: RelationshipKind,
        load_state: LoadState,
    ) {
        match kind {
            RelationshipKind::BelongsTo => self.belongs_to_entry(owner, key).load_state = load_state,
            RelationshipKind::HasMany => self.has_many_entry(owner, key).load_state = load_state,
        }
    }

    /// Make every current value of `owner` canonical.
    pub fn commit(&mut self, cx: &GraphContext<'_>, owner: RecordHandle) -> Result<(), TetherError> {
        for (key, state) in self.owned(owner) {
            match state {
                RelationshipState::BelongsTo(s) => {
                    self.push_belongs_to(cx, owner, &key, s.current)?;
                }
                RelationshipState::HasMany(s) => {
                    self.push_has_many(cx, owner, &key, &s.members())?;
                    self.has_many_entry(owner, &key).has_local_additions = false;
                }
            }
        }
        Ok(())
    }

    /// Restore every canonical value of `owner` through the inverse-aware paths.
    pub fn rollback(&mut self, cx: &GraphContext<'_>, owner: RecordHandle) -> Result<(), TetherError> {
        for (key, state) in self.owned(owner) {
            if !state.is_dirty() {
                continue;
            }
            match state {
                RelationshipState::BelongsTo(s) => {
                    self.set_belongs_to(cx, owner, &key, s.canonical)?;
                }
                RelationshipState::HasMany(s) => {
                    let canonical: Vec<RecordHandle> = s.canonical.iter().copied().collect();
                    self.set_has_many(cx, owner, &key, &canonical)?;
                    self.has_many_entry(owner, &key).has_local_additions = false;
                }
            }
        }
        Ok(())
    }

    // ===== INTERNALS =====

    fn owned(&self, owner: RecordHandle) -> Vec<(String, RelationshipState)> {
        self.states
            .get(&owner)
            .map(OwnerStates::snapshot)
            .unwrap_or_default()
    }

    /// The belongsTo state of `owner.key`, replacing a stale hasMany.
    fn belongs_to_entry(&mut self, owner: RecordHandle, key: &str) -> &mut BelongsToState {
        let states = self.states.entry(owner).or_default();
        states.has_many.remove(key);
        states.belongs_to.entry(key.to_string()).or_default()
    }

    /// The hasMany state of `owner.key`, replacing a stale belongsTo.
    fn has_many_entry(&mut self, owner: RecordHandle, key: &str) -> &mut HasManyState {
        let states = self.states.entry(owner).or_default();
        states.belongs_to.remove(key);
        states.has_many.entry(key.to_string()).or_default()
    }

    /// Point `target.inverse` at `owner`.
    ///
    /// When the inverse is a belongsTo that pointed elsewhere, the displaced
    /// record's forward link to `target` is dropped so it cannot dangle.
    fn attach_inverse(
        &mut self,
        owner: RecordHandle,
        forward_key: &str,
        target: RecordHandle,
        inverse: &InverseRef,
        sides: Sides,
    ) {
        let displaced = match inverse.kind {
            RelationshipKind::HasMany => {
                let state = self.has_many_entry(target, &inverse.key);
                state.has_data = true;
                if sides.current {
                    state.current.insert(owner);
                }
                if sides.canonical {
                    state.canonical.insert(owner);
                }
                if !state.current.is_empty() && state.load_state == LoadState::Empty {
                    state.load_state = LoadState::NotLoaded;
                }
                None
            }
            RelationshipKind::BelongsTo => {
                let state = self.belongs_to_entry(target, &inverse.key);
                state.has_data = true;
                let mut displaced = None;
                if sides.current {
                    displaced = state.current.filter(|h| *h != owner);
                    state.current = Some(owner);
                }
                if sides.canonical {
                    state.canonical = Some(owner);
                }
                if state.current.is_some() && state.load_state == LoadState::Empty {
                    state.load_state = LoadState::NotLoaded;
                }
                displaced
            }
        };
        if let Some(displaced) = displaced {
            self.detach(displaced, forward_key, target, sides);
        }
    }

    /// Remove `member` from `target.key` without touching any other state.
    fn detach(&mut self, target: RecordHandle, key: &str, member: RecordHandle, sides: Sides) {
        let Some(states) = self.states.get_mut(&target) else {
            return;
        };
        if let Some(s) = states.belongs_to.get_mut(key) {
            if sides.current && s.current == Some(member) {
                s.current = None;
                s.load_state = LoadState::Empty;
            }
            if sides.canonical && s.canonical == Some(member) {
                s.canonical = None;
            }
        }
        if let Some(s) = states.has_many.get_mut(key) {
            if sides.current {
                s.current.shift_remove(&member);
            }
            if sides.canonical {
                s.canonical.shift_remove(&member);
            }
        }
    }
}

impl UnloadObserver for RelationshipGraph {
    fn record_unloaded(&mut self, handle: RecordHandle) {
        self.states.remove(&handle);
        for states in self.states.values_mut() {
            for state in states.belongs_to.values_mut() {
                state.prune(handle);
            }
            for state in states.has_many.values_mut() {
                state.prune(handle);
            }
        }
    }
}

fn resolve_inverse(
    cx: &GraphContext<'_>,
    owner_type: &str,
    def: &RelationshipDef,
    related: Option<RecordHandle>,
) -> Result<Option<InverseRef>, TetherError> {
    match related {
        Some(related) => cx.inverse(owner_type, def, related),
        None => Ok(None),
    }
}

fn insert_at(set: &mut IndexSet<RecordHandle>, member: RecordHandle, index: Option<usize>) {
    match index {
        Some(index) if index < set.len() => {
            set.shift_insert(index, member);
        }
        _ => {
            set.insert(member);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Definitions, RelationshipDef, TypeDef};

    struct Fixture {
        schema: Schema,
        registry: IdentityRegistry,
        graph: RelationshipGraph,
    }

    impl Fixture {
        fn new() -> Self {
            let schema = Schema::new(
                Definitions::new()
                    .define(TypeDef::new("post").relationship(RelationshipDef::has_many("comments")))
                    .define(TypeDef::new("comment").relationship(RelationshipDef::belongs_to("post")))
                    .define(TypeDef::new("user").relationship(RelationshipDef::belongs_to("profile")))
                    .define(TypeDef::new("profile").relationship(RelationshipDef::belongs_to("user")))
                    .define(
                        TypeDef::new("tag")
                            .relationship(RelationshipDef::has_many("articles").target("article")),
                    )
                    .define(
                        TypeDef::new("article").relationship(RelationshipDef::has_many("tags")),
                    ),
            );
            Self {
                schema,
                registry: IdentityRegistry::new(),
                graph: RelationshipGraph::new(),
            }
        }

        fn record(&mut self, type_name: &str, id: &str) -> RecordHandle {
            self.registry.get_or_create(type_name, Some(id))
        }

        fn with<R>(
            &mut self,
            f: impl FnOnce(&mut RelationshipGraph, &GraphContext<'_>) -> R,
        ) -> R {
            let cx = GraphContext::new(&self.schema, &self.registry);
            f(&mut self.graph, &cx)
        }

        fn belongs_to(&self, owner: RecordHandle, key: &str) -> Option<RecordHandle> {
            self.graph.belongs_to(owner, key).and_then(BelongsToState::current)
        }

        fn members(&self, owner: RecordHandle, key: &str) -> Vec<RecordHandle> {
            self.graph
                .has_many(owner, key)
                .map(HasManyState::members)
                .unwrap_or_default()
        }
    }

    #[test]
    fn set_belongs_to_updates_inverse_has_many() {
        let mut fx = Fixture::new();
        let post = fx.record("post", "1");
        let comment = fx.record("comment", "1");

        fx.with(|g, cx| g.set_belongs_to(cx, comment, "post", Some(post)))
            .expect("set");
        assert_eq!(fx.belongs_to(comment, "post"), Some(post));
        assert_eq!(fx.members(post, "comments"), vec![comment]);
        assert!(fx.graph.is_dirty(comment));

        fx.with(|g, cx| g.set_belongs_to(cx, comment, "post", None))
            .expect("unset");
        assert!(fx.members(post, "comments").is_empty());
    }

    #[test]
    fn moving_belongs_to_detaches_old_parent() {
        let mut fx = Fixture::new();
        let first = fx.record("post", "1");
        let second = fx.record("post", "2");
        let comment = fx.record("comment", "1");

        fx.with(|g, cx| g.set_belongs_to(cx, comment, "post", Some(first)))
            .expect("set");
        fx.with(|g, cx| g.set_belongs_to(cx, comment, "post", Some(second)))
            .expect("move");
        assert!(fx.members(first, "comments").is_empty());
        assert_eq!(fx.members(second, "comments"), vec![comment]);
    }

    #[test]
    fn one_to_one_steals_from_previous_owner() {
        let mut fx = Fixture::new();
        let alice = fx.record("user", "1");
        let bob = fx.record("user", "2");
        let profile = fx.record("profile", "1");

        fx.with(|g, cx| g.set_belongs_to(cx, alice, "profile", Some(profile)))
            .expect("alice");
        fx.with(|g, cx| g.set_belongs_to(cx, bob, "profile", Some(profile)))
            .expect("bob");
        assert_eq!(fx.belongs_to(profile, "user"), Some(bob));
        assert_eq!(fx.belongs_to(alice, "profile"), None);
    }

    #[test]
    fn has_many_add_sets_inverse_and_moves_from_old_parent() {
        let mut fx = Fixture::new();
        let first = fx.record("post", "1");
        let second = fx.record("post", "2");
        let comment = fx.record("comment", "1");

        fx.with(|g, cx| g.add_to_has_many(cx, first, "comments", comment, None))
            .expect("add");
        assert_eq!(fx.belongs_to(comment, "post"), Some(first));

        fx.with(|g, cx| g.add_to_has_many(cx, second, "comments", comment, None))
            .expect("add elsewhere");
        assert_eq!(fx.belongs_to(comment, "post"), Some(second));
        assert!(fx.members(first, "comments").is_empty());
    }

    #[test]
    fn duplicate_add_and_missing_remove_are_noops() {
        let mut fx = Fixture::new();
        let post = fx.record("post", "1");
        let a = fx.record("comment", "1");
        let b = fx.record("comment", "2");

        fx.with(|g, cx| {
            g.add_to_has_many(cx, post, "comments", a, None)?;
            g.add_to_has_many(cx, post, "comments", a, None)?;
            g.remove_from_has_many(cx, post, "comments", b)
        })
        .expect("mutations");
        assert_eq!(fx.members(post, "comments"), vec![a]);
    }

    #[test]
    fn insert_index_and_reorder() {
        let mut fx = Fixture::new();
        let post = fx.record("post", "1");
        let a = fx.record("comment", "1");
        let b = fx.record("comment", "2");
        let c = fx.record("comment", "3");

        fx.with(|g, cx| {
            g.add_to_has_many(cx, post, "comments", a, None)?;
            g.add_to_has_many(cx, post, "comments", b, None)?;
            g.add_to_has_many(cx, post, "comments", c, Some(0))
        })
        .expect("adds");
        assert_eq!(fx.members(post, "comments"), vec![c, a, b]);

        fx.with(|g, cx| g.reorder_has_many(cx, post, "comments", &[b]))
            .expect("reorder");
        assert_eq!(fx.members(post, "comments"), vec![b, c, a]);
    }

    #[test]
    fn push_updates_canonical_and_clean_current() {
        let mut fx = Fixture::new();
        let post = fx.record("post", "1");
        let a = fx.record("comment", "1");
        let b = fx.record("comment", "2");

        fx.with(|g, cx| g.push_has_many(cx, post, "comments", &[a, b]))
            .expect("push");
        let state = fx.graph.has_many(post, "comments").expect("state");
        assert!(!state.is_dirty());
        assert!(!state.has_local_additions());
        assert_eq!(fx.belongs_to(a, "post"), Some(post));
        let inverse = fx.graph.belongs_to(b, "post").expect("inverse");
        assert_eq!(inverse.canonical(), Some(post));
        assert!(!inverse.is_dirty());
    }

    #[test]
    fn push_keeps_dirty_current() {
        let mut fx = Fixture::new();
        let first = fx.record("post", "1");
        let second = fx.record("post", "2");
        let comment = fx.record("comment", "1");

        fx.with(|g, cx| g.set_belongs_to(cx, comment, "post", Some(first)))
            .expect("local");
        fx.with(|g, cx| g.push_belongs_to(cx, comment, "post", Some(second)))
            .expect("push");
        let state = fx.graph.belongs_to(comment, "post").expect("state");
        assert_eq!(state.current(), Some(first));
        assert_eq!(state.canonical(), Some(second));
        // Current sides stay consistent with the local value.
        assert_eq!(fx.members(first, "comments"), vec![comment]);
        assert!(fx.members(second, "comments").is_empty());
    }

    #[test]
    fn commit_then_rollback_restores_both_sides() {
        let mut fx = Fixture::new();
        let first = fx.record("post", "1");
        let second = fx.record("post", "2");
        let comment = fx.record("comment", "1");

        fx.with(|g, cx| {
            g.set_belongs_to(cx, comment, "post", Some(first))?;
            g.commit(cx, comment)
        })
        .expect("commit");
        assert!(!fx.graph.is_dirty(comment));

        fx.with(|g, cx| g.set_belongs_to(cx, comment, "post", Some(second)))
            .expect("move");
        fx.with(|g, cx| g.rollback(cx, comment)).expect("rollback");
        assert_eq!(fx.belongs_to(comment, "post"), Some(first));
        assert_eq!(fx.members(first, "comments"), vec![comment]);
        assert!(fx.members(second, "comments").is_empty());
        assert!(!fx.graph.is_dirty(comment));
    }

    #[test]
    fn many_to_many_links_both_lists() {
        let mut fx = Fixture::new();
        let tag = fx.record("tag", "1");
        let article = fx.record("article", "1");

        fx.with(|g, cx| g.add_to_has_many(cx, article, "tags", tag, None))
            .expect("add");
        assert_eq!(fx.members(tag, "articles"), vec![article]);
        fx.with(|g, cx| g.remove_from_has_many(cx, tag, "articles", article))
            .expect("remove");
        assert!(fx.members(article, "tags").is_empty());
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let mut fx = Fixture::new();
        let post = fx.record("post", "1");
        let comment = fx.record("comment", "1");
        let err = fx
            .with(|g, cx| g.set_belongs_to(cx, post, "comments", Some(comment)))
            .expect_err("wrong kind");
        assert!(matches!(err, TetherError::WrongKind { .. }));
    }

    #[test]
    fn writing_other_kind_replaces_stale_state() {
        let mut fx = Fixture::new();
        let comment = fx.record("comment", "1");
        fx.graph
            .set_link(comment, "post", RelationshipKind::HasMany, Some("/a".to_string()));
        fx.graph
            .set_link(comment, "post", RelationshipKind::BelongsTo, Some("/b".to_string()));

        assert!(fx.graph.has_many(comment, "post").is_none());
        let state = fx.graph.belongs_to(comment, "post").expect("state");
        assert_eq!(state.link(), Some("/b"));
        assert_eq!(fx.graph.load_state(comment, "post"), Some(LoadState::NotLoaded));
    }

    #[test]
    fn unload_prunes_every_reference() {
        let mut fx = Fixture::new();
        let post = fx.record("post", "1");
        let a = fx.record("comment", "1");
        let b = fx.record("comment", "2");
        fx.with(|g, cx| g.push_has_many(cx, post, "comments", &[a, b]))
            .expect("push");

        let Fixture {
            registry, graph, ..
        } = &mut fx;
        registry.unload(a, graph).expect("unload");
        assert!(!fx.graph.references(a));
        assert_eq!(fx.members(post, "comments"), vec![b]);
        assert!(fx.graph.belongs_to(a, "post").is_none());
        assert_eq!(fx.graph.load_state(a, "post"), None);
    }
}
