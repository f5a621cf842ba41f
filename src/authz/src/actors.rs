//! Loaded actor records
//!
//! Actors are sharded in a `DashMap`; a mutation holds only that actor's
//! shard lock, so concurrent readers see either the record before or after
//! the change and never a half-applied one.
//!
//! Lock order: a caller that needs both the group graph and an actor takes
//! the graph lock first. Readers clone the actor and drop the shard guard
//! before touching the graph.

use crate::model::Actor;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use warden_core::{ActorId, GroupId};

/// Concurrent table of loaded actors plus the set awaiting a save
#[derive(Debug, Default)]
pub struct ActorTable {
    actors: DashMap<ActorId, Actor>,
    dirty: DashSet<ActorId>,
}

impl ActorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of one actor, if loaded
    pub fn get(&self, id: ActorId) -> Option<Actor> {
        self.actors.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    /// Insert an actor unless one with the same id is already loaded
    ///
    /// Returns the resident record and whether `actor` was inserted.
    pub fn insert_if_absent(&self, actor: Actor) -> (Actor, bool) {
        match self.actors.entry(actor.id) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => (entry.insert(actor).value().clone(), true),
        }
    }

    /// Apply `f` under the actor's shard lock; `None` if not loaded
    ///
    /// A `true` result marks the actor dirty before the shard lock is
    /// released, so [`remove_clean`](Self::remove_clean) never sees a changed
    /// record without its dirty flag.
    pub fn update<F>(&self, id: ActorId, f: F) -> Option<bool>
    where
        F: FnOnce(&mut Actor) -> bool,
    {
        let mut entry = self.actors.get_mut(&id)?;
        let changed = f(entry.value_mut());
        if changed {
            self.dirty.insert(id);
        }
        Some(changed)
    }

    /// Apply `f` to every loaded actor, returning the ids it changed
    pub fn update_all<F>(&self, mut f: F) -> Vec<ActorId>
    where
        F: FnMut(&mut Actor) -> bool,
    {
        let mut changed = Vec::new();
        for mut entry in self.actors.iter_mut() {
            if f(entry.value_mut()) {
                let id = *entry.key();
                self.dirty.insert(id);
                changed.push(id);
            }
        }
        changed
    }

    /// Drop `group` from every membership list
    pub fn remove_group_everywhere(&self, group: GroupId) -> Vec<ActorId> {
        self.update_all(|actor| actor.drop_group(group))
    }

    /// Ids of actors holding an active or lapsed membership in `group`
    pub fn members_of(&self, group: GroupId) -> Vec<ActorId> {
        self.actors
            .iter()
            .filter(|entry| entry.groups.contains(&group))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove `id` unless it has unsaved changes
    ///
    /// The dirty check runs under the shard lock, so an edit that lands
    /// concurrently keeps the record resident.
    pub fn remove_clean(&self, id: ActorId) -> Option<Actor> {
        self.actors
            .remove_if(&id, |_, _| !self.dirty.contains(&id))
            .map(|(_, actor)| actor)
    }

    pub fn is_dirty(&self, id: ActorId) -> bool {
        self.dirty.contains(&id)
    }

    pub fn mark_dirty(&self, id: ActorId) {
        self.dirty.insert(id);
    }

    /// Take the dirty set, leaving it empty
    pub fn take_dirty(&self) -> Vec<ActorId> {
        let ids: Vec<ActorId> = self.dirty.iter().map(|id| *id).collect();
        for id in &ids {
            self.dirty.remove(id);
        }
        ids
    }

    pub fn clear_dirty(&self, id: ActorId) {
        self.dirty.remove(&id);
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}
