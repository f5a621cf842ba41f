//! In-memory storage backend

use super::{GroupKey, Storage, StoreDocument};
use crate::model::{normalize_name, Actor, Group};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use warden_core::{ActorId, GroupId};

#[derive(Debug, Default)]
struct Tables {
    actors: HashMap<ActorId, Actor>,
    groups: BTreeMap<GroupId, Group>,
}

/// Storage held entirely in process memory
///
/// Used as the default backend and as the working copy behind
/// [`JsonStorage`](super::JsonStorage).
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a document, keeping the last record for repeated ids
    pub fn from_document(document: StoreDocument) -> Self {
        let storage = Self::new();
        {
            let mut tables = storage.tables.write();
            for group in document.groups {
                tables.groups.insert(group.id, group);
            }
            for actor in document.actors {
                tables.actors.insert(actor.id, actor);
            }
        }
        storage
    }

    /// Copy of every record, ordered by id
    pub fn to_document(&self) -> StoreDocument {
        let tables = self.tables.read();
        let mut actors: Vec<Actor> = tables.actors.values().cloned().collect();
        actors.sort_by_key(|a| a.id);

        StoreDocument {
            version: StoreDocument::VERSION,
            groups: tables.groups.values().cloned().collect(),
            actors,
        }
    }

    pub fn actor_count(&self) -> usize {
        self.tables.read().actors.len()
    }

    pub fn group_count(&self) -> usize {
        self.tables.read().groups.len()
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    fn load_actor(&self, id: ActorId) -> Option<Actor> {
        self.tables.read().actors.get(&id).cloned()
    }

    fn save_actor(&self, actor: &Actor) -> bool {
        self.tables.write().actors.insert(actor.id, actor.clone());
        true
    }

    fn load_group(&self, key: GroupKey<'_>) -> Option<Group> {
        let tables = self.tables.read();
        match key {
            GroupKey::Id(id) => tables.groups.get(&id).cloned(),
            GroupKey::Name(name) => {
                let wanted = normalize_name(name);
                tables.groups.values().find(|g| g.key() == wanted).cloned()
            }
        }
    }

    fn list_groups(&self) -> Vec<Group> {
        self.tables.read().groups.values().cloned().collect()
    }

    fn create_group(&self, group: &Group) -> bool {
        let mut tables = self.tables.write();
        let key = group.key();
        if tables.groups.contains_key(&group.id) || tables.groups.values().any(|g| g.key() == key) {
            return false;
        }
        tables.groups.insert(group.id, group.clone());
        true
    }

    fn save_group(&self, group: &Group) -> bool {
        let mut tables = self.tables.write();
        let key = group.key();
        if tables
            .groups
            .values()
            .any(|g| g.id != group.id && g.key() == key)
        {
            return false;
        }
        tables.groups.insert(group.id, group.clone());
        true
    }

    fn delete_group(&self, id: GroupId) -> bool {
        self.tables.write().groups.remove(&id).is_some()
    }
}
