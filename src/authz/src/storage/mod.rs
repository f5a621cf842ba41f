//! Persistence seam
//!
//! The engine reads and writes through one narrow, synchronous interface.
//! Backends report failures as `false`/absent and log them; the engine never
//! retries. Backends are chosen at startup from a [`StorageRegistry`].

mod json;
mod memory;
mod registry;

pub use json::JsonStorage;
pub use memory::MemoryStorage;
pub use registry::{StorageFactory, StorageRegistry};

use crate::model::{Actor, Group};
use serde::{Deserialize, Serialize};
use warden_core::{ActorId, GroupId};

/// How a group is looked up in storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey<'a> {
    /// Case-insensitive name
    Name(&'a str),
    Id(GroupId),
}

/// Persistence backend for actors and groups
pub trait Storage: Send + Sync {
    /// Backend name as registered
    fn name(&self) -> &str;

    /// Load one actor; `None` if never saved
    fn load_actor(&self, id: ActorId) -> Option<Actor>;

    /// Persist one actor
    fn save_actor(&self, actor: &Actor) -> bool;

    /// Load one group
    fn load_group(&self, key: GroupKey<'_>) -> Option<Group>;

    /// Every persisted group
    fn list_groups(&self) -> Vec<Group>;

    /// Persist a group the graph just created; `false` if the name or id is taken
    fn create_group(&self, group: &Group) -> bool;

    /// Persist changes to an existing or new group
    fn save_group(&self, group: &Group) -> bool;

    /// Remove a group; `false` if it was not persisted
    fn delete_group(&self, id: GroupId) -> bool;
}

/// On-disk document shared by the file backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub actors: Vec<Actor>,
}

fn default_version() -> u32 {
    StoreDocument::VERSION
}

impl StoreDocument {
    /// Current document format version
    pub const VERSION: u32 = 1;
}
