//! Startup-time backend registry

use super::{JsonStorage, MemoryStorage, Storage};
use crate::config::StorageSection;
use crate::error::{AuthzError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Constructor for a storage backend
pub type StorageFactory = fn(&StorageSection) -> Result<Arc<dyn Storage>>;

/// Name → constructor table
///
/// Pre-registered with `memory` and `json`. Hosts may register more before
/// building the engine.
pub struct StorageRegistry {
    factories: HashMap<String, StorageFactory>,
}

impl StorageRegistry {
    /// Empty registry
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register `factory` under `name`, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, factory: StorageFactory) {
        self.factories.insert(name.into().to_lowercase(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the backend named by `config.backend`
    pub fn create(&self, config: &StorageSection) -> Result<Arc<dyn Storage>> {
        let name = config.backend.to_lowercase();
        let factory = self.factories.get(&name).ok_or_else(|| {
            AuthzError::Config(format!(
                "Unknown storage backend '{}' (available: {})",
                config.backend,
                self.names().join(", ")
            ))
        })?;

        let storage = factory(config)?;
        info!("Storage backend '{}' ready", storage.name());
        Ok(storage)
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", memory_factory);
        registry.register("json", json_factory);
        registry
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

fn memory_factory(_: &StorageSection) -> Result<Arc<dyn Storage>> {
    Ok(Arc::new(MemoryStorage::new()))
}

fn json_factory(config: &StorageSection) -> Result<Arc<dyn Storage>> {
    let path = config.path.as_ref().ok_or_else(|| {
        AuthzError::Config("storage.path is required for the 'json' backend".to_string())
    })?;
    Ok(Arc::new(JsonStorage::open(path)?))
}
