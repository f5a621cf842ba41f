//! Single-document JSON storage backend
//!
//! Keeps a working copy in memory and rewrites the whole document on every
//! successful save. Writes go to a sibling temp file that is then renamed
//! over the target, so a crash mid-write leaves the previous document intact.

use super::{GroupKey, MemoryStorage, Storage, StoreDocument};
use crate::error::{AuthzError, Result};
use crate::model::{Actor, Group};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use warden_core::{ActorId, GroupId};

/// JSON-file storage
#[derive(Debug)]
pub struct JsonStorage {
    path: PathBuf,
    inner: MemoryStorage,
    write_lock: Mutex<()>,
}

impl JsonStorage {
    /// Open `path`, starting empty if the file does not exist
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed, or if its
    /// format version is newer than this build understands.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let document = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                StoreDocument::default()
            } else {
                serde_json::from_str::<StoreDocument>(&contents)?
            }
        } else {
            StoreDocument::default()
        };

        if document.version > StoreDocument::VERSION {
            return Err(AuthzError::Storage(format!(
                "{} has format version {}, newest supported is {}",
                path.display(),
                document.version,
                StoreDocument::VERSION
            )));
        }

        info!(
            "Opened JSON storage at {} ({} groups, {} actors)",
            path.display(),
            document.groups.len(),
            document.actors.len()
        );

        Ok(Self {
            path,
            inner: MemoryStorage::from_document(document),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the working copy to disk
    pub fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        let document = self.inner.to_document();
        let encoded = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.temp_path();
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "warden".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist_logged(&self) -> bool {
        match self.persist() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write {}: {}", self.path.display(), e);
                false
            }
        }
    }
}

impl Storage for JsonStorage {
    fn name(&self) -> &str {
        "json"
    }

    fn load_actor(&self, id: ActorId) -> Option<Actor> {
        self.inner.load_actor(id)
    }

    fn save_actor(&self, actor: &Actor) -> bool {
        self.inner.save_actor(actor) && self.persist_logged()
    }

    fn load_group(&self, key: GroupKey<'_>) -> Option<Group> {
        self.inner.load_group(key)
    }

    fn list_groups(&self) -> Vec<Group> {
        self.inner.list_groups()
    }

    fn create_group(&self, group: &Group) -> bool {
        self.inner.create_group(group) && self.persist_logged()
    }

    fn save_group(&self, group: &Group) -> bool {
        self.inner.save_group(group) && self.persist_logged()
    }

    fn delete_group(&self, id: GroupId) -> bool {
        self.inner.delete_group(id) && self.persist_logged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::open(dir.path().join("perms.json")).unwrap();
        assert!(storage.list_groups().is_empty());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("perms.json");
        let now = Utc::now();

        let parent = Group::new(GroupId(0), "default", now).as_default();
        let child = Group::new(GroupId(1), "admin", now)
            .with_priority(10)
            .with_permission("server.*")
            .with_parent(GroupId(0));

        let mut actor = Actor::new(ActorId::generate(), "alice", now);
        actor.permissions.insert("-chat.mute".to_string());
        actor.groups = vec![GroupId(1), GroupId(0)];
        actor
            .temporary_permissions
            .insert("fly".to_string(), now + Duration::seconds(30));
        actor.temporary_groups.insert(GroupId(1), now + Duration::hours(1));
        actor
            .context_permissions
            .entry("nether".to_string())
            .or_default()
            .insert("build".to_string());
        actor.display.prefix = Some("[A]".to_string());

        {
            let storage = JsonStorage::open(&path).unwrap();
            assert!(storage.create_group(&parent));
            assert!(storage.create_group(&child));
            assert!(storage.save_actor(&actor));
        }

        let reopened = JsonStorage::open(&path).unwrap();
        assert_eq!(reopened.load_actor(actor.id), Some(actor));
        assert_eq!(reopened.list_groups(), vec![parent, child]);
        assert!(!dir.path().join("nested").join("perms.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perms.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(JsonStorage::open(&path), Err(AuthzError::Json(_))));
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perms.json");
        fs::write(&path, r#"{"version": 99}"#).unwrap();
        assert!(matches!(JsonStorage::open(&path), Err(AuthzError::Storage(_))));
    }
}
