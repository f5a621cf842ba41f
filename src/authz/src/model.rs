//! Actor and group records
//!
//! Plain data. Behaviour lives in the graph, resolver and engine services;
//! the helpers here only answer questions about a single record at a given
//! instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use warden_core::{ActorId, GroupId};

/// Display overrides for an actor (carried as data, never consulted by resolution)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Presentation attributes of a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDisplay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An identity whose permissions are resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Unique identity
    pub id: ActorId,

    /// Last known name
    pub name: String,

    /// Direct grants and `-` denials
    #[serde(default)]
    pub permissions: HashSet<String>,

    /// Time-limited grants: node → absolute expiry
    #[serde(default)]
    pub temporary_permissions: HashMap<String, DateTime<Utc>>,

    /// Group memberships in insertion order
    #[serde(default)]
    pub groups: Vec<GroupId>,

    /// Memberships that lapse: group → absolute expiry
    #[serde(default)]
    pub temporary_groups: HashMap<GroupId, DateTime<Utc>>,

    /// Grants scoped to a context key (world or server name)
    #[serde(default)]
    pub context_permissions: HashMap<String, HashSet<String>>,

    #[serde(default)]
    pub display: DisplayOverrides,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Actor {
    /// Create an actor with no grants or memberships
    pub fn new(id: ActorId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            permissions: HashSet::new(),
            temporary_permissions: HashMap::new(),
            groups: Vec::new(),
            temporary_groups: HashMap::new(),
            context_permissions: HashMap::new(),
            display: DisplayOverrides::default(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Whether `group` is a membership that has not lapsed at `now`
    pub fn is_active_member(&self, group: GroupId, now: DateTime<Utc>) -> bool {
        if !self.groups.contains(&group) {
            return false;
        }
        match self.temporary_groups.get(&group) {
            Some(expiry) => *expiry > now,
            None => true,
        }
    }

    /// Memberships that have not lapsed at `now`, in insertion order
    pub fn active_groups(&self, now: DateTime<Utc>) -> Vec<GroupId> {
        self.groups
            .iter()
            .copied()
            .filter(|group| match self.temporary_groups.get(group) {
                Some(expiry) => *expiry > now,
                None => true,
            })
            .collect()
    }

    /// Temporary grants still in force at `now`
    pub fn active_temporary_permissions(
        &self,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = (&String, &DateTime<Utc>)> {
        self.temporary_permissions
            .iter()
            .filter(move |(_, expiry)| **expiry > now)
    }

    /// Earliest instant after `now` at which a temporary grant or membership lapses
    pub fn next_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.temporary_permissions
            .values()
            .chain(self.temporary_groups.values())
            .filter(|expiry| **expiry > now)
            .min()
            .copied()
    }

    /// Drop every grant and membership that lapsed at or before `now`
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before_perms = self.temporary_permissions.len();
        self.temporary_permissions.retain(|_, expiry| *expiry > now);

        let expired_groups: Vec<GroupId> = self
            .temporary_groups
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(group, _)| *group)
            .collect();

        for group in &expired_groups {
            self.temporary_groups.remove(group);
            self.groups.retain(|g| g != group);
        }

        let removed = (before_perms - self.temporary_permissions.len()) + expired_groups.len();
        if removed > 0 {
            self.modified_at = now;
        }
        removed
    }

    /// Remove a membership and any expiry attached to it
    pub fn drop_group(&mut self, group: GroupId) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| *g != group);
        self.temporary_groups.remove(&group);
        self.groups.len() != before
    }
}

/// A named, prioritized bundle of permissions with optional parents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Unique numeric id
    pub id: GroupId,

    /// Unique name (compared case-insensitively)
    pub name: String,

    /// Higher priority resolves first and wins the primary slot
    #[serde(default)]
    pub priority: i32,

    /// Direct grants and `-` denials
    #[serde(default)]
    pub permissions: HashSet<String>,

    /// Parent groups, looked up by id; a group does not own its parents
    #[serde(default)]
    pub parents: Vec<GroupId>,

    /// Auto-assigned to newly created actors
    #[serde(default)]
    pub is_default: bool,

    #[serde(default)]
    pub display: GroupDisplay,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Group {
    /// Create an empty group
    pub fn new(id: GroupId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            priority: 0,
            permissions: HashSet::new(),
            parents: Vec::new(),
            is_default: false,
            display: GroupDisplay::default(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Set priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a direct permission
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Add a parent edge
    pub fn with_parent(mut self, parent: GroupId) -> Self {
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
        self
    }

    /// Mark as a default group
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Lower-cased name used for lookups
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Name shown to users
    pub fn display_name(&self) -> &str {
        self.display.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Canonical form of a group name for case-insensitive lookup
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
