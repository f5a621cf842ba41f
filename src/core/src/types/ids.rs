//! Actor and group identifiers

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an actor (a player, a service account, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub Uuid);

impl ActorId {
    /// Create an actor ID from a UUID
    pub fn new(id: Uuid) -> Self {
        ActorId(id)
    }

    /// Generate a random actor ID
    pub fn generate() -> Self {
        ActorId(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActorId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(ActorId)
            .map_err(|e| CoreError::invalid_id(format!("{}: {}", s, e)))
    }
}

impl From<Uuid> for ActorId {
    fn from(id: Uuid) -> Self {
        ActorId(id)
    }
}

/// Unique numeric identifier for a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl GroupId {
    /// Create a group ID
    pub fn new(id: u32) -> Self {
        GroupId(id)
    }

    /// Get the raw numeric value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The identifier following this one
    pub fn next(&self) -> Self {
        GroupId(self.0.saturating_add(1))
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for GroupId {
    fn from(id: u32) -> Self {
        GroupId(id)
    }
}
