//! Error types for the permission engine

use crate::graph::GraphError;
use thiserror::Error;

/// Rejected mutation; nothing was changed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Edge would make a group its own ancestor
    #[error("Cyclic inheritance: {0}")]
    CyclicInheritance(String),

    /// Group name already taken (names compare case-insensitively)
    #[error("Duplicate group name: {0}")]
    DuplicateGroup(String),

    /// Malformed permission node
    #[error("Invalid permission: {0:?}")]
    InvalidPermission(String),

    /// Malformed group name
    #[error("Invalid group name: {0:?}")]
    InvalidGroupName(String),

    /// Operation names a group that does not exist
    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    /// Empty or malformed context key
    #[error("Invalid context key: {0:?}")]
    InvalidContext(String),

    /// Temporary grant with a zero or negative lifetime
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
}

/// Permission engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Mutation rejected
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Persisted group graph is unusable (cycle, duplicate identity)
    #[error("Inconsistent group graph: {0}")]
    InconsistentGraph(String),

    /// Engine has not been activated or was shut down
    #[error("Engine is not active")]
    NotActive,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<GraphError> for AuthzError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CircularDependency(path) => {
                AuthzError::Validation(ValidationError::CyclicInheritance(path))
            }
            GraphError::DuplicateGroup(name) => {
                AuthzError::Validation(ValidationError::DuplicateGroup(name))
            }
            GraphError::InvalidGroup(name) => {
                AuthzError::Validation(ValidationError::InvalidGroupName(name))
            }
            GraphError::UnknownGroup(id) => {
                AuthzError::Validation(ValidationError::UnknownGroup(id))
            }
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, AuthzError>;
