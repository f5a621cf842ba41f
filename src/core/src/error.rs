//! Error types shared across Warden crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Identifier could not be parsed
    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    /// Create an invalid identifier error
    pub fn invalid_id<S: Into<String>>(msg: S) -> Self {
        CoreError::InvalidId(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_id("not-a-uuid");
        assert_eq!(err.to_string(), "Invalid identifier: not-a-uuid");
    }
}
