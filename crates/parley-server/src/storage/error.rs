//! Storage error types.

use thiserror::Error;

/// Errors returned by [`IdentityStore`](super::IdentityStore) operations.
///
/// Absence is never an error: lookups return `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying store failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Key pattern is not a valid glob
    #[error("invalid key pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Pattern as given
        pattern: String,
        /// Parser message
        reason: String,
    },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Compile a store key pattern.
pub(crate) fn compile_pattern(pattern: &str) -> Result<glob::Pattern, StorageError> {
    glob::Pattern::new(pattern).map_err(|e| StorageError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.msg.to_string(),
    })
}
