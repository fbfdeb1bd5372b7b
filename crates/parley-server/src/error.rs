//! Server error types.

use std::fmt;

use crate::{config::ConfigError, directory::DirectoryError, storage::StorageError};

/// Errors that can occur in the server runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (unreadable file, invalid bind address, etc.).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Transport/network error (bind failure, handshake failure, I/O error).
    ///
    /// Fatal for the listener when it happens at bind time; per-connection
    /// otherwise.
    Transport(String),

    /// Store or directory failure.
    ///
    /// Fatal at startup (no default space). During a session the engine maps
    /// these to a `500` response instead.
    Storage(DirectoryError),

    /// Internal error (unexpected state, logic bug, etc.).
    ///
    /// Should never happen in correct implementation. Indicates a bug.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DirectoryError> for ServerError {
    fn from(err: DirectoryError) -> Self {
        Self::Storage(err)
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(DirectoryError::Storage(err))
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn display_prefixes_category() {
        assert_eq!(
            ServerError::Config("bad bind".into()).to_string(),
            "configuration error: bad bind"
        );
        assert_eq!(
            ServerError::from(StorageError::Io("disk gone".into())).to_string(),
            "storage error: Storage error: I/O error: disk gone"
        );
    }

    #[test]
    fn storage_error_has_source() {
        let err = ServerError::from(DirectoryError::GroupNotFound("#x".into()));
        assert!(err.source().is_some());
        assert!(ServerError::Internal("x".into()).source().is_none());
    }
}
