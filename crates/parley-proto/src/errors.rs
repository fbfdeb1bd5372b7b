//! Protocol-level error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding or validating inbound frames.
///
/// Every variant is a client bug, not abuse: the server answers with
/// `BadRequestOrObject` and leaves the ban score untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is not a JSON object of the envelope shape
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// Timestamp missing or not a positive unix time
    #[error("invalid timestamp: {0}")]
    InvalidTime(i64),

    /// Action string is not one the server understands
    #[error("unknown action: {0:?}")]
    UnknownAction(String),

    /// Destination does not follow the `#group/#room` grammar
    #[error("invalid room path: {0:?}")]
    InvalidRoomPath(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
