//! Inbound envelopes.
//!
//! One envelope is one JSON object carrying an action and its parameters.
//! Missing fields default to empty so that shape validation reports the
//! problem that matters (usually the timestamp) instead of a serde error.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Actions a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Trade the current identity for a stored one
    Authenticate,
    /// Send a message to one identity or to a room
    Msg,
    /// Join a room
    Join,
    /// Leave a room
    Part,
    /// Synonym for [`Action::Part`]
    Leave,
}

impl Action {
    /// Wire name of the action.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::Msg => "msg",
            Self::Join => "join",
            Self::Part => "part",
            Self::Leave => "leave",
        }
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "authenticate" => Ok(Self::Authenticate),
            "msg" => Ok(Self::Msg),
            "join" => Ok(Self::Join),
            "part" => Ok(Self::Part),
            "leave" => Ok(Self::Leave),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials carried by an `authenticate` envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Login name of the stored identity
    #[serde(default)]
    pub account_name: String,
    /// Plaintext password, verified against the stored hash
    #[serde(default)]
    pub password: String,
}

/// One inbound protocol message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Requested action, validated lazily by [`Envelope::action`]
    #[serde(default)]
    pub action: String,
    /// Client timestamp in unix seconds
    #[serde(default)]
    pub time: i64,
    /// Destination: identity id or room path
    #[serde(default)]
    pub to: String,
    /// Room path for `join` and `part`
    #[serde(default)]
    pub room: String,
    /// Message body
    #[serde(default)]
    pub message: String,
    /// Credentials for `authenticate`
    #[serde(default)]
    pub user: AuthToken,
}

impl Envelope {
    /// Decode and shape-check a raw frame.
    ///
    /// The action string is kept as-is; unknown actions are reported by
    /// [`Envelope::action`] so the server can apply its authorization gate
    /// before dispatch.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Malformed` if the frame is not an envelope object
    /// - `ProtocolError::InvalidTime` if `time` is missing or not positive
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(raw)?;
        if envelope.time <= 0 {
            return Err(ProtocolError::InvalidTime(envelope.time));
        }
        Ok(envelope)
    }

    /// Encode as a JSON frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Malformed` if serialization fails
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the action field.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownAction` for anything outside [`Action`]
    pub fn action(&self) -> Result<Action> {
        self.action.parse()
    }

    /// Destination of a membership action: `room`, falling back to `to`.
    pub fn room_target(&self) -> &str {
        if self.room.is_empty() { &self.to } else { &self.room }
    }
}
