//! Room addressing grammar.
//!
//! A room path names one room inside one group: `#group/#room`. It must start
//! with [`ROOM_SIGIL`] and contain exactly one `/` with a non-empty title on
//! each side.

use std::{fmt, str::FromStr};

use crate::errors::ProtocolError;

/// Leading character that marks a destination as room-addressable.
pub const ROOM_SIGIL: char = '#';

/// Group that always exists and that every session is admitted to.
pub const DEFAULT_GROUP: &str = "#default";

/// Room inside [`DEFAULT_GROUP`] that always exists.
pub const DEFAULT_ROOM: &str = "#general";

/// Separator between group and room titles.
const SEPARATOR: char = '/';

/// Whether `token` is syntactically marked as a room destination.
///
/// Only checks the sigil. Callers parse with [`RoomPath::parse`] to enforce
/// the single separator.
pub fn is_room_name(token: &str) -> bool {
    token.starts_with(ROOM_SIGIL)
}

/// A validated `#group/#room` destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomPath {
    group: String,
    room: String,
}

impl RoomPath {
    /// Parse a destination token.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidRoomPath` if the sigil is missing, the token
    ///   does not contain exactly one separator, or either half is empty
    pub fn parse(token: &str) -> Result<Self, ProtocolError> {
        if !is_room_name(token) {
            return Err(ProtocolError::InvalidRoomPath(token.to_string()));
        }

        let mut parts = token.split(SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(group), Some(room), None) if !group.is_empty() && !room.is_empty() => {
                // A lone sigil is not a group title.
                if group.len() == ROOM_SIGIL.len_utf8() {
                    return Err(ProtocolError::InvalidRoomPath(token.to_string()));
                }
                Ok(Self { group: group.to_string(), room: room.to_string() })
            },
            _ => Err(ProtocolError::InvalidRoomPath(token.to_string())),
        }
    }

    /// Build a path from already-trusted titles.
    pub fn new(group: impl Into<String>, room: impl Into<String>) -> Self {
        Self { group: group.into(), room: room.into() }
    }

    /// The path of the room every session starts in.
    pub fn default_room() -> Self {
        Self::new(DEFAULT_GROUP, DEFAULT_ROOM)
    }

    /// Group title, including the sigil.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Room title.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Whether this path lives in [`DEFAULT_GROUP`].
    pub fn in_default_group(&self) -> bool {
        self.group == DEFAULT_GROUP
    }
}

impl fmt::Display for RoomPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.group, self.room)
    }
}

impl FromStr for RoomPath {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
