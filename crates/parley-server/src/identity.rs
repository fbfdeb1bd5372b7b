//! Identities, groups and rooms.
//!
//! These are the persisted entities. Groups and rooms hold member *ids*;
//! the full identity is resolved through the store (or the session registry
//! for live sessions) when needed.

use std::{collections::BTreeSet, fmt, str::FromStr};

use parley_proto::RoomPath;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unique identity id.
///
/// Rendered as 32 lowercase hex digits on the wire and in store keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(u128);

impl IdentityId {
    /// Wrap a raw id.
    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn get(self) -> u128 {
        self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Error parsing an [`IdentityId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identity id: {0:?}")]
pub struct ParseIdentityIdError(String);

impl FromStr for IdentityId {
    type Err = ParseIdentityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(ParseIdentityIdError(s.to_string()));
        }
        u128::from_str_radix(s, 16).map(Self).map_err(|_| ParseIdentityIdError(s.to_string()))
    }
}

impl Serialize for IdentityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IdentityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Account kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// Ephemeral account created on connect
    Guest,
    /// Stored account with credentials
    Registered,
    /// Stored account with operator rights
    Admin,
}

impl IdentityKind {
    /// Name used in store keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Registered => "registered",
            Self::Admin => "admin",
        }
    }
}

/// A human or guest account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique id
    pub id: IdentityId,
    /// Account kind
    pub kind: IdentityKind,
    /// Name shown to other users
    pub display_name: String,
    /// Name used to authenticate
    pub login_name: String,
    /// Contact address, may be empty
    #[serde(default)]
    pub email: String,
    /// Argon2 PHC string (salt embedded); empty for guests
    #[serde(default)]
    pub password_hash: String,
    /// Whether a session is currently bound to this identity
    pub connected: bool,
    /// Whether the identity passed authentication
    pub authorized: bool,
    /// Room paths the identity is a member of (`#group/#room`)
    #[serde(default)]
    pub rooms: BTreeSet<String>,
    /// Group titles the identity is a member of
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl Identity {
    /// Fresh guest named `guest<seq>`.
    pub fn guest(id: IdentityId, seq: i64) -> Self {
        let name = format!("guest{seq}");
        Self {
            id,
            kind: IdentityKind::Guest,
            display_name: name.clone(),
            login_name: name,
            email: String::new(),
            password_hash: String::new(),
            connected: true,
            authorized: false,
            rooms: BTreeSet::new(),
            groups: BTreeSet::new(),
        }
    }

    /// Stored account with a precomputed password hash.
    pub fn registered(
        id: IdentityId,
        login_name: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        let login_name = login_name.into();
        Self {
            id,
            kind: IdentityKind::Registered,
            display_name: login_name.clone(),
            login_name,
            email: String::new(),
            password_hash: password_hash.into(),
            connected: false,
            authorized: false,
            rooms: BTreeSet::new(),
            groups: BTreeSet::new(),
        }
    }

    /// Whether this is a guest account.
    pub fn is_guest(&self) -> bool {
        self.kind == IdentityKind::Guest
    }

    /// Store key: `user:<kind>:<login>:<id>`.
    pub fn store_key(&self) -> String {
        format!("user:{}:{}:{}", self.kind.as_str(), self.login_name, self.id)
    }
}

/// A namespace of rooms with its own member list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Title, including the sigil
    pub title: String,
    /// Titles of rooms in this group
    pub rooms: BTreeSet<String>,
    /// Member ids
    pub members: BTreeSet<IdentityId>,
}

impl Group {
    /// Empty group.
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), rooms: BTreeSet::new(), members: BTreeSet::new() }
    }

    /// Store key: `group:<title>`.
    pub fn store_key(&self) -> String {
        format!("group:{}", self.title)
    }
}

/// A broadcast channel inside a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Title, including the sigil
    pub title: String,
    /// Title of the owning group
    pub group: String,
    /// Whether joining and messaging require prior membership
    pub private: bool,
    /// Member ids
    pub members: BTreeSet<IdentityId>,
}

impl Room {
    /// Empty public room.
    pub fn new(group: impl Into<String>, title: impl Into<String>) -> Self {
        Self { title: title.into(), group: group.into(), private: false, members: BTreeSet::new() }
    }

    /// `#group/#room` path of this room.
    pub fn path(&self) -> RoomPath {
        RoomPath::new(self.group.clone(), self.title.clone())
    }

    /// Store key: `room:<group>/<room>`.
    pub fn store_key(&self) -> String {
        format!("room:{}", self.path())
    }
}
