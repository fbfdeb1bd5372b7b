//! Group and room directory.
//!
//! Reads and writes Group and Room aggregates through the store and keeps
//! the membership graph consistent:
//!
//! - the default group and default room always exist (created at
//!   [`Directory::open`])
//! - every room member is a member of the owning group
//! - every membership change is written through, and writing the same sets
//!   again is a no-op for the store
//!
//! Read-modify-write membership changes are serialized by a directory-wide
//! mutation lock so two connections joining one room cannot lose an update.
//! Group and room writes are separate store calls and are not transactional:
//! a crash between them can leave a group listing a room that has no record.

use parking_lot::Mutex;
use parley_proto::{DEFAULT_GROUP, DEFAULT_ROOM, RoomPath};

use crate::{
    identity::{Group, Identity, Room},
    storage::{IdentityStore, StorageError},
};

/// Errors from directory operations
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Store call failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Room requested in a group that was never created
    #[error("Group not found: {0}")]
    GroupNotFound(String),
}

/// Builds, reads and persists groups and rooms.
pub struct Directory<S: IdentityStore> {
    store: S,
    /// Serializes membership read-modify-write sequences
    mutation: Mutex<()>,
}

impl<S: IdentityStore> Directory<S> {
    /// Open the directory and bootstrap the default space.
    ///
    /// Loads or creates `#default` and `#default/#general` and persists both.
    /// Existing members are kept, so reopening is idempotent.
    ///
    /// # Errors
    ///
    /// Any storage failure. The server must not start without a default
    /// space.
    pub fn open(store: S) -> Result<Self, DirectoryError> {
        let directory = Self { store, mutation: Mutex::new(()) };

        let group = directory.get_group(DEFAULT_GROUP)?.unwrap_or_else(|| Group::new(DEFAULT_GROUP));
        directory.write_group(&group)?;
        let room = directory.new_or_existing_room_unlocked(&RoomPath::default_room())?;
        directory.write_room(&room)?;

        tracing::debug!(group = DEFAULT_GROUP, room = DEFAULT_ROOM, "default space ready");
        Ok(directory)
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether `token` is marked as a room destination.
    pub fn is_room_name(token: &str) -> bool {
        parley_proto::is_room_name(token)
    }

    /// Load a group. `None` if it was never created.
    pub fn get_group(&self, title: &str) -> Result<Option<Group>, DirectoryError> {
        Ok(self.store.read_group(title)?)
    }

    /// Empty in-memory group. Not persisted.
    pub fn new_group(&self, title: &str) -> Group {
        Group::new(title)
    }

    /// Persist a group, reconciling member and room sets.
    pub fn write_group(&self, group: &Group) -> Result<(), DirectoryError> {
        Ok(self.store.write_group(group)?)
    }

    /// Load a room. `None` if the room or its group is absent.
    pub fn get_room(&self, path: &RoomPath) -> Result<Option<Room>, DirectoryError> {
        if self.get_group(path.group())?.is_none() {
            return Ok(None);
        }
        Ok(self.store.read_room(path.group(), path.room())?)
    }

    /// Existing room, or a new empty public room attached to its group.
    ///
    /// A new room is recorded in the group's room list and the group is
    /// persisted; the room itself is persisted too.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::GroupNotFound` if the group is absent
    pub fn new_or_existing_room(&self, path: &RoomPath) -> Result<Room, DirectoryError> {
        let _guard = self.mutation.lock();
        self.new_or_existing_room_unlocked(path)
    }

    /// Persist a room, reconciling its member set.
    pub fn write_room(&self, room: &Room) -> Result<(), DirectoryError> {
        Ok(self.store.write_room(room)?)
    }

    /// Add an identity to the default group and default room.
    ///
    /// Persists group, room and identity.
    pub fn admit_to_default(&self, identity: &mut Identity) -> Result<(), DirectoryError> {
        let _guard = self.mutation.lock();

        let mut group =
            self.get_group(DEFAULT_GROUP)?.unwrap_or_else(|| Group::new(DEFAULT_GROUP));
        group.members.insert(identity.id);
        self.write_group(&group)?;

        let path = RoomPath::default_room();
        let mut room = self.new_or_existing_room_unlocked(&path)?;
        room.members.insert(identity.id);
        self.write_room(&room)?;

        identity.groups.insert(DEFAULT_GROUP.to_string());
        identity.rooms.insert(path.to_string());
        Ok(self.store.write_identity(identity)?)
    }

    /// Add an identity to a room, creating the room if needed.
    ///
    /// The caller has already checked group membership. Re-joining is a
    /// no-op apart from the (idempotent) writes.
    pub fn join_room(&self, identity: &mut Identity, path: &RoomPath) -> Result<Room, DirectoryError> {
        let _guard = self.mutation.lock();

        let mut room = self.new_or_existing_room_unlocked(path)?;
        room.members.insert(identity.id);
        self.write_room(&room)?;

        identity.rooms.insert(path.to_string());
        self.store.write_identity(identity)?;
        Ok(room)
    }

    /// Remove an identity from a room.
    ///
    /// Returns `false` (and writes nothing) if the room is absent or the
    /// identity was not a member.
    pub fn part_room(&self, identity: &mut Identity, path: &RoomPath) -> Result<bool, DirectoryError> {
        let _guard = self.mutation.lock();

        let Some(mut room) = self.get_room(path)? else {
            return Ok(false);
        };
        if !room.members.remove(&identity.id) {
            return Ok(false);
        }
        self.write_room(&room)?;

        identity.rooms.remove(&path.to_string());
        self.store.write_identity(identity)?;
        Ok(true)
    }

    /// Remove an identity from every group and room in its sets.
    ///
    /// Rooms are purged before groups, so a failure part-way never leaves a
    /// room member outside its group. The identity record is left alone.
    pub fn purge_identity(&self, identity: &Identity) -> Result<(), DirectoryError> {
        let _guard = self.mutation.lock();
        self.purge_identity_unlocked(identity)
    }

    /// Purge an identity's memberships, then delete it from the store.
    pub fn remove_identity(&self, identity: &Identity) -> Result<(), DirectoryError> {
        let _guard = self.mutation.lock();
        self.purge_identity_unlocked(identity)?;
        Ok(self.store.delete_identity(identity.id)?)
    }

    fn purge_identity_unlocked(&self, identity: &Identity) -> Result<(), DirectoryError> {
        for raw in &identity.rooms {
            let Ok(path) = RoomPath::parse(raw) else {
                tracing::warn!(id = %identity.id, room = %raw, "skipping unparseable room path");
                continue;
            };
            if let Some(mut room) = self.get_room(&path)? {
                if room.members.remove(&identity.id) {
                    self.write_room(&room)?;
                }
            }
        }

        for title in &identity.groups {
            if let Some(mut group) = self.get_group(title)? {
                if group.members.remove(&identity.id) {
                    self.write_group(&group)?;
                }
            }
        }
        Ok(())
    }

    fn new_or_existing_room_unlocked(&self, path: &RoomPath) -> Result<Room, DirectoryError> {
        let Some(mut group) = self.get_group(path.group())? else {
            return Err(DirectoryError::GroupNotFound(path.group().to_string()));
        };

        if let Some(room) = self.store.read_room(path.group(), path.room())? {
            return Ok(room);
        }

        let room = Room::new(path.group(), path.room());
        group.rooms.insert(room.title.clone());
        self.write_group(&group)?;
        self.write_room(&room)?;

        tracing::debug!(room = %path, "room created");
        Ok(room)
    }
}
