#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    hash::Hash,
    sync::{Arc, Mutex},
};

use super::{IdentityStore, StorageError, compile_pattern};
use crate::identity::{Group, Identity, IdentityId, Room};

/// In-memory store for tests, simulation and `--storage memory`.
///
/// Member and room sets are kept as unordered `HashSet`s and reconciled on
/// write, mirroring the set primitives of a durable backend. All state is
/// wrapped in Arc<Mutex<>> to allow Clone and concurrent access; uses
/// `lock().expect()` which panics if the mutex is poisoned.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    identities: HashMap<IdentityId, Identity>,
    groups: HashMap<String, GroupRecord>,
    /// Keyed by (group title, room title)
    rooms: HashMap<(String, String), RoomRecord>,
    sequence: i64,
}

#[derive(Default)]
struct GroupRecord {
    rooms: HashSet<String>,
    members: HashSet<IdentityId>,
}

#[derive(Default)]
struct RoomRecord {
    private: bool,
    members: HashSet<IdentityId>,
}

/// Make `stored` equal `desired`: drop stale entries, add missing ones.
fn reconcile<T: Eq + Hash + Ord + Clone>(stored: &mut HashSet<T>, desired: &BTreeSet<T>) {
    stored.retain(|item| desired.contains(item));
    for item in desired {
        if !stored.contains(item) {
            stored.insert(item.clone());
        }
    }
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryStoreInner::default())) }
    }

    /// Number of stored identities.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn identity_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").identities.len()
    }

    /// Number of stored groups.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn group_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").groups.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityStore for MemoryStore {
    #[allow(clippy::expect_used)]
    fn exists(&self, id: IdentityId) -> Result<bool, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").identities.contains_key(&id))
    }

    #[allow(clippy::expect_used)]
    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let pattern = compile_pattern(pattern)?;
        let inner = self.inner.lock().expect("Mutex poisoned");

        let users = inner.identities.values().map(Identity::store_key);
        let groups = inner.groups.keys().map(|title| format!("group:{title}"));
        let rooms = inner.rooms.keys().map(|(group, room)| format!("room:{group}/{room}"));

        Ok(users.chain(groups).chain(rooms).filter(|key| pattern.matches(key)).collect())
    }

    #[allow(clippy::expect_used)]
    fn read_identity(&self, id: IdentityId) -> Result<Option<Identity>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").identities.get(&id).cloned())
    }

    #[allow(clippy::expect_used)]
    fn write_identity(&self, identity: &Identity) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn delete_identity(&self, id: IdentityId) -> Result<(), StorageError> {
        self.inner.lock().expect("Mutex poisoned").identities.remove(&id);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn read_group(&self, title: &str) -> Result<Option<Group>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.groups.get(title).map(|record| Group {
            title: title.to_string(),
            rooms: record.rooms.iter().cloned().collect(),
            members: record.members.iter().copied().collect(),
        }))
    }

    #[allow(clippy::expect_used)]
    fn write_group(&self, group: &Group) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let record = inner.groups.entry(group.title.clone()).or_default();
        reconcile(&mut record.rooms, &group.rooms);
        reconcile(&mut record.members, &group.members);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn read_room(&self, group: &str, room: &str) -> Result<Option<Room>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        let key = (group.to_string(), room.to_string());
        Ok(inner.rooms.get(&key).map(|record| Room {
            title: room.to_string(),
            group: group.to_string(),
            private: record.private,
            members: record.members.iter().copied().collect(),
        }))
    }

    #[allow(clippy::expect_used)]
    fn write_room(&self, room: &Room) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let record = inner.rooms.entry((room.group.clone(), room.title.clone())).or_default();
        record.private = room.private;
        reconcile(&mut record.members, &room.members);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn next_unique_sequence(&self) -> Result<i64, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.sequence += 1;
        Ok(inner.sequence)
    }
}
