//! Redb-backed durable store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Identities are CBOR records; group and room member sets live in multimap
//! tables so that writes can reconcile entry by entry.

use std::{collections::BTreeSet, fmt::Display, path::Path, sync::Arc};

use redb::{
    Database, MultimapTable, MultimapTableDefinition, ReadableMultimapTable, ReadableTable,
    TableDefinition,
};

use super::{IdentityStore, StorageError, compile_pattern};
use crate::identity::{Group, Identity, IdentityId, Room};

/// Table: identities
/// Key: identity id (32 hex digits)
/// Value: CBOR-encoded Identity
const IDENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("identities");

/// Table: user_keys
/// Key: identity id (32 hex digits)
/// Value: `user:<kind>:<login>:<id>` key of that identity
const USER_KEYS: TableDefinition<&str, &str> = TableDefinition::new("user_keys");

/// Table: groups
/// Key: group title
const GROUPS: TableDefinition<&str, ()> = TableDefinition::new("groups");

/// Multimap: group title -> member id
const GROUP_MEMBERS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("group_members");

/// Multimap: group title -> room title
const GROUP_ROOMS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("group_rooms");

/// Table: rooms
/// Key: `<group>/<room>` path
/// Value: private flag
const ROOMS: TableDefinition<&str, bool> = TableDefinition::new("rooms");

/// Multimap: room path -> member id
const ROOM_MEMBERS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("room_members");

/// Table: meta
/// Key: counter name
/// Value: last value handed out
const META: TableDefinition<&str, i64> = TableDefinition::new("meta");

const SEQUENCE_KEY: &str = "sequence";

fn io_err(e: impl Display) -> StorageError {
    StorageError::Io(e.to_string())
}

/// Durable store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates every table if missing, so later read transactions never see
    /// a missing table.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        let txn = db.begin_write().map_err(io_err)?;
        {
            let _ = txn.open_table(IDENTITIES).map_err(io_err)?;
            let _ = txn.open_table(USER_KEYS).map_err(io_err)?;
            let _ = txn.open_table(GROUPS).map_err(io_err)?;
            let _ = txn.open_multimap_table(GROUP_MEMBERS).map_err(io_err)?;
            let _ = txn.open_multimap_table(GROUP_ROOMS).map_err(io_err)?;
            let _ = txn.open_table(ROOMS).map_err(io_err)?;
            let _ = txn.open_multimap_table(ROOM_MEMBERS).map_err(io_err)?;
            let _ = txn.open_table(META).map_err(io_err)?;
        }
        txn.commit().map_err(io_err)?;

        Ok(Self { db: Arc::new(db) })
    }
}

/// Read every value stored under `key` in a multimap.
fn read_set<T: ReadableMultimapTable<&'static str, &'static str>>(
    table: &T,
    key: &str,
) -> Result<BTreeSet<String>, StorageError> {
    let mut values = BTreeSet::new();
    for guard in table.get(key).map_err(io_err)? {
        values.insert(guard.map_err(io_err)?.value().to_string());
    }
    Ok(values)
}

/// Make the multimap entries under `key` equal `desired`.
fn reconcile_set(
    table: &mut MultimapTable<'_, &'static str, &'static str>,
    key: &str,
    desired: &BTreeSet<String>,
) -> Result<(), StorageError> {
    let stored = read_set(&*table, key)?;

    for stale in stored.difference(desired) {
        table.remove(key, stale.as_str()).map_err(io_err)?;
    }
    for missing in desired.difference(&stored) {
        table.insert(key, missing.as_str()).map_err(io_err)?;
    }

    Ok(())
}

fn parse_ids(raw: BTreeSet<String>) -> Result<BTreeSet<IdentityId>, StorageError> {
    raw.iter()
        .map(|s| s.parse::<IdentityId>().map_err(|e| StorageError::Serialization(e.to_string())))
        .collect()
}

fn id_strings(ids: &BTreeSet<IdentityId>) -> BTreeSet<String> {
    ids.iter().map(ToString::to_string).collect()
}

impl IdentityStore for RedbStore {
    fn exists(&self, id: IdentityId) -> Result<bool, StorageError> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let table = txn.open_table(IDENTITIES).map_err(io_err)?;
        Ok(table.get(id.to_string().as_str()).map_err(io_err)?.is_some())
    }

    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let pattern = compile_pattern(pattern)?;
        let txn = self.db.begin_read().map_err(io_err)?;
        let mut keys = Vec::new();

        let user_keys = txn.open_table(USER_KEYS).map_err(io_err)?;
        for entry in user_keys.iter().map_err(io_err)? {
            let (_, key) = entry.map_err(io_err)?;
            keys.push(key.value().to_string());
        }

        let groups = txn.open_table(GROUPS).map_err(io_err)?;
        for entry in groups.iter().map_err(io_err)? {
            let (title, _) = entry.map_err(io_err)?;
            keys.push(format!("group:{}", title.value()));
        }

        let rooms = txn.open_table(ROOMS).map_err(io_err)?;
        for entry in rooms.iter().map_err(io_err)? {
            let (path, _) = entry.map_err(io_err)?;
            keys.push(format!("room:{}", path.value()));
        }

        keys.retain(|key| pattern.matches(key));
        Ok(keys)
    }

    fn read_identity(&self, id: IdentityId) -> Result<Option<Identity>, StorageError> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let table = txn.open_table(IDENTITIES).map_err(io_err)?;

        match table.get(id.to_string().as_str()).map_err(io_err)? {
            Some(bytes) => {
                let identity: Identity = ciborium::from_reader(bytes.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(identity))
            },
            None => Ok(None),
        }
    }

    fn write_identity(&self, identity: &Identity) -> Result<(), StorageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(identity, &mut bytes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let id = identity.id.to_string();
        let key = identity.store_key();

        let txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = txn.open_table(IDENTITIES).map_err(io_err)?;
            table.insert(id.as_str(), bytes.as_slice()).map_err(io_err)?;

            let mut user_keys = txn.open_table(USER_KEYS).map_err(io_err)?;
            user_keys.insert(id.as_str(), key.as_str()).map_err(io_err)?;
        }
        txn.commit().map_err(io_err)?;

        Ok(())
    }

    fn delete_identity(&self, id: IdentityId) -> Result<(), StorageError> {
        let id = id.to_string();

        let txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = txn.open_table(IDENTITIES).map_err(io_err)?;
            table.remove(id.as_str()).map_err(io_err)?;

            let mut user_keys = txn.open_table(USER_KEYS).map_err(io_err)?;
            user_keys.remove(id.as_str()).map_err(io_err)?;
        }
        txn.commit().map_err(io_err)?;

        Ok(())
    }

    fn read_group(&self, title: &str) -> Result<Option<Group>, StorageError> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let groups = txn.open_table(GROUPS).map_err(io_err)?;
        if groups.get(title).map_err(io_err)?.is_none() {
            return Ok(None);
        }

        let members = txn.open_multimap_table(GROUP_MEMBERS).map_err(io_err)?;
        let rooms = txn.open_multimap_table(GROUP_ROOMS).map_err(io_err)?;

        Ok(Some(Group {
            title: title.to_string(),
            rooms: read_set(&rooms, title)?,
            members: parse_ids(read_set(&members, title)?)?,
        }))
    }

    fn write_group(&self, group: &Group) -> Result<(), StorageError> {
        let title = group.title.as_str();

        let txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut groups = txn.open_table(GROUPS).map_err(io_err)?;
            groups.insert(title, ()).map_err(io_err)?;

            let mut members = txn.open_multimap_table(GROUP_MEMBERS).map_err(io_err)?;
            reconcile_set(&mut members, title, &id_strings(&group.members))?;

            let mut rooms = txn.open_multimap_table(GROUP_ROOMS).map_err(io_err)?;
            reconcile_set(&mut rooms, title, &group.rooms)?;
        }
        txn.commit().map_err(io_err)?;

        Ok(())
    }

    fn read_room(&self, group: &str, room: &str) -> Result<Option<Room>, StorageError> {
        let path = format!("{group}/{room}");

        let txn = self.db.begin_read().map_err(io_err)?;
        let rooms = txn.open_table(ROOMS).map_err(io_err)?;
        let Some(private) = rooms.get(path.as_str()).map_err(io_err)?.map(|g| g.value()) else {
            return Ok(None);
        };

        let members = txn.open_multimap_table(ROOM_MEMBERS).map_err(io_err)?;

        Ok(Some(Room {
            title: room.to_string(),
            group: group.to_string(),
            private,
            members: parse_ids(read_set(&members, &path)?)?,
        }))
    }

    fn write_room(&self, room: &Room) -> Result<(), StorageError> {
        let path = room.path().to_string();

        let txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut rooms = txn.open_table(ROOMS).map_err(io_err)?;
            rooms.insert(path.as_str(), room.private).map_err(io_err)?;

            let mut members = txn.open_multimap_table(ROOM_MEMBERS).map_err(io_err)?;
            reconcile_set(&mut members, &path, &id_strings(&room.members))?;
        }
        txn.commit().map_err(io_err)?;

        Ok(())
    }

    fn next_unique_sequence(&self) -> Result<i64, StorageError> {
        let txn = self.db.begin_write().map_err(io_err)?;
        let next = {
            let mut meta = txn.open_table(META).map_err(io_err)?;
            let current = meta.get(SEQUENCE_KEY).map_err(io_err)?.map_or(0, |g| g.value());
            let next = current + 1;
            meta.insert(SEQUENCE_KEY, next).map_err(io_err)?;
            next
        };
        txn.commit().map_err(io_err)?;

        Ok(next)
    }
}
