//! Storage abstraction for identities, groups and rooms.
//!
//! Trait-based abstraction over the persistent store. The trait is
//! synchronous (no async): every call is short, and callers never hold a
//! store call across an `.await`.
//!
//! Lookups return `Result<Option<T>, StorageError>`, so "absent" and
//! "store failed" never collapse into one sentinel.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStore;
pub use error::StorageError;
pub(crate) use error::compile_pattern;
pub use memory::MemoryStore;

pub use self::redb::RedbStore;
use crate::identity::{Group, Identity, IdentityId, Room};

/// Persistent facts about identities, groups and rooms.
///
/// Must be Clone (shared by every connection task), Send + Sync
/// (thread-safe), and synchronous. Implementations share internal state via
/// Arc, so clones access the same underlying store.
///
/// # Keys
///
/// [`IdentityStore::keys_matching`] works over the key scheme
/// `user:<kind>:<login>:<id>`, `group:<title>` and `room:<group>/<room>`.
pub trait IdentityStore: Clone + Send + Sync + 'static {
    /// Whether an identity with this id is stored.
    fn exists(&self, id: IdentityId) -> Result<bool, StorageError>;

    /// All keys matching a glob pattern.
    ///
    /// Order is unspecified.
    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StorageError>;

    /// Load an identity. `None` if it was never written or was deleted.
    fn read_identity(&self, id: IdentityId) -> Result<Option<Identity>, StorageError>;

    /// Insert or overwrite an identity.
    ///
    /// # Invariants
    ///
    /// - Post: exactly one key refers to `identity.id`, even if its kind or
    ///   login name changed
    fn write_identity(&self, identity: &Identity) -> Result<(), StorageError>;

    /// Delete an identity. Deleting an absent id is a no-op.
    fn delete_identity(&self, id: IdentityId) -> Result<(), StorageError>;

    /// Load a group with its member and room sets.
    fn read_group(&self, title: &str) -> Result<Option<Group>, StorageError>;

    /// Persist a group.
    ///
    /// # Invariants
    ///
    /// - Post: stored member and room sets equal the given sets. Missing
    ///   entries are added, stale ones removed; writing the same group twice
    ///   leaves the store unchanged.
    fn write_group(&self, group: &Group) -> Result<(), StorageError>;

    /// Load a room by group and room title.
    fn read_room(&self, group: &str, room: &str) -> Result<Option<Room>, StorageError>;

    /// Persist a room. Same reconcile semantics as [`IdentityStore::write_group`].
    fn write_room(&self, room: &Room) -> Result<(), StorageError>;

    /// Allocate the next value of a store-wide sequence.
    ///
    /// # Invariants
    ///
    /// - Post: strictly greater than every value previously returned by this
    ///   store, starting at 1
    fn next_unique_sequence(&self) -> Result<i64, StorageError>;
}
