//! Engine behavior over a failing store.
//!
//! Storage faults must surface as `500` replies without raising the ban
//! score, and must never leave the directory violating its invariants once
//! the store recovers.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parley_harness::{SimClient, SimServer};
use parley_proto::{DEFAULT_GROUP, ResponseCode, RoomPath};
use parley_server::{
    ChaoticStore, ConnectionState, EngineConfig, Group, Identity, IdentityId, IdentityKind,
    IdentityStore, MemoryStore, Room, StorageError, hash_password,
};
use proptest::prelude::*;

type ChaosServer = SimServer<ChaoticStore<MemoryStore>>;

fn chaos_server(seed: u64) -> (ChaosServer, ChaoticStore<MemoryStore>) {
    let store = ChaoticStore::with_seed(MemoryStore::new(), 0.0, seed);
    let server = SimServer::with_store(seed, store.clone(), EngineConfig::default()).unwrap();
    (server, store)
}

fn connect(server: &ChaosServer) -> SimClient<ChaoticStore<MemoryStore>> {
    let mut client = server.connect().unwrap();
    client.drain();
    client
}

#[test]
fn storage_failure_is_server_error_without_ban() {
    let (server, store) = chaos_server(1);
    let mut client = connect(&server);

    store.set_failure_rate(1.0);
    client.join("#default/#random");
    client.msg("#default/#general", "hi");
    client.part("#default/#general");

    assert_eq!(client.drain_codes(), vec![ResponseCode::ServerError; 3]);
    assert_eq!(client.connection().ban_score(), 0);
    assert!(!client.is_closed());
    assert!(store.failure_count() >= 3);
}

#[test]
fn recovers_after_store_heals() {
    let (server, store) = chaos_server(2);
    let mut client = connect(&server);

    store.set_failure_rate(1.0);
    client.join("#default/#random");
    assert_eq!(client.drain_codes(), vec![ResponseCode::ServerError]);

    store.set_failure_rate(0.0);
    client.join("#default/#random");
    assert_eq!(client.drain_codes(), vec![ResponseCode::Ok]);
}

#[test]
fn connect_fails_cleanly_when_store_is_down() {
    let (server, store) = chaos_server(3);
    store.set_failure_rate(1.0);

    assert!(server.connect().is_err());
    assert!(server.registry().is_empty());
}

#[test]
fn disconnect_survives_store_failure() {
    let (server, store) = chaos_server(4);
    let mut client = connect(&server);
    let id = client.id();

    store.set_failure_rate(1.0);
    client.disconnect();

    assert!(client.is_closed());
    assert!(!server.registry().contains(id));
}

#[test]
fn no_user_relay_when_lookup_fails() {
    let (server, store) = chaos_server(5);
    let mut alice = connect(&server);
    let mut bob = connect(&server);

    store.set_failure_rate(1.0);
    alice.msg("#default/#general", "lost");
    assert_eq!(alice.drain_codes(), vec![ResponseCode::ServerError]);
    assert!(bob.drain_relays().is_empty());
}

/// Store whose registered-identity writes or deletes can be made to fail.
#[derive(Clone, Default)]
struct SelectiveStore {
    inner: MemoryStore,
    fail_registered_writes: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
}

impl SelectiveStore {
    fn injected(operation: &str) -> StorageError {
        StorageError::Io(format!("injected {operation} failure"))
    }
}

impl IdentityStore for SelectiveStore {
    fn exists(&self, id: IdentityId) -> Result<bool, StorageError> {
        self.inner.exists(id)
    }

    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        self.inner.keys_matching(pattern)
    }

    fn read_identity(&self, id: IdentityId) -> Result<Option<Identity>, StorageError> {
        self.inner.read_identity(id)
    }

    fn write_identity(&self, identity: &Identity) -> Result<(), StorageError> {
        if identity.kind == IdentityKind::Registered
            && self.fail_registered_writes.load(Ordering::SeqCst)
        {
            return Err(Self::injected("write_identity"));
        }
        self.inner.write_identity(identity)
    }

    fn delete_identity(&self, id: IdentityId) -> Result<(), StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete_identity"));
        }
        self.inner.delete_identity(id)
    }

    fn read_group(&self, title: &str) -> Result<Option<Group>, StorageError> {
        self.inner.read_group(title)
    }

    fn write_group(&self, group: &Group) -> Result<(), StorageError> {
        self.inner.write_group(group)
    }

    fn read_room(&self, group: &str, room: &str) -> Result<Option<Room>, StorageError> {
        self.inner.read_room(group, room)
    }

    fn write_room(&self, room: &Room) -> Result<(), StorageError> {
        self.inner.write_room(room)
    }

    fn next_unique_sequence(&self) -> Result<i64, StorageError> {
        self.inner.next_unique_sequence()
    }
}

fn selective_server() -> (SimServer<SelectiveStore>, SelectiveStore, IdentityId) {
    let store = SelectiveStore::default();
    let server = SimServer::with_store(6, store.clone(), EngineConfig::default()).unwrap();
    let alice_id = server.engine().allocate_identity_id().unwrap();
    let hash = hash_password("pw").unwrap();
    store.write_identity(&Identity::registered(alice_id, "alice", hash)).unwrap();
    (server, store, alice_id)
}

#[test]
fn failed_login_leaves_guest_session_intact() {
    let (server, store, alice_id) = selective_server();
    let mut guest = server.connect().unwrap();
    guest.drain();
    let mut peer = server.connect().unwrap();
    peer.drain();
    let guest_id = guest.id();

    store.fail_registered_writes.store(true, Ordering::SeqCst);
    guest.authenticate("alice", "pw");
    assert_eq!(guest.drain_codes(), vec![ResponseCode::ServerError]);

    assert_eq!(guest.id(), guest_id);
    assert_eq!(guest.connection().state(), ConnectionState::Guest);
    assert_eq!(guest.connection().ban_score(), 0);
    assert!(store.exists(guest_id).unwrap());
    assert!(server.registry().contains(guest_id));
    assert!(!server.registry().contains(alice_id));

    peer.msg(&guest_id.to_string(), "still there?");
    assert_eq!(peer.drain_codes(), vec![ResponseCode::Ok]);
    assert_eq!(guest.drain_relays().len(), 1);

    guest.msg("#default/#general", "hello");
    assert_eq!(guest.drain_codes(), vec![ResponseCode::Ok]);
    assert!(!guest.is_closed());

    store.fail_registered_writes.store(false, Ordering::SeqCst);
    guest.authenticate("alice", "pw");
    assert_eq!(guest.drain_codes(), vec![ResponseCode::Ok]);
    assert_eq!(guest.id(), alice_id);
    assert!(!store.exists(guest_id).unwrap());
}

#[test]
fn login_completes_when_guest_cleanup_fails() {
    let (server, store, alice_id) = selective_server();
    let mut guest = server.connect().unwrap();
    guest.drain();
    let guest_id = guest.id();

    store.fail_deletes.store(true, Ordering::SeqCst);
    guest.authenticate("alice", "pw");
    assert_eq!(guest.drain_codes(), vec![ResponseCode::Ok]);

    assert_eq!(guest.id(), alice_id);
    assert_eq!(guest.connection().state(), ConnectionState::Authenticated);
    assert!(server.registry().contains(alice_id));
    assert!(!server.registry().contains(guest_id));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: under random faults, each frame still gets exactly one
    /// reply, faults never ban, and state stays consistent afterwards
    #[test]
    fn prop_faults_never_ban(
        seed in any::<u64>(),
        failure_rate in 0.0..0.6,
        rooms in prop::collection::vec("#[a-c]", 1..20),
    ) {
        let (server, store) = chaos_server(seed);
        let mut client = connect(&server);
        store.set_failure_rate(failure_rate);

        for room in &rooms {
            let path = format!("{DEFAULT_GROUP}/{room}");
            client.join(&path);
            let codes = client.drain_codes();
            prop_assert_eq!(codes.len(), 1);
            prop_assert!(matches!(codes[0], ResponseCode::Ok | ResponseCode::ServerError));

            client.part(&path);
            let codes = client.drain_codes();
            prop_assert_eq!(codes.len(), 1);
            prop_assert!(matches!(
                codes[0],
                ResponseCode::Ok | ResponseCode::Gone | ResponseCode::NotFound | ResponseCode::ServerError
            ));
        }
        prop_assert_eq!(client.connection().ban_score(), 0);

        store.set_failure_rate(0.0);
        let inner = store.inner();
        let group = inner.read_group(DEFAULT_GROUP).unwrap().unwrap();
        for room_title in &group.rooms {
            if let Some(room) = inner.read_room(DEFAULT_GROUP, room_title).unwrap() {
                prop_assert!(room.members.is_subset(&group.members));
            }
        }
        prop_assert!(server.directory().get_room(&RoomPath::default_room()).unwrap().is_some());
    }
}
