//! Fuzz target for protocol sessions under storage failures
//!
//! Drives several simulated clients through arbitrary frames while the
//! store fails at a fuzzed rate.
//!
//! # Invariants
//!
//! - The engine NEVER panics, whatever the frame or store state
//! - Every frame on an open connection yields exactly one response
//! - Storage failures surface as `500` and never raise the ban score
//! - Once the store heals, every room member is a member of its group

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_harness::SimServer;
use parley_proto::{DEFAULT_GROUP, ResponseCode, RoomPath};
use parley_server::{ChaoticStore, EngineConfig, IdentityStore, MemoryStore};

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    /// Seed for identity allocation
    seed: u64,
    /// Seed for the chaotic store
    chaos_seed: u64,
    /// Failure rate 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    /// Allow guests
    allow_guests: bool,
    /// Operations, by client index
    operations: Vec<(u8, Operation)>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Operation {
    /// Arbitrary frame bytes
    Raw(Vec<u8>),
    /// Well-formed join to a small set of rooms
    Join(u8),
    /// Well-formed part from a small set of rooms
    Part(u8),
    /// Well-formed room message
    Msg(u8),
    /// Drop the connection
    Disconnect,
}

const ROOMS: [&str; 4] = ["#default/#general", "#default/#a", "#default/#b", "#other/#c"];

fuzz_target!(|scenario: Scenario| {
    let failure_rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let store = ChaoticStore::with_seed(MemoryStore::new(), 0.0, scenario.chaos_seed);
    let config = EngineConfig { allow_guests: scenario.allow_guests, ban_threshold: u32::MAX };
    let server = SimServer::with_store(scenario.seed, store.clone(), config).unwrap();

    let mut clients: Vec<_> = (0..3).filter_map(|_| server.connect().ok()).collect();
    for client in &mut clients {
        client.drain();
    }
    store.set_failure_rate(failure_rate);

    for (index, operation) in scenario.operations.into_iter().take(64) {
        let Some(client) = clients.get_mut(usize::from(index) % 3) else { continue };
        if client.is_closed() {
            continue;
        }

        let score_before = client.connection().ban_score();
        match operation {
            Operation::Raw(bytes) => {
                client.send(&String::from_utf8_lossy(&bytes));
            },
            Operation::Join(room) => {
                client.join(ROOMS[usize::from(room) % ROOMS.len()]);
            },
            Operation::Part(room) => {
                client.part(ROOMS[usize::from(room) % ROOMS.len()]);
            },
            Operation::Msg(room) => {
                client.msg(ROOMS[usize::from(room) % ROOMS.len()], "fuzz");
            },
            Operation::Disconnect => {
                client.disconnect();
                continue;
            },
        }

        let codes = client.drain_codes();
        assert_eq!(codes.len(), 1, "expected one response, got {codes:?}");
        if codes[0] == ResponseCode::ServerError {
            assert_eq!(client.connection().ban_score(), score_before);
        }
    }

    store.set_failure_rate(0.0);
    let inner = store.inner();
    if let Some(group) = inner.read_group(DEFAULT_GROUP).unwrap() {
        for title in &group.rooms {
            if let Some(room) = inner.read_room(DEFAULT_GROUP, title).unwrap() {
                assert!(room.members.is_subset(&group.members));
            }
        }
    }
    assert!(server.directory().get_room(&RoomPath::default_room()).unwrap().is_some());
});
