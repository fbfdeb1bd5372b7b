//! End-to-end protocol scenarios over the simulation harness.
//!
//! Each test drives real engine and router code through `SimClient`s and
//! checks both the replies and the persisted state.

use parley_harness::{SimClient, SimServer};
use parley_proto::{DEFAULT_GROUP, Envelope, ResponseCode, RoomPath};
use parley_server::{
    ConnectionState, EngineConfig, Flow, Group, Identity, IdentityId, IdentityStore, MemoryStore,
    hash_password,
};

const GENERAL: &str = "#default/#general";

fn server_with(config: EngineConfig) -> SimServer {
    SimServer::with_store(7, MemoryStore::new(), config).unwrap()
}

/// Connect and discard the greeting.
fn connect(server: &SimServer) -> SimClient {
    let mut client = server.connect().unwrap();
    client.drain();
    client
}

/// Store a registered identity with the given credentials.
fn register(server: &SimServer, login: &str, password: &str) -> IdentityId {
    let id = server.engine().allocate_identity_id().unwrap();
    let hash = hash_password(password).unwrap();
    server.store().write_identity(&Identity::registered(id, login, hash)).unwrap();
    id
}

/// Create a group outside the default space with one room.
fn create_foreign_room(server: &SimServer, path: &str) -> RoomPath {
    let path = RoomPath::parse(path).unwrap();
    server.directory().write_group(&Group::new(path.group())).unwrap();
    server.directory().new_or_existing_room(&path).unwrap();
    path
}

fn relayed_message(frame: &str) -> String {
    Envelope::decode(frame.as_bytes()).unwrap().message
}

#[test]
fn guest_greeting_and_default_admission() {
    let server = server_with(EngineConfig::default());
    let mut client = server.connect().unwrap();

    assert_eq!(client.drain_codes(), vec![ResponseCode::Ok, ResponseCode::GeneralNotice]);
    assert_eq!(client.connection().state(), ConnectionState::Guest);

    let identity = client.connection().identity();
    assert!(identity.rooms.contains(GENERAL));
    assert!(identity.groups.contains(DEFAULT_GROUP));

    let room = server.directory().get_room(&RoomPath::default_room()).unwrap().unwrap();
    assert!(room.members.contains(&client.id()));
}

#[test]
fn guest_message_reaches_other_members() {
    let server = server_with(EngineConfig::default());
    let mut alice = connect(&server);
    let mut bob = connect(&server);
    let mut carol = connect(&server);

    assert_eq!(alice.msg(GENERAL, "hi"), Flow::Continue);

    assert_eq!(alice.drain_codes(), vec![ResponseCode::Ok]);
    assert!(alice.drain_relays().is_empty());

    for peer in [&mut bob, &mut carol] {
        let relays = peer.drain_relays();
        assert_eq!(relays.len(), 1);
        assert_eq!(relayed_message(&relays[0]), "hi");
    }
}

#[test]
fn message_to_missing_group_is_not_found() {
    let server = server_with(EngineConfig::default());
    let mut client = connect(&server);

    assert_eq!(client.msg("#other/#room", "hello?"), Flow::Continue);
    assert_eq!(client.drain_codes(), vec![ResponseCode::NotFound]);
    assert_eq!(client.connection().ban_score(), 0);
}

#[test]
fn non_member_message_is_forbidden_and_banned() {
    let server = server_with(EngineConfig { ban_threshold: 10, ..EngineConfig::default() });
    create_foreign_room(&server, "#ops/#war");
    register(&server, "alice", "correct horse");

    let mut alice = connect(&server);
    alice.authenticate("alice", "correct horse");
    assert_eq!(alice.drain_codes(), vec![ResponseCode::Ok]);

    alice.msg("#ops/#war", "let me in");
    assert_eq!(alice.drain_codes(), vec![ResponseCode::Forbidden]);
    assert_eq!(alice.connection().ban_score(), 1);
    assert!(!alice.is_closed());
}

#[test]
fn first_ban_closes_with_default_threshold() {
    let server = server_with(EngineConfig::default());
    create_foreign_room(&server, "#ops/#war");
    let mut guest = connect(&server);
    let guest_id = guest.id();

    assert!(matches!(guest.msg("#ops/#war", "hi"), Flow::Close(_)));
    assert_eq!(guest.drain_codes(), vec![ResponseCode::Forbidden]);
    assert!(guest.is_closed());
    assert!(!server.registry().contains(guest_id));
    assert!(!server.store().exists(guest_id).unwrap());
}

#[test]
fn authenticate_upgrades_and_deletes_guest() {
    let server = server_with(EngineConfig::default());
    let alice_id = register(&server, "alice", "correct horse");

    let mut client = connect(&server);
    let guest_id = client.id();
    assert!(server.store().exists(guest_id).unwrap());

    assert_eq!(client.authenticate("alice", "correct horse"), Flow::Continue);
    assert_eq!(client.drain_codes(), vec![ResponseCode::Ok]);

    assert_eq!(client.id(), alice_id);
    assert_eq!(client.connection().state(), ConnectionState::Authenticated);
    assert!(client.connection().identity().authorized);
    assert!(!server.store().exists(guest_id).unwrap());
    assert!(!server.registry().contains(guest_id));
    assert!(server.registry().contains(alice_id));

    let room = server.directory().get_room(&RoomPath::default_room()).unwrap().unwrap();
    assert!(room.members.contains(&alice_id));
    assert!(!room.members.contains(&guest_id));

    let stored = server.store().read_identity(alice_id).unwrap().unwrap();
    assert!(stored.connected);
    assert!(stored.rooms.contains(GENERAL));
}

#[test]
fn wrong_password_is_incorrect_credentials() {
    let server = server_with(EngineConfig { ban_threshold: 5, ..EngineConfig::default() });
    register(&server, "alice", "correct horse");
    let mut client = connect(&server);
    let guest_id = client.id();

    client.authenticate("alice", "battery staple");
    assert_eq!(client.drain_codes(), vec![ResponseCode::IncorrectCredentials]);
    assert_eq!(client.connection().ban_score(), 1);
    assert_eq!(client.id(), guest_id);

    client.authenticate("mallory", "anything");
    assert_eq!(client.drain_codes(), vec![ResponseCode::IncorrectCredentials]);
    assert_eq!(client.connection().ban_score(), 2);
}

#[test]
fn login_names_are_matched_literally() {
    let server = server_with(EngineConfig { ban_threshold: 5, ..EngineConfig::default() });
    register(&server, "alice", "pw");
    let mut client = connect(&server);

    client.authenticate("*", "pw");
    assert_eq!(client.drain_codes(), vec![ResponseCode::IncorrectCredentials]);
    client.authenticate("al?ce", "pw");
    assert_eq!(client.drain_codes(), vec![ResponseCode::IncorrectCredentials]);
}

#[test]
fn join_with_bad_room_name_is_bad_request() {
    let server = server_with(EngineConfig::default());
    let mut client = connect(&server);
    let rooms_before = client.connection().identity().rooms.clone();

    assert_eq!(client.join("badroomname"), Flow::Continue);
    assert_eq!(client.drain_codes(), vec![ResponseCode::BadRequestOrObject]);
    assert_eq!(client.connection().ban_score(), 0);
    assert_eq!(client.connection().identity().rooms, rooms_before);
}

#[test]
fn part_without_membership_is_gone() {
    let server = server_with(EngineConfig::default());
    let mut owner = connect(&server);
    let mut client = connect(&server);

    owner.join("#default/#random");
    assert_eq!(owner.drain_codes(), vec![ResponseCode::Ok]);

    client.part("#default/#random");
    assert_eq!(client.drain_codes(), vec![ResponseCode::Gone]);
    assert_eq!(client.connection().ban_score(), 0);
}

#[test]
fn part_of_missing_room_is_not_found() {
    let server = server_with(EngineConfig::default());
    let mut client = connect(&server);

    client.part("#default/#nowhere");
    assert_eq!(client.drain_codes(), vec![ResponseCode::NotFound]);
    client.part("#nowhere/#nothing");
    assert_eq!(client.drain_codes(), vec![ResponseCode::NotFound]);
}

#[test]
fn join_creates_room_and_relays_to_members_only() {
    let server = server_with(EngineConfig::default());
    let mut alice = connect(&server);
    let mut bob = connect(&server);
    let mut carol = connect(&server);

    alice.join("#default/#random");
    bob.join("#default/#random");
    assert_eq!(alice.drain_codes(), vec![ResponseCode::Ok]);
    assert_eq!(bob.drain_codes(), vec![ResponseCode::Ok]);

    let group = server.directory().get_group(DEFAULT_GROUP).unwrap().unwrap();
    assert!(group.rooms.contains("#random"));

    alice.msg("#default/#random", "side channel");
    assert_eq!(bob.drain_relays().len(), 1);
    assert!(carol.drain_relays().is_empty());
}

#[test]
fn leave_behaves_as_part() {
    let server = server_with(EngineConfig::default());
    let mut client = connect(&server);
    let path = RoomPath::parse("#default/#random").unwrap();

    client.join("#default/#random");
    client.leave("#default/#random");
    assert_eq!(client.drain_codes(), vec![ResponseCode::Ok, ResponseCode::Ok]);

    let room = server.directory().get_room(&path).unwrap().unwrap();
    assert!(!room.members.contains(&client.id()));
    assert!(!client.connection().identity().rooms.contains("#default/#random"));

    client.leave("#default/#random");
    assert_eq!(client.drain_codes(), vec![ResponseCode::Gone]);
}

#[test]
fn guests_cannot_join_other_groups() {
    let server = server_with(EngineConfig { ban_threshold: 10, ..EngineConfig::default() });
    create_foreign_room(&server, "#ops/#war");
    let mut guest = connect(&server);

    guest.join("#ops/#war");
    assert_eq!(guest.drain_codes(), vec![ResponseCode::Forbidden]);
    guest.join("#ops/#brand-new");
    assert_eq!(guest.drain_codes(), vec![ResponseCode::Forbidden]);
    assert_eq!(guest.connection().ban_score(), 2);
}

#[test]
fn guest_message_to_other_group_is_banned() {
    let server = server_with(EngineConfig { ban_threshold: 10, ..EngineConfig::default() });
    create_foreign_room(&server, "#ops/#war");
    let mut guest = connect(&server);

    guest.msg("#ops/#war", "let me in");
    assert_eq!(guest.drain_codes(), vec![ResponseCode::Forbidden]);
    assert_eq!(guest.connection().ban_score(), 1);
}

#[test]
fn private_room_requires_membership() {
    let server = server_with(EngineConfig { ban_threshold: 10, ..EngineConfig::default() });
    let vault = RoomPath::parse("#default/#vault").unwrap();
    let mut room = server.directory().new_or_existing_room(&vault).unwrap();
    room.private = true;
    server.directory().write_room(&room).unwrap();

    let mut client = connect(&server);
    client.join("#default/#vault");
    assert_eq!(client.drain_codes(), vec![ResponseCode::Forbidden]);
    client.msg("#default/#vault", "anyone?");
    assert_eq!(client.drain_codes(), vec![ResponseCode::Forbidden]);
    assert_eq!(client.connection().ban_score(), 2);

    let mut room = server.directory().get_room(&vault).unwrap().unwrap();
    room.members.insert(client.id());
    server.directory().write_room(&room).unwrap();

    client.msg("#default/#vault", "anyone?");
    assert_eq!(client.drain_codes(), vec![ResponseCode::Ok]);
}

#[test]
fn direct_message_delivery() {
    let server = server_with(EngineConfig::default());
    let mut alice = connect(&server);
    let mut bob = connect(&server);

    alice.msg(&bob.id().to_string(), "psst");
    assert_eq!(alice.drain_codes(), vec![ResponseCode::Ok]);
    let relays = bob.drain_relays();
    assert_eq!(relays.len(), 1);
    assert_eq!(relayed_message(&relays[0]), "psst");

    alice.msg(&IdentityId::new(0xdead_beef).to_string(), "anyone?");
    assert_eq!(alice.drain_codes(), vec![ResponseCode::NotFound]);
    alice.msg("bob", "by name?");
    assert_eq!(alice.drain_codes(), vec![ResponseCode::NotFound]);
    assert_eq!(alice.connection().ban_score(), 0);
}

#[test]
fn direct_message_to_disconnected_user_is_not_found() {
    let server = server_with(EngineConfig::default());
    let mut alice = connect(&server);
    let mut bob = connect(&server);
    let bob_id = bob.id();

    bob.disconnect();
    alice.msg(&bob_id.to_string(), "gone?");
    assert_eq!(alice.drain_codes(), vec![ResponseCode::NotFound]);
}

#[test]
fn pending_auth_rejects_everything_but_authenticate() {
    let server = server_with(EngineConfig { allow_guests: false, ban_threshold: 1 });

    let mut stranger = server.connect().unwrap();
    assert_eq!(stranger.drain_codes(), vec![ResponseCode::Ok, ResponseCode::ImportantNotice]);
    assert_eq!(stranger.connection().state(), ConnectionState::PendingAuth);

    assert!(matches!(stranger.msg(GENERAL, "hi"), Flow::Close(_)));
    assert_eq!(stranger.drain_codes(), vec![ResponseCode::NotAuthorized]);
    assert!(stranger.is_closed());
}

#[test]
fn pending_auth_then_authenticate() {
    let server = server_with(EngineConfig { allow_guests: false, ban_threshold: 1 });
    let alice_id = register(&server, "alice", "pw");
    let mut listener = server.connect().unwrap();
    listener.authenticate("alice", "pw");
    listener.drain();

    let bob_id = register(&server, "bob", "pw2");
    let mut bob = server.connect().unwrap();
    bob.drain();
    bob.authenticate("bob", "pw2");
    assert_eq!(bob.drain_codes(), vec![ResponseCode::Ok]);
    assert_eq!(bob.id(), bob_id);

    bob.msg(GENERAL, "hello");
    assert_eq!(bob.drain_codes(), vec![ResponseCode::Ok]);
    assert_eq!(listener.id(), alice_id);
    assert_eq!(listener.drain_relays().len(), 1);
}

#[test]
fn unknown_action_while_pending_is_not_authorized() {
    let server = server_with(EngineConfig { allow_guests: false, ban_threshold: 3 });
    let mut stranger = connect(&server);

    stranger.send(r#"{"action":"dance","time":5}"#);
    assert_eq!(stranger.drain_codes(), vec![ResponseCode::NotAuthorized]);
    assert_eq!(stranger.connection().ban_score(), 1);
}

#[test]
fn malformed_frames_never_ban() {
    let server = server_with(EngineConfig::default());
    let mut client = connect(&server);

    for frame in ["", "null", "[]", "{", r#"{"action":"msg"}"#, r#"{"action":"msg","time":-4}"#] {
        assert_eq!(client.send(frame), Flow::Continue);
        assert_eq!(client.drain_codes(), vec![ResponseCode::BadRequestOrObject], "frame {frame:?}");
    }
    assert_eq!(client.connection().ban_score(), 0);
}

#[test]
fn registered_disconnect_marks_offline() {
    let server = server_with(EngineConfig::default());
    let alice_id = register(&server, "alice", "pw");
    let mut alice = connect(&server);
    alice.authenticate("alice", "pw");

    alice.disconnect();
    alice.disconnect();

    let stored = server.store().read_identity(alice_id).unwrap().unwrap();
    assert!(!stored.connected);
    assert!(!server.registry().contains(alice_id));
    assert!(server.registry().is_empty());
}

#[test]
fn second_login_keeps_newer_session_registered() {
    let server = server_with(EngineConfig::default());
    let alice_id = register(&server, "alice", "pw");

    let mut first = connect(&server);
    first.authenticate("alice", "pw");
    let mut second = connect(&server);
    second.authenticate("alice", "pw");
    let second_session = second.connection().session_id();

    first.disconnect();

    let live = server.registry().get(alice_id).unwrap();
    assert_eq!(live.session_id, second_session);
    assert!(server.store().read_identity(alice_id).unwrap().unwrap().connected);
}

#[test]
fn guest_disconnect_purges_identity() {
    let server = server_with(EngineConfig::default());
    let mut guest = connect(&server);
    let guest_id = guest.id();
    guest.join("#default/#random");

    guest.disconnect();

    assert!(!server.store().exists(guest_id).unwrap());
    for path in [RoomPath::default_room(), RoomPath::parse("#default/#random").unwrap()] {
        let room = server.directory().get_room(&path).unwrap().unwrap();
        assert!(!room.members.contains(&guest_id));
    }
    let group = server.directory().get_group(DEFAULT_GROUP).unwrap().unwrap();
    assert!(!group.members.contains(&guest_id));
}

#[test]
fn responses_carry_server_time() {
    let server = server_with(EngineConfig::default());
    let mut client = connect(&server);
    server.env().advance(90);

    client.join("#default/#random");
    let received = client.drain();
    let Some(parley_harness::Received::Response(response)) = received.first() else {
        panic!("expected a response, got {received:?}");
    };
    assert_eq!(response.time, parley_harness::SIM_EPOCH_SECS + 90);
}
