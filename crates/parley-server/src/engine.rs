//! Per-connection protocol state machine.
//!
//! Uses the action pattern: methods take raw frames and return
//! [`SessionAction`]s for the runtime (or a test) to execute through the
//! [`Router`](crate::Router). The engine never touches a socket, which keeps
//! every protocol rule testable without a network.
//!
//! # State Machine
//!
//! ```text
//!                 guests allowed   ┌───────┐  authenticate   ┌───────────────┐
//!             ┌───────────────────>│ Guest │────────────────>│ Authenticated │
//! ┌────────────┐                   └───────┘                 └───────────────┘
//! │ Connecting │                                                    ^
//! └────────────┘  guests disabled  ┌─────────────┐  authenticate    │
//!             └───────────────────>│ PendingAuth │──────────────────┘
//!                                  └─────────────┘
//!
//!           any state ── disconnect / ban threshold ──> Terminated
//! ```
//!
//! # Ban accounting
//!
//! Only authorization failures raise the ban score, by exactly one each:
//! non-authenticate actions while pending, bad credentials, guests leaving
//! the default group, non-members addressing a group, and non-members
//! addressing a private room. Malformed input and missing destinations never
//! do.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parley_proto::{Action, AuthToken, Envelope, Response, ResponseCode, RoomPath};

use crate::{
    directory::{Directory, DirectoryError},
    env::Environment,
    identity::{Identity, IdentityId, Room},
    password,
    registry::{Outbound, OutboundFrame, Session, SessionRegistry},
    storage::IdentityStore,
};

/// Engine policy.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Admit unauthenticated clients as guests
    pub allow_guests: bool,
    /// Ban score at which the connection is closed
    pub ban_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { allow_guests: true, ban_threshold: 1 }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Identity being allocated
    Connecting,
    /// Admitted as a guest
    Guest,
    /// Guests disabled; only `authenticate` is accepted
    PendingAuth,
    /// Bound to a stored identity
    Authenticated,
    /// Cleaned up; further frames are ignored
    Terminated,
}

/// Where a relayed frame goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Every live member of the room, except the sender
    Room(Room),
    /// One live session
    Identity(IdentityId),
}

/// Actions returned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send this response to the connection's own client
    Reply(Response),

    /// Forward a frame to other sessions
    Relay {
        /// Destination
        route: Route,
        /// Encoded frame
        frame: OutboundFrame,
    },

    /// Close the connection
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// State for one live connection.
///
/// Owned by the connection task; the registry holds only a [`Session`]
/// handle derived from it.
#[derive(Debug)]
pub struct Connection {
    session_id: u64,
    state: ConnectionState,
    identity: Identity,
    ban_score: u32,
    outbound: Outbound,
}

impl Connection {
    /// Connection-local id.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identity currently bound to the connection.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Accumulated ban score.
    pub fn ban_score(&self) -> u32 {
        self.ban_score
    }

    /// Write capability for this connection's client.
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    fn session_handle(&self) -> Session {
        Session {
            session_id: self.session_id,
            identity_id: self.identity.id,
            kind: self.identity.kind,
            authorized: self.identity.authorized,
            outbound: self.outbound.clone(),
        }
    }
}

/// Result of one dispatched action, before ban accounting.
#[derive(Debug)]
struct Verdict {
    code: ResponseCode,
    message: Option<String>,
    ban: u32,
    relay: Option<(Route, OutboundFrame)>,
}

impl Verdict {
    fn ok() -> Self {
        Self { code: ResponseCode::Ok, message: None, ban: 0, relay: None }
    }

    fn relay(route: Route, frame: OutboundFrame) -> Self {
        Self { relay: Some((route, frame)), ..Self::ok() }
    }

    /// Client error, no ban.
    fn reject(code: ResponseCode, message: impl Into<String>) -> Self {
        Self { code, message: Some(message.into()), ban: 0, relay: None }
    }

    /// Authorization failure, ban +1.
    fn ban(code: ResponseCode, message: impl Into<String>) -> Self {
        Self { ban: 1, ..Self::reject(code, message) }
    }
}

/// Protocol engine shared by all connection tasks.
pub struct ProtocolEngine<E: Environment, S: IdentityStore> {
    env: E,
    directory: Directory<S>,
    registry: Arc<SessionRegistry>,
    config: EngineConfig,
    next_session_id: AtomicU64,
}

impl<E: Environment, S: IdentityStore> ProtocolEngine<E, S> {
    /// Create an engine over a bootstrapped directory and a shared registry.
    pub fn new(
        env: E,
        directory: Directory<S>,
        registry: Arc<SessionRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self { env, directory, registry, config, next_session_id: AtomicU64::new(1) }
    }

    /// Directory the engine authorizes against.
    pub fn directory(&self) -> &Directory<S> {
        &self.directory
    }

    /// Shared session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Engine policy.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Draw a random identity id not present in the store.
    ///
    /// Retries without bound on collision. Only the store is consulted; the
    /// registry lock is never taken here.
    pub fn allocate_identity_id(&self) -> Result<IdentityId, DirectoryError> {
        loop {
            let candidate = IdentityId::new(self.env.random_u128());
            if !self.directory.store().exists(candidate)? {
                return Ok(candidate);
            }
            tracing::debug!(%candidate, "identity id collision, retrying");
        }
    }

    /// Open a connection.
    ///
    /// Allocates an identity, admits it as a guest (or leaves it pending
    /// when guests are disabled), registers the session and returns the
    /// greeting.
    pub fn connect(
        &self,
        outbound: Outbound,
    ) -> Result<(Connection, Vec<SessionAction>), DirectoryError> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let id = self.allocate_identity_id()?;
        let now = self.env.wall_clock_secs();

        let mut actions = vec![SessionAction::Reply(Response::bare(ResponseCode::Ok, now))];
        let (identity, state) = if self.config.allow_guests {
            let seq = self.directory.store().next_unique_sequence()?;
            let mut guest = Identity::guest(id, seq);
            self.directory.admit_to_default(&mut guest)?;

            actions.push(SessionAction::Reply(Response::with_message(
                ResponseCode::GeneralNotice,
                now,
                format!("Connected as guest with ID {id}"),
            )));
            (guest, ConnectionState::Guest)
        } else {
            // Placeholder, never persisted.
            let mut pending = Identity::guest(id, 0);
            pending.display_name.clear();
            pending.login_name.clear();

            actions.push(SessionAction::Reply(Response::with_message(
                ResponseCode::ImportantNotice,
                now,
                "No guests allowed: send authentication token to continue",
            )));
            (pending, ConnectionState::PendingAuth)
        };

        let conn = Connection { session_id, state, identity, ban_score: 0, outbound };
        self.registry.register(id, conn.session_handle());

        tracing::info!(session_id, identity = %id, state = ?state, "session opened");
        Ok((conn, actions))
    }

    /// Handle one inbound frame.
    ///
    /// Always yields exactly one reply. Adds a relay on successful `msg` and
    /// a close once the ban threshold is reached. Frames on a terminated
    /// connection yield nothing.
    pub fn handle_frame(&self, conn: &mut Connection, raw: &[u8]) -> Vec<SessionAction> {
        if conn.state == ConnectionState::Terminated {
            return Vec::new();
        }

        let verdict = match Envelope::decode(raw) {
            Ok(envelope) => match self.dispatch(conn, &envelope, raw) {
                Ok(verdict) => verdict,
                Err(e) => {
                    tracing::error!(
                        session_id = conn.session_id,
                        action = %envelope.action,
                        "storage failure, action aborted: {e}"
                    );
                    Verdict { code: ResponseCode::ServerError, message: None, ban: 0, relay: None }
                },
            },
            Err(e) => Verdict::reject(ResponseCode::BadRequestOrObject, e.to_string()),
        };

        self.settle(conn, verdict)
    }

    /// Tear down a connection.
    ///
    /// Idempotent: the first call deregisters the session and deletes a
    /// guest identity (or marks a stored one disconnected); later calls do
    /// nothing. Storage failures are logged.
    pub fn disconnect(&self, conn: &mut Connection) {
        if conn.state == ConnectionState::Terminated {
            return;
        }
        conn.state = ConnectionState::Terminated;

        let owned = self.registry.remove_if_session(conn.identity.id, conn.session_id).is_some();

        let result = if conn.identity.is_guest() {
            self.directory.remove_identity(&conn.identity)
        } else if owned {
            conn.identity.connected = false;
            self.directory.store().write_identity(&conn.identity).map_err(DirectoryError::from)
        } else {
            // Identity moved to a newer connection; leave its state alone.
            Ok(())
        };

        if let Err(e) = result {
            tracing::error!(session_id = conn.session_id, identity = %conn.identity.id, "cleanup failed: {e}");
        }
        tracing::info!(session_id = conn.session_id, identity = %conn.identity.id, "session closed");
    }

    fn settle(&self, conn: &mut Connection, verdict: Verdict) -> Vec<SessionAction> {
        let now = self.env.wall_clock_secs();
        let mut actions = Vec::with_capacity(3);

        if let Some((route, frame)) = verdict.relay {
            actions.push(SessionAction::Relay { route, frame });
        }
        actions.push(SessionAction::Reply(Response::new(verdict.code, now, verdict.message)));

        if verdict.ban > 0 {
            conn.ban_score += verdict.ban;
            tracing::warn!(
                session_id = conn.session_id,
                identity = %conn.identity.id,
                ban_score = conn.ban_score,
                code = verdict.code.as_u16(),
                "ban score raised"
            );

            if conn.ban_score >= self.config.ban_threshold.max(1) {
                actions.push(SessionAction::Close {
                    reason: format!("ban score {} reached threshold", conn.ban_score),
                });
            }
        }

        actions
    }

    fn dispatch(
        &self,
        conn: &mut Connection,
        envelope: &Envelope,
        raw: &[u8],
    ) -> Result<Verdict, DirectoryError> {
        if conn.state == ConnectionState::PendingAuth
            && envelope.action != Action::Authenticate.as_str()
        {
            return Ok(Verdict::ban(
                ResponseCode::NotAuthorized,
                "send authentication token to continue",
            ));
        }

        let action = match envelope.action() {
            Ok(action) => action,
            Err(e) => return Ok(Verdict::reject(ResponseCode::BadRequestOrObject, e.to_string())),
        };

        match action {
            Action::Authenticate => self.authenticate(conn, &envelope.user),
            Action::Msg => self.message(conn, &envelope.to, raw),
            Action::Join => self.join(conn, envelope.room_target()),
            Action::Part | Action::Leave => self.part(conn, envelope.room_target()),
        }
    }

    fn authenticate(
        &self,
        conn: &mut Connection,
        token: &AuthToken,
    ) -> Result<Verdict, DirectoryError> {
        let Some(mut stored) = self.find_by_login(&token.account_name)? else {
            return Ok(Verdict::ban(ResponseCode::IncorrectCredentials, "incorrect credentials"));
        };

        match password::verify_password(&token.password, &stored.password_hash) {
            Ok(true) => {},
            Ok(false) => {
                return Ok(Verdict::ban(ResponseCode::IncorrectCredentials, "incorrect credentials"));
            },
            Err(e) => {
                tracing::warn!(login = %stored.login_name, "stored credential unusable: {e}");
                return Ok(Verdict::ban(ResponseCode::IncorrectCredentials, "incorrect credentials"));
            },
        }

        // Stored identity first: a failure here leaves the connection as it was.
        stored.authorized = true;
        stored.connected = true;
        self.directory.admit_to_default(&mut stored)?;

        let previous = std::mem::replace(&mut conn.identity, stored);
        conn.state = ConnectionState::Authenticated;
        self.registry.remove_if_session(previous.id, conn.session_id);
        self.registry.register(conn.identity.id, conn.session_handle());

        if previous.is_guest() {
            if let Err(e) = self.directory.remove_identity(&previous) {
                tracing::error!(
                    session_id = conn.session_id,
                    guest = %previous.id,
                    "guest cleanup after login failed: {e}"
                );
            }
        }

        let previous = previous.id;
        tracing::info!(
            session_id = conn.session_id,
            %previous,
            identity = %conn.identity.id,
            login = %conn.identity.login_name,
            "session authenticated"
        );
        Ok(Verdict::ok())
    }

    /// First stored non-guest identity whose login name is exactly `login`.
    fn find_by_login(&self, login: &str) -> Result<Option<Identity>, DirectoryError> {
        if login.is_empty() {
            return Ok(None);
        }

        let store = self.directory.store();
        let pattern = format!("user:*:{}:*", glob::Pattern::escape(login));
        for key in store.keys_matching(&pattern)? {
            let Some(id) = key.rsplit(':').next().and_then(|raw| raw.parse::<IdentityId>().ok())
            else {
                continue;
            };
            if let Some(identity) = store.read_identity(id)? {
                if identity.login_name == login && !identity.is_guest() {
                    return Ok(Some(identity));
                }
            }
        }
        Ok(None)
    }

    fn message(&self, conn: &Connection, to: &str, raw: &[u8]) -> Result<Verdict, DirectoryError> {
        let frame: OutboundFrame = Arc::from(String::from_utf8_lossy(raw).as_ref());

        if !Directory::<S>::is_room_name(to) {
            return Ok(match to.parse::<IdentityId>() {
                Ok(recipient) if self.registry.contains(recipient) => {
                    Verdict::relay(Route::Identity(recipient), frame)
                },
                _ => Verdict::reject(ResponseCode::NotFound, format!("no such user: {to}")),
            });
        }

        let path = match RoomPath::parse(to) {
            Ok(path) => path,
            Err(e) => return Ok(Verdict::reject(ResponseCode::BadRequestOrObject, e.to_string())),
        };
        if let Some(denied) = self.check_group_access(conn, &path)? {
            return Ok(denied);
        }

        let Some(room) = self.directory.get_room(&path)? else {
            return Ok(Verdict::reject(ResponseCode::NotFound, format!("no such room: {path}")));
        };
        if room.private && !room.members.contains(&conn.identity.id) {
            return Ok(Verdict::ban(ResponseCode::Forbidden, format!("not a member of {path}")));
        }

        Ok(Verdict::relay(Route::Room(room), frame))
    }

    fn join(&self, conn: &mut Connection, target: &str) -> Result<Verdict, DirectoryError> {
        let path = match RoomPath::parse(target) {
            Ok(path) => path,
            Err(e) => return Ok(Verdict::reject(ResponseCode::BadRequestOrObject, e.to_string())),
        };
        if let Some(denied) = self.check_group_access(conn, &path)? {
            return Ok(denied);
        }

        let room = self.directory.new_or_existing_room(&path)?;
        if room.private && !room.members.contains(&conn.identity.id) {
            return Ok(Verdict::ban(ResponseCode::Forbidden, format!("{path} is private")));
        }

        self.directory.join_room(&mut conn.identity, &path)?;
        tracing::debug!(identity = %conn.identity.id, room = %path, "joined");
        Ok(Verdict::ok())
    }

    fn part(&self, conn: &mut Connection, target: &str) -> Result<Verdict, DirectoryError> {
        let path = match RoomPath::parse(target) {
            Ok(path) => path,
            Err(e) => return Ok(Verdict::reject(ResponseCode::BadRequestOrObject, e.to_string())),
        };
        if self.directory.get_group(path.group())?.is_none() {
            return Ok(Verdict::reject(ResponseCode::NotFound, format!("no such group: {}", path.group())));
        }
        if self.directory.get_room(&path)?.is_none() {
            return Ok(Verdict::reject(ResponseCode::NotFound, format!("no such room: {path}")));
        }

        if !self.directory.part_room(&mut conn.identity, &path)? {
            return Ok(Verdict::reject(ResponseCode::Gone, format!("not a member of {path}")));
        }
        tracing::debug!(identity = %conn.identity.id, room = %path, "parted");
        Ok(Verdict::ok())
    }

    /// Group existence, guest containment and group membership, in that
    /// order. `None` means access is allowed.
    fn check_group_access(
        &self,
        conn: &Connection,
        path: &RoomPath,
    ) -> Result<Option<Verdict>, DirectoryError> {
        let Some(group) = self.directory.get_group(path.group())? else {
            return Ok(Some(Verdict::reject(
                ResponseCode::NotFound,
                format!("no such group: {}", path.group()),
            )));
        };

        // Bans on msg as well as join.
        if conn.identity.is_guest() && !path.in_default_group() {
            return Ok(Some(Verdict::ban(
                ResponseCode::Forbidden,
                "guests are limited to the default group",
            )));
        }
        if !group.members.contains(&conn.identity.id) {
            return Ok(Some(Verdict::ban(
                ResponseCode::Forbidden,
                format!("not a member of {}", path.group()),
            )));
        }

        Ok(None)
    }
}
