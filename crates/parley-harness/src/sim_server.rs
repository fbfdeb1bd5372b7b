//! In-process server and clients.
//!
//! [`SimServer`] wires a [`ProtocolEngine`] and a [`Router`] over any
//! [`IdentityStore`] exactly as the production runtime does, minus the
//! sockets. Each [`SimClient`] owns a connection and the receiving end of its
//! outbound channel, so tests can send frames and inspect every byte a real
//! client would have received.

use std::sync::Arc;

use parley_proto::{Response, ResponseCode};
use parley_server::{
    Connection, Directory, DirectoryError, EngineConfig, Environment, Flow, IdentityId,
    IdentityStore, MemoryStore, Outbound, OutboundFrame, ProtocolEngine, Router, SessionRegistry,
};
use serde_json::json;
use tokio::sync::mpsc;

use crate::SimEnv;

/// Outbound queue depth for simulated clients.
pub const SIM_OUTBOUND_BUFFER: usize = 256;

/// A frame received by a simulated client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Server response to one of this client's frames
    Response(Response),
    /// Frame relayed from another client
    Relay(String),
}

impl Received {
    /// Response code, if this is a response.
    pub fn code(&self) -> Option<ResponseCode> {
        match self {
            Self::Response(r) => r.code(),
            Self::Relay(_) => None,
        }
    }
}

/// Simulated server.
pub struct SimServer<S: IdentityStore = MemoryStore> {
    engine: Arc<ProtocolEngine<SimEnv, S>>,
    router: Router,
    env: SimEnv,
}

impl SimServer<MemoryStore> {
    /// Server over a fresh in-memory store with default policy.
    pub fn new(seed: u64) -> Result<Self, DirectoryError> {
        Self::with_store(seed, MemoryStore::new(), EngineConfig::default())
    }
}

impl<S: IdentityStore> SimServer<S> {
    /// Server over `store`, bootstrapping the default space.
    pub fn with_store(seed: u64, store: S, config: EngineConfig) -> Result<Self, DirectoryError> {
        let env = SimEnv::with_seed(seed);
        let directory = Directory::open(store)?;
        let registry = Arc::new(SessionRegistry::new());
        let engine = ProtocolEngine::new(env.clone(), directory, Arc::clone(&registry), config);

        Ok(Self { engine: Arc::new(engine), router: Router::new(registry), env })
    }

    /// Open a client connection and deliver its greeting.
    pub fn connect(&self) -> Result<SimClient<S>, DirectoryError> {
        let (outbound, rx) = Outbound::channel(SIM_OUTBOUND_BUFFER);
        let (conn, actions) = self.engine.connect(outbound)?;

        let mut client = SimClient {
            engine: Arc::clone(&self.engine),
            router: self.router.clone(),
            env: self.env.clone(),
            conn,
            rx,
            closed: false,
        };
        let flow = client.router.execute(&client.conn, actions);
        client.finish(flow);
        Ok(client)
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Engine under test.
    pub fn engine(&self) -> &ProtocolEngine<SimEnv, S> {
        &self.engine
    }

    /// Directory under test.
    pub fn directory(&self) -> &Directory<S> {
        self.engine.directory()
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        self.engine.directory().store()
    }

    /// Live session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.engine.registry()
    }
}

/// Simulated client connection.
pub struct SimClient<S: IdentityStore = MemoryStore> {
    engine: Arc<ProtocolEngine<SimEnv, S>>,
    router: Router,
    env: SimEnv,
    conn: Connection,
    rx: mpsc::Receiver<OutboundFrame>,
    closed: bool,
}

impl<S: IdentityStore> SimClient<S> {
    /// Send a raw frame. Disconnects the client if the server closes it.
    pub fn send(&mut self, frame: &str) -> Flow {
        if self.closed {
            return Flow::Close("already closed".to_string());
        }
        let actions = self.engine.handle_frame(&mut self.conn, frame.as_bytes());
        let flow = self.router.execute(&self.conn, actions);
        self.finish(flow)
    }

    /// Send a `msg` to a room path or identity id.
    pub fn msg(&mut self, to: &str, message: &str) -> Flow {
        let frame = json!({ "action": "msg", "time": self.now(), "to": to, "message": message });
        self.send(&frame.to_string())
    }

    /// Send a `join` for a room path.
    pub fn join(&mut self, room: &str) -> Flow {
        let frame = json!({ "action": "join", "time": self.now(), "room": room });
        self.send(&frame.to_string())
    }

    /// Send a `part` for a room path.
    pub fn part(&mut self, room: &str) -> Flow {
        let frame = json!({ "action": "part", "time": self.now(), "room": room });
        self.send(&frame.to_string())
    }

    /// Send a `leave` for a room path.
    pub fn leave(&mut self, room: &str) -> Flow {
        let frame = json!({ "action": "leave", "time": self.now(), "room": room });
        self.send(&frame.to_string())
    }

    /// Send an `authenticate` with the given credentials.
    pub fn authenticate(&mut self, account_name: &str, password: &str) -> Flow {
        let frame = json!({
            "action": "authenticate",
            "time": self.now(),
            "user": { "account_name": account_name, "password": password },
        });
        self.send(&frame.to_string())
    }

    /// Everything queued for this client since the last drain.
    pub fn drain(&mut self) -> Vec<Received> {
        let mut received = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            received.push(match Response::decode(frame.as_bytes()) {
                Ok(response) => Received::Response(response),
                Err(_) => Received::Relay(frame.to_string()),
            });
        }
        received
    }

    /// Response codes queued since the last drain, in order.
    pub fn drain_codes(&mut self) -> Vec<ResponseCode> {
        self.drain().iter().filter_map(Received::code).collect()
    }

    /// Relayed frames queued since the last drain, in order.
    pub fn drain_relays(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|r| match r {
                Received::Relay(frame) => Some(frame),
                Received::Response(_) => None,
            })
            .collect()
    }

    /// Close the connection as a dropped socket would.
    pub fn disconnect(&mut self) {
        self.engine.disconnect(&mut self.conn);
        self.closed = true;
    }

    /// Identity currently bound to the connection.
    pub fn id(&self) -> IdentityId {
        self.conn.identity().id
    }

    /// Connection state.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Whether the server has closed this client.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn now(&self) -> i64 {
        self.env.wall_clock_secs()
    }

    fn finish(&mut self, flow: Flow) -> Flow {
        if let Flow::Close(reason) = &flow {
            tracing::debug!(session_id = self.conn.session_id(), "server closed client: {reason}");
            self.disconnect();
        }
        flow
    }
}
