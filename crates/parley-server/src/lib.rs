//! Parley messaging server.
//!
//! Real-time chat over WebSockets: clients connect, are admitted as guests
//! (or authenticate), join rooms inside groups and exchange JSON messages
//! with rooms or with single users.
//!
//! # Architecture
//!
//! The [`ProtocolEngine`] follows the Sans-IO pattern: it turns inbound
//! frames into [`SessionAction`]s without touching a socket. [`Server`]
//! owns the I/O and hands those actions to the [`Router`], which writes
//! them to per-session outbound channels. One writer task per connection
//! drains its channel into the WebSocket, so a slow client never blocks a
//! sender.
//!
//! ```text
//!  WebSocket ──> read loop ──> ProtocolEngine ──> [SessionAction] ──> Router
//!                                   │                                   │
//!                               Directory                        SessionRegistry
//!                                   │                                   │
//!                             IdentityStore                  Outbound ──> writer task ──> WebSocket
//! ```
//!
//! # Components
//!
//! - [`ProtocolEngine`]: per-connection state machine (pure logic, no I/O)
//! - [`Directory`]: groups, rooms and membership, written through to storage
//! - [`SessionRegistry`]: live sessions keyed by identity id
//! - [`Router`]: executes engine actions and fans out relays
//! - [`Server`]: production runtime over Tokio and tokio-tungstenite
//! - [`SystemEnv`]: production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod directory;
mod engine;
mod env;
mod error;
mod identity;
mod password;
mod registry;
mod router;
pub mod storage;
mod system_env;
mod transport;

use std::{net::SocketAddr, sync::Arc};

pub use config::{ConfigError, ServerConfig, StorageConfig};
pub use directory::{Directory, DirectoryError};
pub use engine::{
    Connection, ConnectionState, EngineConfig, ProtocolEngine, Route, SessionAction,
};
pub use env::Environment;
pub use error::ServerError;
use futures_util::{SinkExt, StreamExt};
pub use identity::{Group, Identity, IdentityId, IdentityKind, ParseIdentityIdError, Room};
pub use password::{hash_password, verify_password};
pub use registry::{Outbound, OutboundFrame, Session, SessionRegistry};
pub use router::{DeliveryError, DeliveryReport, Flow, Router};
pub use storage::{ChaoticStore, IdentityStore, MemoryStore, RedbStore, StorageError};
pub use system_env::SystemEnv;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Message, protocol::WebSocketConfig};
pub use transport::{ClientStream, WebSocketTransport};

/// Production Parley server.
///
/// Wraps a [`ProtocolEngine`] with the WebSocket transport and the system
/// environment. Generic over the identity store so the backend is chosen
/// once, in `main`.
pub struct Server<S: IdentityStore> {
    engine: Arc<ProtocolEngine<SystemEnv, S>>,
    router: Router,
    transport: WebSocketTransport,
    outbound_buffer: usize,
}

impl<S: IdentityStore> Server<S> {
    /// Bootstrap the directory over `store` and bind the listener.
    ///
    /// # Errors
    ///
    /// - `ServerError::Storage` if the default space cannot be created
    /// - `ServerError::Config` / `ServerError::Transport` from the bind
    pub async fn bind(config: &ServerConfig, store: S) -> Result<Self, ServerError> {
        let directory = Directory::open(store)?;
        let registry = Arc::new(SessionRegistry::new());
        let engine = ProtocolEngine::new(
            SystemEnv::new(),
            directory,
            Arc::clone(&registry),
            config.engine(),
        );
        let transport =
            WebSocketTransport::bind(&config.bind_address, config.max_frame_bytes).await?;

        Ok(Self {
            engine: Arc::new(engine),
            router: Router::new(registry),
            transport,
            outbound_buffer: config.outbound_buffer,
        })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Shared engine, for inspection.
    pub fn engine(&self) -> &Arc<ProtocolEngine<SystemEnv, S>> {
        &self.engine
    }

    /// Run the server, accepting connections until the task is dropped.
    ///
    /// Engine calls hash passwords and commit store transactions, so they
    /// run under [`tokio::task::block_in_place`]. That needs the
    /// multi-threaded runtime.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.transport.local_addr()?);

        loop {
            match self.transport.accept().await {
                Ok((stream, peer)) => {
                    let engine = Arc::clone(&self.engine);
                    let router = self.router.clone();
                    let ws_config = self.transport.ws_config();
                    let outbound_buffer = self.outbound_buffer;

                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, ws_config, engine, router, outbound_buffer)
                                .await
                        {
                            tracing::warn!(%peer, "Connection error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }
}

/// Drive one client connection from handshake to cleanup.
///
/// Every exit from the read loop (client close, read error, ban) reaches
/// the single `disconnect` call below.
async fn handle_connection<S: IdentityStore>(
    stream: TcpStream,
    ws_config: WebSocketConfig,
    engine: Arc<ProtocolEngine<SystemEnv, S>>,
    router: Router,
    outbound_buffer: usize,
) -> Result<(), ServerError> {
    let ws = transport::upgrade(stream, ws_config).await?;
    let (mut sink, mut source) = ws.split();
    let (outbound, mut rx) = Outbound::channel(outbound_buffer);

    // Ends once every Outbound clone is dropped: the connection's own and
    // the registry's.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                tracing::debug!("Write error: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let (mut conn, actions) = tokio::task::block_in_place(|| engine.connect(outbound))?;
    let mut flow = router.execute(&conn, actions);

    while flow == Flow::Continue {
        let Some(message) = source.next().await else {
            break;
        };

        let actions = match message {
            Ok(Message::Text(text)) => {
                tokio::task::block_in_place(|| engine.handle_frame(&mut conn, text.as_bytes()))
            },
            Ok(Message::Binary(data)) => {
                tokio::task::block_in_place(|| engine.handle_frame(&mut conn, &data))
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(session_id = conn.session_id(), "Read error: {}", e);
                break;
            },
        };
        flow = router.execute(&conn, actions);
    }

    tokio::task::block_in_place(|| engine.disconnect(&mut conn));
    drop(conn);

    if let Err(e) = writer.await {
        tracing::warn!("Writer task failed: {}", e);
    }
    Ok(())
}
