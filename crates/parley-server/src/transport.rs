//! WebSocket transport.
//!
//! A TCP listener plus the WebSocket handshake. Each accepted socket is
//! upgraded inside its own connection task so a slow handshake never stalls
//! the accept loop.
//!
//! Frames are JSON text; binary frames are accepted and treated as UTF-8
//! JSON. Inbound messages larger than `max_frame_bytes` fail the read and
//! close the connection.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{WebSocketStream, tungstenite::protocol::WebSocketConfig};

use crate::error::ServerError;

/// Upgraded client connection.
pub type ClientStream = WebSocketStream<TcpStream>;

/// WebSocket listener.
pub struct WebSocketTransport {
    listener: TcpListener,
    ws_config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if `address` is not a socket address
    /// - `ServerError::Transport` if the bind fails
    pub async fn bind(address: &str, max_frame_bytes: usize) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        let ws_config = WebSocketConfig {
            max_message_size: Some(max_frame_bytes),
            max_frame_size: Some(max_frame_bytes),
            ..WebSocketConfig::default()
        };

        tracing::info!(%addr, "WebSocket transport bound");
        Ok(Self { listener, ws_config })
    }

    /// Accept the next TCP connection. The handshake is left to
    /// [`upgrade`](Self::upgrade).
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        Ok(self.listener.accept().await?)
    }

    /// Perform the WebSocket handshake on an accepted socket.
    pub async fn upgrade(&self, stream: TcpStream) -> Result<ClientStream, ServerError> {
        upgrade(stream, self.ws_config).await
    }

    /// Handshake settings, for upgrading outside the listener.
    pub fn ws_config(&self) -> WebSocketConfig {
        self.ws_config
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

/// Perform the server side of the WebSocket handshake.
pub async fn upgrade(stream: TcpStream, config: WebSocketConfig) -> Result<ClientStream, ServerError> {
    tokio_tungstenite::accept_async_with_config(stream, Some(config))
        .await
        .map_err(|e| ServerError::Transport(format!("WebSocket handshake failed: {e}")))
}
