//! Session registry.
//!
//! The one structure shared by every connection task. Maps identity ids to
//! live session handles; each handle carries the session's outbound channel,
//! so holding a handle is all it takes to write to that client.
//!
//! Handles are cloned out of the lock. No lock is ever held across I/O or an
//! `.await`: a send through a stale handle simply fails with
//! [`DeliveryError::ChannelClosed`].

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::{
    identity::{IdentityId, IdentityKind},
    router::DeliveryError,
};

/// One encoded outbound frame, shared between fan-out recipients.
pub type OutboundFrame = Arc<str>;

/// Write capability for one session.
///
/// Backed by a bounded channel drained by the session's writer task. Sends
/// never block: a full channel is reported, not waited on.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<OutboundFrame>,
}

impl Outbound {
    /// Create a channel with room for `capacity` queued frames.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// - `DeliveryError::ChannelFull` if the writer is too far behind
    /// - `DeliveryError::ChannelClosed` if the writer task has exited
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::ChannelClosed,
        })
    }

    /// Whether the writer task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Registry entry for one live connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Connection-local id; distinguishes a reconnect from its predecessor
    pub session_id: u64,
    /// Identity currently bound to the connection
    pub identity_id: IdentityId,
    /// Kind of that identity
    pub kind: IdentityKind,
    /// Whether the identity passed authentication
    pub authorized: bool,
    /// Write capability
    pub outbound: Outbound,
}

/// Concurrent map of identity id to live session.
///
/// Reads proceed in parallel; writes are exclusive.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<IdentityId, Session>>,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for `id`.
    ///
    /// Returns the replaced session, if any.
    pub fn register(&self, id: IdentityId, session: Session) -> Option<Session> {
        self.sessions.write().insert(id, session)
    }

    /// Session for `id`. `None` if no live session is bound to it.
    pub fn get(&self, id: IdentityId) -> Option<Session> {
        self.sessions.read().get(&id).cloned()
    }

    /// Remove the session for `id`. No-op if absent.
    pub fn remove(&self, id: IdentityId) -> Option<Session> {
        self.sessions.write().remove(&id)
    }

    /// Remove the entry for `id` only if it still belongs to `session_id`.
    ///
    /// A connection that lost its identity to a newer login must not evict
    /// the newer session when it closes.
    pub fn remove_if_session(&self, id: IdentityId, session_id: u64) -> Option<Session> {
        let mut sessions = self.sessions.write();
        let owned = sessions.get(&id).is_some_and(|s| s.session_id == session_id);
        if owned { sessions.remove(&id) } else { None }
    }

    /// All sessions matching `predicate`.
    pub fn filter<F>(&self, mut predicate: F) -> Vec<Session>
    where
        F: FnMut(&Session) -> bool,
    {
        self.sessions.read().values().filter(|s| predicate(s)).cloned().collect()
    }

    /// Whether `id` has a live session.
    pub fn contains(&self, id: IdentityId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
