//! Outbound delivery.
//!
//! Resolves destinations to live sessions and queues frames on their
//! outbound channels. Delivery is fire-and-forget: a failed write is
//! reported and logged, never retried, and never stops the rest of a
//! fan-out.

use std::sync::Arc;

use parley_proto::Response;

use crate::{
    engine::{Connection, Route, SessionAction},
    identity::{IdentityId, Room},
    registry::{OutboundFrame, SessionRegistry},
};

/// Why a single write did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// No live session for the recipient
    #[error("recipient offline")]
    Offline,

    /// Recipient's outbound queue is full
    #[error("outbound queue full")]
    ChannelFull,

    /// Recipient's writer task has exited
    #[error("outbound channel closed")]
    ChannelClosed,
}

/// Outcome of a room fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Frames queued
    pub delivered: usize,
    /// Members without a live session
    pub offline: usize,
    /// Writes that failed
    pub failed: usize,
}

/// What the connection loop should do after executing actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading
    Continue,
    /// Close the connection
    Close(String),
}

/// Delivers frames to live sessions.
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<SessionRegistry>,
}

impl Router {
    /// Create a router over a shared registry.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Queue `frame` for every live member of `room` except `exclude`.
    ///
    /// Offline members are skipped silently; failed writes are logged.
    pub fn deliver_to_room(
        &self,
        room: &Room,
        frame: &OutboundFrame,
        exclude: Option<IdentityId>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for &member in &room.members {
            if Some(member) == exclude {
                continue;
            }
            match self.deliver_to_one(member, frame) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Offline) => report.offline += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(room = %room.path(), recipient = %member, "delivery failed: {e}");
                },
            }
        }

        report
    }

    /// Queue `frame` for the live session of `id`.
    ///
    /// # Errors
    ///
    /// - `DeliveryError::Offline` if `id` has no live session
    /// - `DeliveryError::ChannelFull` / `ChannelClosed` from the channel
    pub fn deliver_to_one(&self, id: IdentityId, frame: &OutboundFrame) -> Result<(), DeliveryError> {
        let session = self.registry.get(id).ok_or(DeliveryError::Offline)?;
        session.outbound.try_send(Arc::clone(frame))
    }

    /// Execute engine actions for one connection.
    ///
    /// Replies go to the connection's own channel; relays go through the
    /// registry. Returns [`Flow::Close`] if any action asked to close.
    pub fn execute(&self, conn: &Connection, actions: Vec<SessionAction>) -> Flow {
        let mut flow = Flow::Continue;

        for action in actions {
            match action {
                SessionAction::Reply(response) => {
                    let Some(frame) = encode_response(&response) else { continue };
                    if let Err(e) = conn.outbound().try_send(frame) {
                        tracing::warn!(session_id = conn.session_id(), "reply dropped: {e}");
                    }
                },

                SessionAction::Relay { route: Route::Room(room), frame } => {
                    let report = self.deliver_to_room(&room, &frame, Some(conn.identity().id));
                    tracing::debug!(
                        room = %room.path(),
                        delivered = report.delivered,
                        offline = report.offline,
                        failed = report.failed,
                        "room relay"
                    );
                },

                SessionAction::Relay { route: Route::Identity(recipient), frame } => {
                    if let Err(e) = self.deliver_to_one(recipient, &frame) {
                        tracing::warn!(%recipient, "direct delivery failed: {e}");
                    }
                },

                SessionAction::Close { reason } => {
                    tracing::info!(session_id = conn.session_id(), "closing connection: {reason}");
                    flow = Flow::Close(reason);
                },
            }
        }

        flow
    }
}

fn encode_response(response: &Response) -> Option<OutboundFrame> {
    match response.encode() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            tracing::error!("failed to encode response: {e}");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        identity::IdentityKind,
        registry::{Outbound, Session},
    };

    fn live(registry: &SessionRegistry, raw: u128) -> mpsc::Receiver<OutboundFrame> {
        let (outbound, rx) = Outbound::channel(2);
        let id = IdentityId::new(raw);
        registry.register(id, Session {
            session_id: raw as u64,
            identity_id: id,
            kind: IdentityKind::Guest,
            authorized: false,
            outbound,
        });
        rx
    }

    #[test]
    fn room_delivery_skips_offline_and_excluded() {
        let registry = Arc::new(SessionRegistry::new());
        let router = Router::new(Arc::clone(&registry));
        let mut rx1 = live(&registry, 1);
        let mut rx2 = live(&registry, 2);

        let mut room = Room::new("#default", "#general");
        room.members.extend([1, 2, 3].map(IdentityId::new));

        let frame: OutboundFrame = Arc::from("hi");
        let report = router.deliver_to_room(&room, &frame, Some(IdentityId::new(2)));

        assert_eq!(report, DeliveryReport { delivered: 1, offline: 1, failed: 0 });
        assert_eq!(rx1.try_recv().unwrap().as_ref(), "hi");
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn room_delivery_continues_past_failures() {
        let registry = Arc::new(SessionRegistry::new());
        let router = Router::new(Arc::clone(&registry));
        let rx1 = live(&registry, 1);
        let mut rx2 = live(&registry, 2);
        drop(rx1);

        let mut room = Room::new("#default", "#general");
        room.members.extend([1, 2].map(IdentityId::new));

        let report = router.deliver_to_room(&room, &Arc::from("x"), None);
        assert_eq!(report, DeliveryReport { delivered: 1, offline: 0, failed: 1 });
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn direct_delivery_to_offline_fails() {
        let router = Router::new(Arc::new(SessionRegistry::new()));
        let err = router.deliver_to_one(IdentityId::new(9), &Arc::from("x")).unwrap_err();
        assert_eq!(err, DeliveryError::Offline);
    }
}
