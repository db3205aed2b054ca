//! Connection Directory
//!
//! Maps connection ids to live WebSocket sessions so peers can exchange
//! offers, answers and ICE candidates through the server.

use dashmap::DashMap;
use tracing::{debug, warn};

use voxmesh_common::protocol::{ServerEvent, SignalPayload};
use voxmesh_common::{ConnectionId, SessionId};

use super::registry::EventSender;

struct Entry {
    session_id: SessionId,
    tx: EventSender,
}

/// Outcome of a relay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    Delivered,
    /// Target not connected; the sender was told with `peer-unavailable`.
    Unavailable,
}

/// Live connections keyed by connection id.
#[derive(Default)]
pub struct ConnectionDirectory {
    entries: DashMap<ConnectionId, Entry>,
}

impl ConnectionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened session.
    pub fn register(&self, connection_id: ConnectionId, session_id: SessionId, tx: EventSender) {
        self.entries.insert(connection_id, Entry { session_id, tx });
        debug!(connection_id = %connection_id, session_id = %session_id, "Connection registered");
    }

    /// Drop a closed session. Only removes the entry if it still belongs to `session_id`.
    pub fn unregister(&self, connection_id: ConnectionId, session_id: SessionId) {
        self.entries
            .remove_if(&connection_id, |_, entry| entry.session_id == session_id);
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forward `signal` from `from` to `to`.
    pub async fn relay(
        &self,
        from: ConnectionId,
        to: ConnectionId,
        signal: SignalPayload,
        reply: &EventSender,
    ) -> Relay {
        // Clone the sender so no shard lock is held while queuing.
        let target = self.entries.get(&to).map(|entry| entry.tx.clone());

        if let Some(tx) = target {
            match tx.try_send(ServerEvent::Signal { from, signal }) {
                Ok(()) => return Relay::Delivered,
                Err(e) => warn!(from = %from, to = %to, error = %e, "Signal target cannot take events"),
            }
        }

        if let Err(e) = reply
            .send(ServerEvent::PeerUnavailable { connection_id: to })
            .await
        {
            warn!(connection_id = %from, error = %e, "Failed to report unavailable peer");
        }
        Relay::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn relays_to_registered_target() {
        let directory = ConnectionDirectory::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        directory.register(a, Uuid::new_v4(), tx_a.clone());
        directory.register(b, Uuid::new_v4(), tx_b);

        let signal = SignalPayload::Offer { sdp: "v=0".into() };
        let outcome = directory.relay(a, b, signal.clone(), &tx_a).await;

        assert_eq!(outcome, Relay::Delivered);
        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::Signal { from: a, signal });
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_target_reports_unavailable() {
        let directory = ConnectionDirectory::new();
        let (tx, mut rx) = mpsc::channel(4);
        let a = Uuid::new_v4();
        let ghost = Uuid::new_v4();
        directory.register(a, Uuid::new_v4(), tx.clone());

        let outcome = directory
            .relay(a, ghost, SignalPayload::Answer { sdp: String::new() }, &tx)
            .await;

        assert_eq!(outcome, Relay::Unavailable);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::PeerUnavailable {
                connection_id: ghost
            }
        );
    }

    #[tokio::test]
    async fn unregister_checks_owner() {
        let directory = ConnectionDirectory::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = Uuid::new_v4();
        let owner = Uuid::new_v4();
        directory.register(conn, owner, tx);

        directory.unregister(conn, Uuid::new_v4());
        assert_eq!(directory.len(), 1);

        directory.unregister(conn, owner);
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn full_target_queue_reports_unavailable() {
        let directory = ConnectionDirectory::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(1);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        directory.register(a, Uuid::new_v4(), tx_a.clone());
        directory.register(b, Uuid::new_v4(), tx_b.clone());
        tx_b.try_send(ServerEvent::Pong).unwrap();

        let outcome = directory
            .relay(a, b, SignalPayload::Offer { sdp: "v=0".into() }, &tx_a)
            .await;

        assert_eq!(outcome, Relay::Unavailable);
        assert_eq!(
            rx_a.try_recv().unwrap(),
            ServerEvent::PeerUnavailable { connection_id: b }
        );
    }
}
