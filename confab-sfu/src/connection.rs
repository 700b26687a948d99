//! Signaling connection handles
//!
//! The transport layer owns a [`Connection`] for as long as the socket is
//! open and drains its outbound queue. Peer sessions only keep a
//! [`ConnectionHandle`], a weak reference that stops delivering once the
//! transport layer drops the connection.

use crate::signaling::ServerMessage;
use crate::types::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Item on a connection's outbound queue
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(ServerMessage),
    /// The server is terminating the session; the transport should close the socket
    Close { reason: String },
}

/// Strong, transport-owned end of a signaling connection
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

impl Connection {
    /// Create a connection with a bounded outbound queue
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ConnectionId::generate(),
                tx,
            },
            rx,
        )
    }

    #[must_use]
    pub const fn id(&self) -> &ConnectionId {
        &self.id
    }

    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id.clone(),
            tx: self.tx.downgrade(),
        }
    }
}

/// Weak reference to a connection used to push events to it
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::WeakSender<Outbound>,
}

impl ConnectionHandle {
    #[must_use]
    pub const fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a message. Returns false if the connection is gone or too slow
    /// to keep up, in which case the message is dropped.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.push(Outbound::Message(message))
    }

    /// Ask the transport layer to close the socket
    pub fn close(&self, reason: impl Into<String>) -> bool {
        self.push(Outbound::Close {
            reason: reason.into(),
        })
    }

    fn push(&self, item: Outbound) -> bool {
        let Some(tx) = self.tx.upgrade() else {
            debug!(connection_id = %self.id, "Connection already closed, dropping outbound item");
            return false;
        };
        match tx.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection_id = %self.id, "Outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.tx.upgrade().is_some_and(|tx| !tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerId;

    #[tokio::test]
    async fn test_handle_stops_after_connection_dropped() {
        let (conn, mut rx) = Connection::new(4);
        let handle = conn.handle();
        assert!(handle.send(ServerMessage::PeerJoined {
            peer_id: PeerId::from("p1")
        }));
        assert!(matches!(rx.recv().await, Some(Outbound::Message(_))));

        drop(conn);
        assert!(!handle.is_open());
        assert!(!handle.send(ServerMessage::PeerLeft {
            peer_id: PeerId::from("p1")
        }));
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (conn, _rx) = Connection::new(1);
        let handle = conn.handle();
        assert!(handle.close("bye"));
        assert!(!handle.close("again"));
    }
}
