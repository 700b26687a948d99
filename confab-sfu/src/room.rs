//! Room state
//!
//! A room is the unit of consistency: its peer map together with every
//! peer's producers and consumers sits behind one async mutex. All room
//! manager and fan-out work for the room runs while holding it.

use crate::engine::RouterHandle;
use crate::peer::{PeerSession, PeerSnapshot};
use crate::rtp::RtpCapabilities;
use crate::signaling::ServerMessage;
use crate::types::{PeerId, RoomId, RouterId, WorkerId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct Room {
    id: RoomId,
    /// Capability context; created once with the room and never changed
    router: RouterHandle,
    created_at: DateTime<Utc>,
    /// Mirror of `state.peers.len()` readable without the lock
    peer_count: AtomicUsize,
    state: Mutex<RoomState>,
}

#[derive(Debug, Default)]
pub struct RoomState {
    pub(crate) peers: HashMap<PeerId, PeerSession>,
    /// Set once the room has been removed from the registry. A caller that
    /// looked the room up before removal must treat it as gone.
    pub(crate) closed: bool,
    next_seq: u64,
}

impl RoomState {
    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Ids of every peer except `excluding`, in join order. The returned
    /// vector is a stable snapshot for one fan-out pass.
    #[must_use]
    pub fn other_peer_ids(&self, excluding: &PeerId) -> Vec<PeerId> {
        let mut others: Vec<&PeerSession> = self
            .peers
            .values()
            .filter(|peer| &peer.id != excluding)
            .collect();
        others.sort_by_key(|peer| peer.seq);
        others.into_iter().map(|peer| peer.id.clone()).collect()
    }

    #[must_use]
    pub fn peer(&self, id: &PeerId) -> Option<&PeerSession> {
        self.peers.get(id)
    }

    pub(crate) fn peer_mut(&mut self, id: &PeerId) -> Option<&mut PeerSession> {
        self.peers.get_mut(id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Send a message to every peer except `excluding`
    pub(crate) fn broadcast(&self, excluding: &PeerId, message: &ServerMessage) -> usize {
        self.peers
            .values()
            .filter(|peer| &peer.id != excluding)
            .filter(|peer| peer.send(message.clone()))
            .count()
    }
}

impl Room {
    pub(crate) fn new(id: RoomId, router: RouterHandle) -> Self {
        Self {
            id,
            router,
            created_at: Utc::now(),
            peer_count: AtomicUsize::new(0),
            state: Mutex::new(RoomState::default()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.id
    }

    #[must_use]
    pub const fn router_id(&self) -> &RouterId {
        &self.router.id
    }

    #[must_use]
    pub const fn worker_id(&self) -> WorkerId {
        self.router.worker_id
    }

    #[must_use]
    pub const fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.router.rtp_capabilities
    }

    /// Enter the room's exclusive domain
    pub async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peer_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peer_count() == 0
    }

    /// Refresh the lock-free peer count; call with the guard held after
    /// changing the peer map
    pub(crate) fn sync_peer_count(&self, state: &RoomState) {
        self.peer_count.store(state.peers.len(), Ordering::Release);
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        let state = self.lock().await;
        let mut peers: Vec<&PeerSession> = state.peers.values().collect();
        peers.sort_by_key(|peer| peer.seq);
        RoomSnapshot {
            id: self.id.clone(),
            worker_id: self.worker_id(),
            created_at: self.created_at,
            peers: peers.into_iter().map(PeerSession::snapshot).collect(),
        }
    }
}

/// Point-in-time view of a room
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub worker_id: WorkerId,
    pub created_at: DateTime<Utc>,
    pub peers: Vec<PeerSnapshot>,
}

impl RoomSnapshot {
    #[must_use]
    pub fn peer(&self, id: &PeerId) -> Option<&PeerSnapshot> {
        self.peers.iter().find(|peer| &peer.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;

    fn room() -> Room {
        Room::new(
            RoomId::from("r1"),
            RouterHandle {
                id: RouterId::from("router"),
                worker_id: 0,
                rtp_capabilities: RtpCapabilities::default(),
            },
        )
    }

    #[tokio::test]
    async fn test_other_peer_ids_in_join_order() {
        let room = room();
        let conns: Vec<Connection> = (0..3).map(|_| Connection::new(4).0).collect();
        {
            let mut state = room.lock().await;
            for (name, conn) in ["c", "a", "b"].into_iter().zip(&conns) {
                let seq = state.next_seq();
                let peer = PeerSession::new(PeerId::from(name), room.id().clone(), seq, conn.handle());
                state.peers.insert(peer.id.clone(), peer);
            }
            room.sync_peer_count(&state);
            assert_eq!(
                state.other_peer_ids(&PeerId::from("a")),
                vec![PeerId::from("c"), PeerId::from("b")]
            );
        }
        assert_eq!(room.peer_count(), 3);
        let snapshot = room.snapshot().await;
        assert_eq!(snapshot.peers[0].id, PeerId::from("c"));
    }
}
