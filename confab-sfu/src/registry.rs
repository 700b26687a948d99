//! Session registry
//!
//! Process-wide lookup tables, owned by an [`crate::Sfu`] instance rather than
//! living in statics so tests can run isolated registries side by side:
//!
//! - room id → room
//! - connection → (room, peer)
//! - transport → (room, peer, direction), used to route engine events back to
//!   the session that requested the transport. A miss means the requester is
//!   gone and the event is ignored.

use crate::error::{Entity, Result, SfuError};
use crate::room::Room;
use crate::types::{ConnectionId, Direction, PeerId, RoomId, TransportId, WorkerId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Where a connection's session lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRoute {
    pub room_id: RoomId,
    pub peer_id: PeerId,
}

/// Who a transport belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRoute {
    pub room_id: RoomId,
    pub peer_id: PeerId,
    pub direction: Direction,
}

#[derive(Default)]
pub struct SessionRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    connections: DashMap<ConnectionId, SessionRoute>,
    transports: DashMap<TransportId, TransportRoute>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a room id not currently in use
    #[must_use]
    pub fn allocate_room_id(&self) -> RoomId {
        loop {
            let id = RoomId::generate();
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    /// Compare-and-insert: store the room unless its id is taken, in which
    /// case the room already registered under that id is returned.
    pub fn insert_room(&self, room: Arc<Room>) -> std::result::Result<(), Arc<Room>> {
        match self.rooms.entry(room.id().clone()) {
            Entry::Occupied(existing) => Err(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                slot.insert(room);
                Ok(())
            }
        }
    }

    pub fn get_room(&self, id: &RoomId) -> Result<Arc<Room>> {
        self.rooms
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SfuError::not_found(Entity::Room, id))
    }

    #[must_use]
    pub fn contains_room(&self, id: &RoomId) -> bool {
        self.rooms.contains_key(id)
    }

    /// Remove a room with no peers. Rooms that still have peers are left in
    /// place; removing an absent room is a no-op.
    pub fn remove_room(&self, id: &RoomId) -> bool {
        let removed = self.rooms.remove_if(id, |_, room| room.is_empty()).is_some();
        if removed {
            debug!(room_id = %id, "Room removed from registry");
        }
        removed
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    #[must_use]
    pub fn rooms_on_worker(&self, worker_id: WorkerId) -> Vec<Arc<Room>> {
        self.rooms
            .iter()
            .filter(|entry| entry.value().worker_id() == worker_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn bind_connection(&self, connection: ConnectionId, room_id: RoomId, peer_id: PeerId) {
        self.connections
            .insert(connection, SessionRoute { room_id, peer_id });
    }

    pub fn resolve_peer(&self, connection: &ConnectionId) -> Result<SessionRoute> {
        self.connections
            .get(connection)
            .map(|entry| entry.value().clone())
            .ok_or(SfuError::NoSession)
    }

    /// Unbind a connection, but only if it still points at `peer_id`
    pub fn unbind_peer(&self, connection: &ConnectionId, peer_id: &PeerId) -> bool {
        self.connections
            .remove_if(connection, |_, route| &route.peer_id == peer_id)
            .is_some()
    }

    pub fn register_transport(&self, transport_id: TransportId, route: TransportRoute) {
        self.transports.insert(transport_id, route);
    }

    #[must_use]
    pub fn route_transport(&self, transport_id: &TransportId) -> Option<TransportRoute> {
        self.transports.get(transport_id).map(|entry| entry.value().clone())
    }

    /// Every registered transport with its owner
    #[must_use]
    pub fn transport_routes(&self) -> Vec<(TransportId, TransportRoute)> {
        self.transports
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn unregister_transport(&self, transport_id: &TransportId) {
        self.transports.remove(transport_id);
    }
}
