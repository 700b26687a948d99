//! Producer → consumer fan-out
//!
//! Two passes drive consumer creation and both converge on the same rule:
//! every peer whose receive transport is connected holds exactly one
//! consumer for every compatible producer of every other peer in the room.
//!
//! - [`consume_existing`]: one peer became able to receive; walk everyone
//!   else's producers.
//! - [`distribute_producer`]: one producer started; walk every other peer.
//!
//! Both run with the room lock held, and [`ensure_consumer`] re-checks the
//! per-pair invariant before touching the engine, so running either pass
//! repeatedly or concurrently with the other never creates a duplicate.

use crate::engine::EngineClient;
use crate::peer::ConsumerEntry;
use crate::room::{Room, RoomState};
use crate::signaling::ServerMessage;
use crate::types::{Direction, PeerId, ProducerId};
use tracing::{debug, warn};

/// Create consumers for `peer_id` covering every other peer's producers.
/// Returns the number of consumers created.
pub(crate) async fn consume_existing(
    engine: &EngineClient,
    room: &Room,
    state: &mut RoomState,
    peer_id: &PeerId,
) -> usize {
    if !state.peer(peer_id).is_some_and(|p| p.is_ready(Direction::Receive)) {
        return 0;
    }

    let mut created = 0;
    for owner in state.other_peer_ids(peer_id) {
        let producers = state
            .peer(&owner)
            .map(|peer| peer.producer_ids())
            .unwrap_or_default();
        for producer_id in producers {
            if ensure_consumer(engine, room, state, peer_id, &owner, &producer_id).await {
                created += 1;
            }
        }
    }

    if created > 0 {
        debug!(room_id = %room.id(), peer_id = %peer_id, created, "Fan-out to newly receiving peer");
    }
    created
}

/// Create a consumer of `producer_id` for every other receiving peer.
/// Returns the number of consumers created.
pub(crate) async fn distribute_producer(
    engine: &EngineClient,
    room: &Room,
    state: &mut RoomState,
    owner: &PeerId,
    producer_id: &ProducerId,
) -> usize {
    let mut created = 0;
    for peer_id in state.other_peer_ids(owner) {
        if ensure_consumer(engine, room, state, &peer_id, owner, producer_id).await {
            created += 1;
        }
    }
    debug!(
        room_id = %room.id(),
        producer_id = %producer_id,
        created,
        "Fan-out of new producer"
    );
    created
}

/// Make sure `peer_id` consumes `producer_id` if it can. Returns true if a
/// consumer was created by this call.
async fn ensure_consumer(
    engine: &EngineClient,
    room: &Room,
    state: &mut RoomState,
    peer_id: &PeerId,
    owner: &PeerId,
    producer_id: &ProducerId,
) -> bool {
    if peer_id == owner {
        return false;
    }
    let producer_alive = state
        .peer(owner)
        .is_some_and(|p| p.producers().any(|producer| &producer.id == producer_id));
    if !producer_alive {
        return false;
    }

    let Some(peer) = state.peer(peer_id) else {
        return false;
    };
    if !peer.is_ready(Direction::Receive) || peer.has_consumer_for(producer_id) {
        return false;
    }
    let (Some(caps), Some(transport_id)) = (
        peer.rtp_capabilities().cloned(),
        peer.transport_id(Direction::Receive).cloned(),
    ) else {
        return false;
    };

    if !engine.can_consume(room.router_id(), producer_id, &caps).await {
        debug!(
            room_id = %room.id(),
            peer_id = %peer_id,
            producer_id = %producer_id,
            "Peer cannot decode producer, skipping"
        );
        return false;
    }

    // A timed-out call may still complete inside the engine. That consumer has
    // no session entry and lives until the receive transport is closed.
    let handle = match engine.consume(&transport_id, producer_id, &caps, true).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(
                room_id = %room.id(),
                peer_id = %peer_id,
                producer_id = %producer_id,
                error = %e,
                "Failed to create consumer"
            );
            return false;
        }
    };

    let entry = ConsumerEntry::from_handle(handle, owner.clone());
    let consumer_id = entry.id.clone();
    let announcement = entry.announcement();
    let added = state
        .peer_mut(peer_id)
        .is_some_and(|peer| peer.add_consumer(entry));
    if !added {
        if let Err(e) = engine.close_consumer(&consumer_id).await {
            warn!(consumer_id = %consumer_id, error = %e, "Failed to close surplus consumer");
        }
        return false;
    }

    if let Some(peer) = state.peer(peer_id) {
        peer.send(announcement);
    }
    debug!(
        room_id = %room.id(),
        peer_id = %peer_id,
        producer_id = %producer_id,
        consumer_id = %consumer_id,
        "Consumer created"
    );
    true
}

/// Close every consumer, in any peer, bound to one of `producers` and tell
/// the consuming peers. Returns the number of consumers closed.
pub(crate) async fn retract_producers(
    engine: &EngineClient,
    state: &mut RoomState,
    producers: &[ProducerId],
) -> usize {
    if producers.is_empty() {
        return 0;
    }
    let mut closed = 0;
    for peer in state.peers.values_mut() {
        for producer_id in producers {
            let Some(consumer) = peer.remove_consumer_for(producer_id) else {
                continue;
            };
            if let Err(e) = engine.close_consumer(&consumer.id).await {
                warn!(consumer_id = %consumer.id, error = %e, "Failed to close consumer");
            }
            peer.send(ServerMessage::ConsumerClosed {
                consumer_id: consumer.id,
                producer_id: consumer.producer_id,
            });
            closed += 1;
        }
    }
    closed
}
