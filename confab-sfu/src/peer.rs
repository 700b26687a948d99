//! Peer session state
//!
//! A peer session is the single source of truth for one participant: its
//! transports, producers, consumers and declared receive capabilities. The
//! acquisition states are independent flags rather than one linear state:
//!
//! - capabilities known (set once, immutable afterwards)
//! - send transport ready / receive transport ready
//! - zero or more producers (needs send ready)
//! - zero or more consumers (needs receive ready)

use crate::connection::ConnectionHandle;
use crate::engine::{ConsumerHandle, ProducerHandle};
use crate::rtp::{MediaKind, RtpCapabilities, RtpParameters};
use crate::signaling::ServerMessage;
use crate::types::{ConsumerId, Direction, PeerId, ProducerId, RoomId, TransportId};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::watch;

/// Transport bookkeeping for one direction
#[derive(Debug)]
struct TransportSlot {
    id: TransportId,
    ready: watch::Sender<bool>,
}

impl TransportSlot {
    fn new(id: TransportId) -> Self {
        let (ready, _) = watch::channel(false);
        Self { id, ready }
    }

    fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }
}

#[derive(Debug, Clone)]
pub struct ProducerEntry {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

impl From<ProducerHandle> for ProducerEntry {
    fn from(handle: ProducerHandle) -> Self {
        Self {
            id: handle.id,
            kind: handle.kind,
            rtp_parameters: handle.rtp_parameters,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerEntry {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub producer_peer_id: PeerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
}

impl ConsumerEntry {
    pub(crate) fn from_handle(handle: ConsumerHandle, producer_peer_id: PeerId) -> Self {
        Self {
            id: handle.id,
            producer_id: handle.producer_id,
            producer_peer_id,
            kind: handle.kind,
            rtp_parameters: handle.rtp_parameters,
            paused: handle.paused,
        }
    }

    pub(crate) fn announcement(&self) -> ServerMessage {
        ServerMessage::NewConsumer {
            id: self.id.clone(),
            producer_id: self.producer_id.clone(),
            producer_peer_id: self.producer_peer_id.clone(),
            kind: self.kind,
            rtp_parameters: self.rtp_parameters.clone(),
        }
    }
}

/// Everything a peer held when it was torn down
#[derive(Debug, Default)]
pub(crate) struct Teardown {
    pub transports: Vec<TransportId>,
    pub producers: Vec<ProducerId>,
    pub consumers: Vec<ConsumerId>,
}

/// Server-side session of one participant
#[derive(Debug)]
pub struct PeerSession {
    pub id: PeerId,
    pub room_id: RoomId,
    /// Join order within the room
    pub(crate) seq: u64,
    connection: ConnectionHandle,
    rtp_capabilities: Option<RtpCapabilities>,
    send_transport: Option<TransportSlot>,
    recv_transport: Option<TransportSlot>,
    producers: HashMap<ProducerId, ProducerEntry>,
    consumers: HashMap<ConsumerId, ConsumerEntry>,
    consumer_by_producer: HashMap<ProducerId, ConsumerId>,
}

impl PeerSession {
    pub(crate) fn new(id: PeerId, room_id: RoomId, seq: u64, connection: ConnectionHandle) -> Self {
        Self {
            id,
            room_id,
            seq,
            connection,
            rtp_capabilities: None,
            send_transport: None,
            recv_transport: None,
            producers: HashMap::new(),
            consumers: HashMap::new(),
            consumer_by_producer: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Push an event to this peer's connection
    pub fn send(&self, message: ServerMessage) -> bool {
        self.connection.send(message)
    }

    #[must_use]
    pub const fn rtp_capabilities(&self) -> Option<&RtpCapabilities> {
        self.rtp_capabilities.as_ref()
    }

    /// Record the peer's receive capabilities. The first value wins; returns
    /// false if capabilities were already known.
    pub fn set_rtp_capabilities(&mut self, caps: RtpCapabilities) -> bool {
        if self.rtp_capabilities.is_some() {
            return false;
        }
        self.rtp_capabilities = Some(caps);
        true
    }

    fn slot(&self, direction: Direction) -> Option<&TransportSlot> {
        match direction {
            Direction::Send => self.send_transport.as_ref(),
            Direction::Receive => self.recv_transport.as_ref(),
        }
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut Option<TransportSlot> {
        match direction {
            Direction::Send => &mut self.send_transport,
            Direction::Receive => &mut self.recv_transport,
        }
    }

    #[must_use]
    pub fn transport_id(&self, direction: Direction) -> Option<&TransportId> {
        self.slot(direction).map(|slot| &slot.id)
    }

    #[must_use]
    pub fn is_ready(&self, direction: Direction) -> bool {
        self.slot(direction).is_some_and(TransportSlot::is_ready)
    }

    /// Install a new transport, returning the one it replaces
    pub(crate) fn set_transport(&mut self, direction: Direction, id: TransportId) -> Option<TransportId> {
        self.slot_mut(direction)
            .replace(TransportSlot::new(id))
            .map(|old| old.id)
    }

    /// Mark a transport connected. Returns true only on the first transition
    /// of the current transport; stale or repeated events return false.
    pub(crate) fn mark_connected(&mut self, direction: Direction, id: &TransportId) -> bool {
        match self.slot(direction) {
            Some(slot) if &slot.id == id => slot.ready.send_if_modified(|ready| {
                let changed = !*ready;
                *ready = true;
                changed
            }),
            _ => false,
        }
    }

    /// Mark a transport as no longer usable
    pub(crate) fn mark_failed(&mut self, direction: Direction, id: &TransportId) -> bool {
        match self.slot(direction) {
            Some(slot) if &slot.id == id => slot.ready.send_if_modified(|ready| {
                let changed = *ready;
                *ready = false;
                changed
            }),
            _ => false,
        }
    }

    /// One-shot waiter that resolves when the current transport of this
    /// direction reports connected. `None` if no transport exists. Dropping
    /// the session (or replacing the transport) closes the waiter.
    #[must_use]
    pub fn ready_waiter(&self, direction: Direction) -> Option<watch::Receiver<bool>> {
        self.slot(direction).map(|slot| slot.ready.subscribe())
    }

    pub(crate) fn add_producer(&mut self, producer: ProducerEntry) {
        self.producers.insert(producer.id.clone(), producer);
    }

    pub(crate) fn remove_producer(&mut self, id: &ProducerId) -> Option<ProducerEntry> {
        self.producers.remove(id)
    }

    pub fn producers(&self) -> impl Iterator<Item = &ProducerEntry> {
        self.producers.values()
    }

    #[must_use]
    pub fn producer_ids(&self) -> Vec<ProducerId> {
        self.producers.keys().cloned().collect()
    }

    #[must_use]
    pub fn has_consumer_for(&self, producer_id: &ProducerId) -> bool {
        self.consumer_by_producer.contains_key(producer_id)
    }

    /// Add a consumer. Returns false, leaving state untouched, if one already
    /// exists for the same producer.
    pub(crate) fn add_consumer(&mut self, consumer: ConsumerEntry) -> bool {
        if self.consumer_by_producer.contains_key(&consumer.producer_id) {
            return false;
        }
        self.consumer_by_producer
            .insert(consumer.producer_id.clone(), consumer.id.clone());
        self.consumers.insert(consumer.id.clone(), consumer);
        true
    }

    pub fn consumer(&self, id: &ConsumerId) -> Option<&ConsumerEntry> {
        self.consumers.get(id)
    }

    pub(crate) fn consumer_mut(&mut self, id: &ConsumerId) -> Option<&mut ConsumerEntry> {
        self.consumers.get_mut(id)
    }

    pub fn consumers(&self) -> impl Iterator<Item = &ConsumerEntry> {
        self.consumers.values()
    }

    pub(crate) fn remove_consumer(&mut self, id: &ConsumerId) -> Option<ConsumerEntry> {
        let consumer = self.consumers.remove(id)?;
        self.consumer_by_producer.remove(&consumer.producer_id);
        Some(consumer)
    }

    /// Remove the consumer bound to a producer, if any
    pub(crate) fn remove_consumer_for(&mut self, producer_id: &ProducerId) -> Option<ConsumerEntry> {
        let consumer_id = self.consumer_by_producer.get(producer_id)?.clone();
        self.remove_consumer(&consumer_id)
    }

    /// Drop every consumer, returning their ids
    pub(crate) fn clear_consumers(&mut self) -> Vec<ConsumerId> {
        self.consumer_by_producer.clear();
        self.consumers.drain().map(|(id, _)| id).collect()
    }

    /// Strip the session of everything it owns
    pub(crate) fn teardown(&mut self) -> Teardown {
        let transports = [self.send_transport.take(), self.recv_transport.take()]
            .into_iter()
            .flatten()
            .map(|slot| slot.id)
            .collect();
        Teardown {
            transports,
            producers: self.producers.drain().map(|(id, _)| id).collect(),
            consumers: self.clear_consumers(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> PeerSnapshot {
        let mut producers: Vec<ProducerId> = self.producers.keys().cloned().collect();
        producers.sort();
        let mut consumers: Vec<ConsumerSnapshot> = self
            .consumers
            .values()
            .map(|c| ConsumerSnapshot {
                id: c.id.clone(),
                producer_id: c.producer_id.clone(),
                paused: c.paused,
            })
            .collect();
        consumers.sort_by(|a, b| a.producer_id.cmp(&b.producer_id));
        PeerSnapshot {
            id: self.id.clone(),
            capabilities_known: self.rtp_capabilities.is_some(),
            send_ready: self.is_ready(Direction::Send),
            receive_ready: self.is_ready(Direction::Receive),
            producers,
            consumers,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerSnapshot {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub paused: bool,
}

/// Point-in-time view of a peer session
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub capabilities_known: bool,
    pub send_ready: bool,
    pub receive_ready: bool,
    pub producers: Vec<ProducerId>,
    pub consumers: Vec<ConsumerSnapshot>,
}
