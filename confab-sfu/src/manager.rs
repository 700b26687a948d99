//! SFU manager - top-level orchestration of rooms and peer sessions
//!
//! This module provides:
//! - Room lifecycle (create, join, leave, removal when empty)
//! - Peer operations (capabilities, transports, produce, consume)
//! - Routing of media engine events back to sessions
//! - Background sweeper for rooms left empty
//! - Global statistics

use crate::config::SfuConfig;
use crate::connection::ConnectionHandle;
use crate::engine::{EngineClient, EngineError, EngineEvent, MediaEngine, TransportState};
use crate::error::{Entity, Result, SfuError};
use crate::fanout;
use crate::peer::{PeerSession, Teardown};
use crate::registry::{SessionRegistry, SessionRoute, TransportRoute};
use crate::room::{Room, RoomSnapshot, RoomState};
use crate::rtp::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters, TransportParams};
use crate::signaling::ServerMessage;
use crate::types::{ConnectionId, ConsumerId, Direction, PeerId, ProducerId, RoomId, TransportId, WorkerId};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Attempts at joining a room that keeps closing underneath the joiner
const JOIN_ATTEMPTS: usize = 3;

/// Engine work for one room, applied in order by that room's queue task
#[derive(Debug)]
enum RoomEvent {
    Transport {
        transport_id: TransportId,
        state: TransportState,
    },
    /// Query the engine for the transport's state and apply it
    Resync { transport_id: TransportId },
    WorkerDied { worker_id: WorkerId },
}

type RoomQueues = HashMap<RoomId, mpsc::UnboundedSender<RoomEvent>>;

/// Global SFU statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SfuStats {
    pub rooms: usize,
    pub peers: usize,
    pub producers: usize,
    pub consumers: usize,
    pub paused_consumers: usize,
}

/// Outcome of entering a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    pub room_id: RoomId,
    pub peer_id: PeerId,
    /// Peers already in the room, in join order
    pub existing_peer_ids: Vec<PeerId>,
}

/// The SFU signaling core
pub struct Sfu {
    config: Arc<SfuConfig>,
    engine: EngineClient,
    registry: SessionRegistry,
    shutdown: CancellationToken,
}

impl Sfu {
    /// Create the core and start its background tasks. Must be called from
    /// within a tokio runtime.
    pub fn new(config: SfuConfig, engine: Arc<dyn MediaEngine>) -> Arc<Self> {
        let engine = EngineClient::new(engine, config.engine_call_timeout());
        let events = engine.subscribe();
        let cleanup_interval = config.cleanup_interval();

        let sfu = Arc::new(Self {
            config: Arc::new(config),
            engine,
            registry: SessionRegistry::new(),
            shutdown: CancellationToken::new(),
        });

        info!(
            max_rooms = sfu.config.max_rooms,
            max_peers_per_room = sfu.config.max_peers_per_room,
            create_room_on_join = sfu.config.create_room_on_join,
            "SFU initialized"
        );

        tokio::spawn(Self::event_task(
            Arc::downgrade(&sfu),
            events,
            sfu.shutdown.clone(),
        ));
        tokio::spawn(Self::cleanup_task(
            Arc::downgrade(&sfu),
            cleanup_interval,
            sfu.shutdown.clone(),
        ));

        sfu
    }

    #[must_use]
    pub fn config(&self) -> &SfuConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Stop the background tasks
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ------------------------------------------------------------------
    // Room lifecycle
    // ------------------------------------------------------------------

    /// Create a room with the caller as its first peer
    pub async fn create_room(&self, connection: &ConnectionHandle, requested: Option<RoomId>) -> Result<Joined> {
        self.leave(connection.id()).await;

        let room_id = match requested {
            Some(id) if self.registry.contains_room(&id) => {
                return Err(SfuError::DuplicateRoom(id.to_string()));
            }
            Some(id) => id,
            None => self.registry.allocate_room_id(),
        };

        match self.open_room(room_id.clone(), connection).await? {
            Some(joined) => Ok(joined),
            None => Err(SfuError::DuplicateRoom(room_id.to_string())),
        }
    }

    /// Join an existing room, or create it when `create_room_on_join` is set
    pub async fn join_room(&self, connection: &ConnectionHandle, room_id: RoomId) -> Result<Joined> {
        self.leave(connection.id()).await;

        for _ in 0..JOIN_ATTEMPTS {
            let room = match self.registry.get_room(&room_id) {
                Ok(room) => room,
                Err(e) if !self.config.create_room_on_join => return Err(e),
                Err(_) => match self.open_room(room_id.clone(), connection).await? {
                    Some(joined) => return Ok(joined),
                    // Someone else created it first; join theirs
                    None => continue,
                },
            };

            let mut state = room.lock().await;
            if state.closed {
                continue;
            }
            return self.admit(&room, &mut state, connection);
        }

        Err(SfuError::not_found(Entity::Room, &room_id))
    }

    /// Create a room and admit the caller. Returns `None` if the id was
    /// claimed concurrently.
    async fn open_room(&self, room_id: RoomId, connection: &ConnectionHandle) -> Result<Option<Joined>> {
        if self.config.max_rooms > 0 && self.registry.room_count() >= self.config.max_rooms {
            warn!(
                current_rooms = self.registry.room_count(),
                max_rooms = self.config.max_rooms,
                "Room limit reached"
            );
            return Err(SfuError::TooManyRooms);
        }

        let router = self.engine.create_router(self.config.media_codecs.clone()).await?;
        let room = Arc::new(Room::new(room_id, router));

        // Publish the room with its lock held so nobody observes it empty
        let mut state = room.lock().await;
        if self.registry.insert_room(Arc::clone(&room)).is_err() {
            drop(state);
            if let Err(e) = self.engine.close_router(room.router_id()).await {
                warn!(room_id = %room.id(), error = %e, "Failed to close surplus router");
            }
            return Ok(None);
        }

        info!(
            room_id = %room.id(),
            worker_id = room.worker_id(),
            total_rooms = self.registry.room_count(),
            "Created new room"
        );

        match self.admit(&room, &mut state, connection) {
            Ok(joined) => Ok(Some(joined)),
            Err(e) => {
                self.release_if_empty(&room, &mut state).await;
                Err(e)
            }
        }
    }

    /// Add a new peer session for `connection`. Runs with the room lock held.
    fn admit(&self, room: &Room, state: &mut RoomState, connection: &ConnectionHandle) -> Result<Joined> {
        if state.closed {
            return Err(SfuError::not_found(Entity::Room, room.id()));
        }
        let max_peers = self.config.max_peers_per_room;
        if max_peers > 0 && state.peers.len() >= max_peers {
            warn!(
                room_id = %room.id(),
                current_peers = state.peers.len(),
                max_peers,
                "Peer limit reached for room"
            );
            return Err(SfuError::RoomFull(room.id().to_string()));
        }

        let peer_id = PeerId::generate();
        let existing_peer_ids = state.other_peer_ids(&peer_id);
        let seq = state.next_seq();
        state.peers.insert(
            peer_id.clone(),
            PeerSession::new(peer_id.clone(), room.id().clone(), seq, connection.clone()),
        );
        room.sync_peer_count(state);
        self.registry
            .bind_connection(connection.id().clone(), room.id().clone(), peer_id.clone());

        // A fresh peer has no receive transport yet; its fan-out pass runs
        // when that transport connects.
        state.broadcast(
            &peer_id,
            &ServerMessage::PeerJoined {
                peer_id: peer_id.clone(),
            },
        );

        info!(
            room_id = %room.id(),
            peer_id = %peer_id,
            peer_count = state.peers.len(),
            "Added peer to room"
        );

        Ok(Joined {
            room_id: room.id().clone(),
            peer_id,
            existing_peer_ids,
        })
    }

    /// Remove the session bound to a connection, if any
    pub async fn leave(&self, connection: &ConnectionId) -> bool {
        let Ok(route) = self.registry.resolve_peer(connection) else {
            return false;
        };
        match self.registry.get_room(&route.room_id) {
            Ok(room) => self.remove_peer(&room, &route.peer_id).await,
            Err(_) => {
                self.registry.unbind_peer(connection, &route.peer_id);
                false
            }
        }
    }

    /// Tear down a peer: close everything it owns, retract its producers from
    /// everyone else, and release the room if it was the last one
    pub async fn remove_peer(&self, room: &Room, peer_id: &PeerId) -> bool {
        let mut state = room.lock().await;
        let Some(mut peer) = state.peers.remove(peer_id) else {
            debug!(room_id = %room.id(), peer_id = %peer_id, "Peer not found when removing");
            return false;
        };
        room.sync_peer_count(&state);
        self.registry.unbind_peer(peer.connection().id(), peer_id);

        let teardown = peer.teardown();
        self.close_owned(&teardown).await;
        let retracted = fanout::retract_producers(&self.engine, &mut state, &teardown.producers).await;
        state.broadcast(
            peer_id,
            &ServerMessage::PeerLeft {
                peer_id: peer_id.clone(),
            },
        );

        info!(
            room_id = %room.id(),
            peer_id = %peer_id,
            producers = teardown.producers.len(),
            retracted_consumers = retracted,
            remaining_peers = state.peers.len(),
            "Removed peer from room"
        );

        self.release_if_empty(room, &mut state).await;
        true
    }

    /// Close engine objects a torn-down peer owned
    async fn close_owned(&self, teardown: &Teardown) {
        for consumer_id in &teardown.consumers {
            if let Err(e) = self.engine.close_consumer(consumer_id).await {
                warn!(consumer_id = %consumer_id, error = %e, "Failed to close consumer");
            }
        }
        for producer_id in &teardown.producers {
            if let Err(e) = self.engine.close_producer(producer_id).await {
                warn!(producer_id = %producer_id, error = %e, "Failed to close producer");
            }
        }
        for transport_id in &teardown.transports {
            self.registry.unregister_transport(transport_id);
            if let Err(e) = self.engine.close_transport(transport_id).await {
                warn!(transport_id = %transport_id, error = %e, "Failed to close transport");
            }
        }
    }

    /// Close the router and unregister the room if nobody is left in it
    async fn release_if_empty(&self, room: &Room, state: &mut RoomState) -> bool {
        if !state.is_empty() || state.closed {
            return false;
        }
        state.closed = true;
        if let Err(e) = self.engine.close_router(room.router_id()).await {
            warn!(room_id = %room.id(), error = %e, "Failed to close router");
        }
        self.registry.remove_room(room.id());
        info!(
            room_id = %room.id(),
            remaining_rooms = self.registry.room_count(),
            "Removed empty room"
        );
        true
    }

    // ------------------------------------------------------------------
    // Peer operations
    // ------------------------------------------------------------------

    fn session(&self, connection: &ConnectionId) -> Result<(Arc<Room>, SessionRoute)> {
        let route = self.registry.resolve_peer(connection)?;
        let room = self.registry.get_room(&route.room_id)?;
        Ok((room, route))
    }

    /// Room capabilities. The first call also records them as the peer's own
    /// receive capabilities, which unlocks transport creation.
    pub async fn rtp_capabilities(&self, connection: &ConnectionId) -> Result<RtpCapabilities> {
        let (room, route) = self.session(connection)?;
        let mut state = room.lock().await;
        let peer = peer_mut(&mut state, &route.peer_id)?;
        if peer.set_rtp_capabilities(room.rtp_capabilities().clone()) {
            debug!(peer_id = %route.peer_id, "Peer adopted room RTP capabilities");
        }
        Ok(room.rtp_capabilities().clone())
    }

    /// Create a send or receive transport, replacing any existing one
    pub async fn create_transport(&self, connection: &ConnectionId, direction: Direction) -> Result<TransportParams> {
        let (room, route) = self.session(connection)?;
        let mut state = room.lock().await;
        if peer_mut(&mut state, &route.peer_id)?.rtp_capabilities().is_none() {
            return Err(SfuError::CapabilitiesUnknown);
        }

        let params = self.engine.create_webrtc_transport(room.router_id()).await?;
        let replaced = peer_mut(&mut state, &route.peer_id)?.set_transport(direction, params.id.clone());
        self.registry.register_transport(
            params.id.clone(),
            TransportRoute {
                room_id: room.id().clone(),
                peer_id: route.peer_id.clone(),
                direction,
            },
        );

        if let Some(old) = replaced {
            self.retire_transport(&mut state, &route.peer_id, direction, &old)
                .await;
        }

        info!(
            room_id = %room.id(),
            peer_id = %route.peer_id,
            transport_id = %params.id,
            %direction,
            "Transport created"
        );
        Ok(params)
    }

    /// Close a replaced transport along with everything bound to it
    async fn retire_transport(&self, state: &mut RoomState, peer_id: &PeerId, direction: Direction, old: &TransportId) {
        self.registry.unregister_transport(old);

        match direction {
            Direction::Send => {
                let producers = state
                    .peer_mut(peer_id)
                    .map(|peer| {
                        let ids = peer.producer_ids();
                        for id in &ids {
                            peer.remove_producer(id);
                        }
                        ids
                    })
                    .unwrap_or_default();
                for producer_id in &producers {
                    if let Err(e) = self.engine.close_producer(producer_id).await {
                        warn!(producer_id = %producer_id, error = %e, "Failed to close producer");
                    }
                }
                fanout::retract_producers(&self.engine, state, &producers).await;
            }
            Direction::Receive => {
                let consumers = state
                    .peer_mut(peer_id)
                    .map(PeerSession::clear_consumers)
                    .unwrap_or_default();
                for consumer_id in &consumers {
                    if let Err(e) = self.engine.close_consumer(consumer_id).await {
                        warn!(consumer_id = %consumer_id, error = %e, "Failed to close consumer");
                    }
                }
            }
        }

        if let Err(e) = self.engine.close_transport(old).await {
            warn!(transport_id = %old, error = %e, "Failed to close replaced transport");
        }
        debug!(peer_id = %peer_id, transport_id = %old, %direction, "Replaced transport retired");
    }

    /// Forward the client's DTLS parameters. Readiness follows later as an
    /// engine event.
    pub async fn connect_transport(
        &self,
        connection: &ConnectionId,
        direction: Direction,
        transport_id: &TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let (room, route) = self.session(connection)?;
        let state = room.lock().await;
        let peer = peer_ref(&state, &route.peer_id)?;
        if peer.transport_id(direction) != Some(transport_id) {
            return Err(SfuError::not_found(Entity::Transport, transport_id));
        }
        self.engine.connect_transport(transport_id, dtls_parameters).await?;
        debug!(peer_id = %route.peer_id, transport_id = %transport_id, %direction, "Transport connect forwarded");
        Ok(())
    }

    /// Start a producer on the peer's send transport and fan it out
    pub async fn produce(
        &self,
        connection: &ConnectionId,
        transport_id: Option<&TransportId>,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
    ) -> Result<ProducerId> {
        let (room, route) = self.session(connection)?;
        if !room.rtp_capabilities().supports(kind, &rtp_parameters) {
            return Err(SfuError::CapabilityMismatch(format!(
                "room cannot route the offered {kind} codecs"
            )));
        }

        self.wait_ready(&room, &route.peer_id, Direction::Send, transport_id)
            .await?;

        let mut state = room.lock().await;
        let peer = peer_ref(&state, &route.peer_id)?;
        let send_transport = match peer.transport_id(Direction::Send) {
            Some(id) if peer.is_ready(Direction::Send) => id.clone(),
            _ => return Err(SfuError::TransportNotReady(Direction::Send)),
        };

        let handle = self
            .engine
            .produce(&send_transport, kind, rtp_parameters, app_data)
            .await?;
        let producer_id = handle.id.clone();
        peer_mut(&mut state, &route.peer_id)?.add_producer(handle.into());

        info!(
            room_id = %room.id(),
            peer_id = %route.peer_id,
            producer_id = %producer_id,
            %kind,
            "Producer started"
        );

        fanout::distribute_producer(&self.engine, &room, &mut state, &route.peer_id, &producer_id).await;
        Ok(producer_id)
    }

    /// Legacy catch-up request: record capabilities if none are known yet,
    /// wait for the receive transport and run the fan-out pass. New consumers
    /// are announced with `newConsumer`; returns how many were created.
    pub async fn consume(&self, connection: &ConnectionId, rtp_capabilities: RtpCapabilities) -> Result<usize> {
        let (room, route) = self.session(connection)?;
        {
            let mut state = room.lock().await;
            if !peer_mut(&mut state, &route.peer_id)?.set_rtp_capabilities(rtp_capabilities) {
                debug!(peer_id = %route.peer_id, "Receive capabilities already known, keeping the first set");
            }
        }

        self.wait_ready(&room, &route.peer_id, Direction::Receive, None)
            .await?;

        let mut state = room.lock().await;
        peer_ref(&state, &route.peer_id)?;
        Ok(fanout::consume_existing(&self.engine, &room, &mut state, &route.peer_id).await)
    }

    /// Client finished wiring a consumer: ask for a key frame, then resume.
    /// Resuming an already running consumer is a no-op.
    pub async fn consumer_ready(&self, connection: &ConnectionId, consumer_id: &ConsumerId) -> Result<()> {
        let (room, route) = self.session(connection)?;
        let mut state = room.lock().await;
        let paused = peer_ref(&state, &route.peer_id)?
            .consumer(consumer_id)
            .map(|consumer| consumer.paused)
            .ok_or_else(|| SfuError::not_found(Entity::Consumer, consumer_id))?;
        if !paused {
            return Ok(());
        }

        self.engine.request_key_frame(consumer_id).await?;
        self.engine.resume_consumer(consumer_id).await?;
        if let Some(consumer) = peer_mut(&mut state, &route.peer_id)?.consumer_mut(consumer_id) {
            consumer.paused = false;
        }
        debug!(peer_id = %route.peer_id, consumer_id = %consumer_id, "Consumer resumed");
        Ok(())
    }

    /// Stop one of the caller's producers and close every consumer of it
    pub async fn close_producer(&self, connection: &ConnectionId, producer_id: &ProducerId) -> Result<()> {
        let (room, route) = self.session(connection)?;
        let mut state = room.lock().await;
        peer_mut(&mut state, &route.peer_id)?
            .remove_producer(producer_id)
            .ok_or_else(|| SfuError::not_found(Entity::Producer, producer_id))?;

        if let Err(e) = self.engine.close_producer(producer_id).await {
            warn!(producer_id = %producer_id, error = %e, "Failed to close producer");
        }
        let retracted =
            fanout::retract_producers(&self.engine, &mut state, std::slice::from_ref(producer_id)).await;
        info!(
            room_id = %room.id(),
            peer_id = %route.peer_id,
            producer_id = %producer_id,
            retracted_consumers = retracted,
            "Producer closed"
        );
        Ok(())
    }

    /// Wait, without holding the room lock, until the peer's transport of
    /// `direction` is connected. `expected` pins the transport the caller
    /// referred to.
    async fn wait_ready(
        &self,
        room: &Room,
        peer_id: &PeerId,
        direction: Direction,
        expected: Option<&TransportId>,
    ) -> Result<()> {
        let mut waiter = {
            let state = room.lock().await;
            let peer = peer_ref(&state, peer_id)?;
            let current = peer
                .transport_id(direction)
                .ok_or(SfuError::TransportNotReady(direction))?;
            if let Some(expected) = expected {
                if expected != current {
                    return Err(SfuError::not_found(Entity::Transport, expected));
                }
            }
            peer.ready_waiter(direction)
                .ok_or(SfuError::TransportNotReady(direction))?
        };

        let timeout = self.config.transport_ready_timeout();
        let outcome = tokio::time::timeout(timeout, async {
            waiter.wait_for(|ready| *ready).await.map(|_| ())
        })
        .await;
        match outcome {
            Ok(Ok(())) => Ok(()),
            // The transport was replaced or the peer left
            Ok(Err(_)) => Err(SfuError::TransportNotReady(direction)),
            Err(_) => {
                warn!(peer_id = %peer_id, %direction, ?timeout, "Timed out waiting for transport");
                Err(SfuError::TransportNotReady(direction))
            }
        }
    }

    // ------------------------------------------------------------------
    // Engine events
    // ------------------------------------------------------------------

    /// Apply one engine event in the caller's task. Events for transports
    /// nobody owns any more are ignored. The background pump goes through
    /// per-room queues instead.
    pub async fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::TransportStateChanged {
                transport_id,
                state,
            } => self.on_transport_state(&transport_id, state).await,
            EngineEvent::WorkerDied { worker_id } => self.on_worker_died(worker_id).await,
        }
    }

    async fn on_transport_state(&self, transport_id: &TransportId, transport_state: TransportState) {
        let Some(route) = self.registry.route_transport(transport_id) else {
            debug!(transport_id = %transport_id, state = ?transport_state, "Event for unknown transport ignored");
            return;
        };
        let Ok(room) = self.registry.get_room(&route.room_id) else {
            return;
        };
        let mut state = room.lock().await;
        if state.closed {
            return;
        }
        let Some(peer) = state.peer_mut(&route.peer_id) else {
            return;
        };

        match transport_state {
            TransportState::Connected => {
                if !peer.mark_connected(route.direction, transport_id) {
                    return;
                }
                info!(
                    room_id = %room.id(),
                    peer_id = %route.peer_id,
                    transport_id = %transport_id,
                    direction = %route.direction,
                    "Transport connected"
                );
                if route.direction == Direction::Receive {
                    fanout::consume_existing(&self.engine, &room, &mut state, &route.peer_id).await;
                }
            }
            TransportState::Failed | TransportState::Closed => {
                if peer.mark_failed(route.direction, transport_id) {
                    warn!(
                        peer_id = %route.peer_id,
                        transport_id = %transport_id,
                        state = ?transport_state,
                        "Transport lost connectivity"
                    );
                }
            }
            TransportState::New | TransportState::Connecting => {}
        }
    }

    /// Every room on a dead worker is unusable. Rooms on other workers carry on.
    async fn on_worker_died(&self, worker_id: WorkerId) {
        let rooms = self.registry.rooms_on_worker(worker_id);
        error!(worker_id, rooms = rooms.len(), "Media worker died, closing its rooms");
        for room in rooms {
            self.fail_room(&room, worker_id).await;
        }
    }

    /// Tell every peer of a room on a dead worker, disconnect them and drop
    /// the room
    async fn fail_room(&self, room: &Room, worker_id: WorkerId) {
        let failure = SfuError::from(EngineError::WorkerClosed(worker_id));
        let mut state = room.lock().await;
        if state.closed {
            return;
        }
        for (peer_id, mut peer) in state.peers.drain() {
            peer.send(ServerMessage::error(&failure));
            peer.connection().close(failure.reason());
            self.registry.unbind_peer(peer.connection().id(), &peer_id);
            for transport_id in peer.teardown().transports {
                self.registry.unregister_transport(&transport_id);
            }
        }
        room.sync_peer_count(&state);
        state.closed = true;
        self.registry.remove_room(room.id());
        warn!(room_id = %room.id(), worker_id, "Closed room after engine failure");
    }

    /// Apply one queued event inside the room's own task
    async fn apply_room_event(&self, room_id: &RoomId, event: RoomEvent) {
        match event {
            RoomEvent::Transport {
                transport_id,
                state,
            } => self.on_transport_state(&transport_id, state).await,
            RoomEvent::Resync { transport_id } => match self.engine.transport_state(&transport_id).await {
                Ok(state) => self.on_transport_state(&transport_id, state).await,
                Err(e) => {
                    debug!(transport_id = %transport_id, error = %e, "Transport state unavailable during resync");
                }
            },
            RoomEvent::WorkerDied { worker_id } => {
                if let Ok(room) = self.registry.get_room(room_id) {
                    self.fail_room(&room, worker_id).await;
                }
            }
        }
    }

    /// Route an engine event to the queue of the room it concerns
    fn dispatch_event(self: &Arc<Self>, queues: &mut RoomQueues, event: EngineEvent) {
        self.prune_queues(queues);
        match event {
            EngineEvent::TransportStateChanged {
                transport_id,
                state,
            } => {
                let Some(route) = self.registry.route_transport(&transport_id) else {
                    debug!(transport_id = %transport_id, ?state, "Event for unknown transport ignored");
                    return;
                };
                self.enqueue(queues, route.room_id, RoomEvent::Transport { transport_id, state });
            }
            EngineEvent::WorkerDied { worker_id } => {
                let rooms = self.registry.rooms_on_worker(worker_id);
                error!(worker_id, rooms = rooms.len(), "Media worker died, closing its rooms");
                for room in rooms {
                    self.enqueue(queues, room.id().clone(), RoomEvent::WorkerDied { worker_id });
                }
            }
        }
    }

    /// Events were lost: ask the engine for the state of every known
    /// transport so no peer stays stuck waiting for a `Connected` it missed
    fn resync_transports(self: &Arc<Self>, queues: &mut RoomQueues) {
        self.prune_queues(queues);
        let routes = self.registry.transport_routes();
        info!(transports = routes.len(), "Resynchronising transport state");
        for (transport_id, route) in routes {
            self.enqueue(queues, route.room_id, RoomEvent::Resync { transport_id });
        }
    }

    /// Drop queues of rooms that are gone; their tasks finish what is queued
    /// and exit
    fn prune_queues(&self, queues: &mut RoomQueues) {
        queues.retain(|room_id, queue| !queue.is_closed() && self.registry.contains_room(room_id));
    }

    fn enqueue(self: &Arc<Self>, queues: &mut RoomQueues, room_id: RoomId, event: RoomEvent) {
        let queue = queues
            .entry(room_id.clone())
            .or_insert_with(|| self.spawn_room_queue(room_id.clone()));
        if queue.send(event).is_err() {
            debug!(room_id = %room_id, "Room event queue closed, event dropped");
        }
    }

    /// Start the task applying one room's engine events in arrival order
    fn spawn_room_queue(self: &Arc<Self>, room_id: RoomId) -> mpsc::UnboundedSender<RoomEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sfu = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = rx.recv() => event,
                };
                let Some(event) = event else { break };
                let Some(sfu) = sfu.upgrade() else { break };
                sfu.apply_room_event(&room_id, event).await;
            }
            debug!(room_id = %room_id, "Room event queue stopped");
        });
        tx
    }

    // ------------------------------------------------------------------
    // Housekeeping and statistics
    // ------------------------------------------------------------------

    /// Remove rooms left without peers. Returns how many were removed.
    pub async fn cleanup_empty_rooms(&self) -> usize {
        let mut removed_count = 0;
        for room in self.registry.rooms() {
            if !room.is_empty() {
                continue;
            }
            let mut state = room.lock().await;
            if self.release_if_empty(&room, &mut state).await {
                removed_count += 1;
            }
        }
        if removed_count > 0 {
            info!(
                removed_count,
                remaining_rooms = self.registry.room_count(),
                "Cleaned up empty rooms"
            );
        }
        removed_count
    }

    pub async fn room_snapshot(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
        let room = self.registry.get_room(room_id).ok()?;
        Some(room.snapshot().await)
    }

    /// Aggregate counters across every room
    pub async fn stats(&self) -> SfuStats {
        let rooms = self.registry.rooms();
        let mut stats = SfuStats {
            rooms: rooms.len(),
            ..Default::default()
        };
        for room in rooms {
            let state = room.lock().await;
            for peer in state.peers.values() {
                stats.peers += 1;
                stats.producers += peer.producers().count();
                for consumer in peer.consumers() {
                    stats.consumers += 1;
                    if consumer.paused {
                        stats.paused_consumers += 1;
                    }
                }
            }
        }
        stats
    }

    /// Background task pumping engine events into per-room queues. It never
    /// waits on a room lock, so a busy room only delays its own events.
    async fn event_task(
        sfu: Weak<Self>,
        mut events: broadcast::Receiver<EngineEvent>,
        shutdown: CancellationToken,
    ) {
        debug!("Starting engine event task");
        let mut queues = RoomQueues::new();
        loop {
            let received = tokio::select! {
                () = shutdown.cancelled() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(event) => {
                    let Some(sfu) = sfu.upgrade() else { break };
                    sfu.dispatch_event(&mut queues, event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Engine event stream lagged");
                    let Some(sfu) = sfu.upgrade() else { break };
                    sfu.resync_transports(&mut queues);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Engine event stream closed");
                    break;
                }
            }
        }
    }

    /// Background task for periodic cleanup
    async fn cleanup_task(sfu: Weak<Self>, period: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(period);
        // The first tick completes immediately
        ticker.tick().await;
        info!(?period, "Starting cleanup task");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(sfu) = sfu.upgrade() else { break };
            sfu.cleanup_empty_rooms().await;
        }
    }
}

impl Drop for Sfu {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn peer_ref<'a>(state: &'a RoomState, peer_id: &PeerId) -> Result<&'a PeerSession> {
    state
        .peer(peer_id)
        .ok_or_else(|| SfuError::not_found(Entity::Peer, peer_id))
}

fn peer_mut<'a>(state: &'a mut RoomState, peer_id: &PeerId) -> Result<&'a mut PeerSession> {
    state
        .peer_mut(peer_id)
        .ok_or_else(|| SfuError::not_found(Entity::Peer, peer_id))
}
