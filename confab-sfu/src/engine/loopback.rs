//! In-process media engine
//!
//! Keeps router/transport/producer/consumer bookkeeping in memory and answers
//! every call immediately. Transports report `Connected` as soon as remote
//! DTLS parameters arrive. Routers are spread round-robin over a fixed set of
//! simulated workers, any of which can be killed to exercise engine-failure
//! handling.

use super::{
    ConsumerHandle, EngineError, EngineEvent, MediaEngine, ProducerHandle, RouterHandle,
    TransportState,
};
use crate::rtp::{
    DtlsFingerprint, DtlsParameters, IceCandidate, IceParameters, MediaKind, RtpCapabilities,
    RtpCodecCapability, RtpParameters, TransportParams,
};
use crate::types::{ConsumerId, ProducerId, RouterId, TransportId, WorkerId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const FIRST_DYNAMIC_PAYLOAD_TYPE: u8 = 96;
const LAST_DYNAMIC_PAYLOAD_TYPE: u8 = 127;
const FIRST_RTC_PORT: u16 = 40_000;

struct RouterRecord {
    worker_id: WorkerId,
    capabilities: RtpCapabilities,
}

struct TransportRecord {
    router_id: RouterId,
    state: TransportState,
}

struct ProducerRecord {
    router_id: RouterId,
    transport_id: TransportId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

struct ConsumerRecord {
    transport_id: TransportId,
    producer_id: ProducerId,
    paused: bool,
    key_frame_requests: u32,
}

#[derive(Default)]
struct EngineState {
    dead_workers: HashSet<WorkerId>,
    routers: HashMap<RouterId, RouterRecord>,
    transports: HashMap<TransportId, TransportRecord>,
    producers: HashMap<ProducerId, ProducerRecord>,
    consumers: HashMap<ConsumerId, ConsumerRecord>,
}

impl EngineState {
    fn live_router(&self, router_id: &RouterId) -> Result<&RouterRecord, EngineError> {
        let router = self
            .routers
            .get(router_id)
            .ok_or_else(|| EngineError::unknown("router", router_id))?;
        if self.dead_workers.contains(&router.worker_id) {
            return Err(EngineError::WorkerClosed(router.worker_id));
        }
        Ok(router)
    }

    fn transport_router(&self, transport_id: &TransportId) -> Result<&RouterRecord, EngineError> {
        let transport = self
            .transports
            .get(transport_id)
            .ok_or_else(|| EngineError::unknown("transport", transport_id))?;
        self.live_router(&transport.router_id)
    }

    fn drop_consumers_where(&mut self, pred: impl Fn(&ConsumerRecord) -> bool) {
        self.consumers.retain(|_, consumer| !pred(consumer));
    }

    fn drop_producer(&mut self, producer_id: &ProducerId) {
        if self.producers.remove(producer_id).is_some() {
            self.drop_consumers_where(|c| &c.producer_id == producer_id);
        }
    }

    fn drop_transport(&mut self, transport_id: &TransportId) {
        if self.transports.remove(transport_id).is_none() {
            return;
        }
        let producers: Vec<ProducerId> = self
            .producers
            .iter()
            .filter(|(_, p)| &p.transport_id == transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        for producer_id in &producers {
            self.drop_producer(producer_id);
        }
        self.drop_consumers_where(|c| &c.transport_id == transport_id);
    }

    fn drop_router(&mut self, router_id: &RouterId) {
        if self.routers.remove(router_id).is_none() {
            return;
        }
        let transports: Vec<TransportId> = self
            .transports
            .iter()
            .filter(|(_, t)| &t.router_id == router_id)
            .map(|(id, _)| id.clone())
            .collect();
        for transport_id in &transports {
            self.drop_transport(transport_id);
        }
    }
}

/// Live object counts, for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounts {
    pub routers: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

pub struct LoopbackEngine {
    worker_count: usize,
    next_worker: AtomicUsize,
    next_port: AtomicU16,
    next_mid: AtomicU32,
    announced_ip: String,
    state: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
    events_muted: AtomicBool,
}

impl LoopbackEngine {
    #[must_use]
    pub fn new(worker_count: usize, announced_ip: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let worker_count = worker_count.max(1);
        info!(worker_count, "Loopback media engine initialized");
        Self {
            worker_count,
            next_worker: AtomicUsize::new(0),
            next_port: AtomicU16::new(FIRST_RTC_PORT),
            next_mid: AtomicU32::new(0),
            announced_ip: announced_ip.into(),
            state: Mutex::new(EngineState::default()),
            events,
            events_muted: AtomicBool::new(false),
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events_muted.load(Ordering::Acquire) {
            debug!(?event, "Engine event dropped");
            return;
        }
        // No subscribers simply means nobody is listening yet
        let _ = self.events.send(event);
    }

    fn pick_worker(&self, dead: &HashSet<WorkerId>) -> Option<WorkerId> {
        (0..self.worker_count)
            .map(|_| self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_count)
            .find(|worker| !dead.contains(worker))
    }

    fn random_hex() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn fingerprint() -> String {
        let hex = format!("{}{}", Self::random_hex(), Self::random_hex()).to_uppercase();
        hex.as_bytes()
            .chunks(2)
            .filter_map(|pair| std::str::from_utf8(pair).ok())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Kill a worker: its routers and everything on them disappear and a
    /// [`EngineEvent::WorkerDied`] is emitted.
    pub fn kill_worker(&self, worker_id: WorkerId) {
        {
            let mut state = self.state.lock();
            if !state.dead_workers.insert(worker_id) {
                return;
            }
            let routers: Vec<RouterId> = state
                .routers
                .iter()
                .filter(|(_, r)| r.worker_id == worker_id)
                .map(|(id, _)| id.clone())
                .collect();
            for router_id in &routers {
                state.drop_router(router_id);
            }
        }
        error!(worker_id, "Media worker died");
        self.emit(EngineEvent::WorkerDied { worker_id });
    }

    /// Report a transport as failed (e.g. ICE timeout)
    pub fn fail_transport(&self, transport_id: &TransportId) {
        let changed = {
            let mut state = self.state.lock();
            match state.transports.get_mut(transport_id) {
                Some(transport) => {
                    transport.state = TransportState::Failed;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.emit(EngineEvent::TransportStateChanged {
                transport_id: transport_id.clone(),
                state: TransportState::Failed,
            });
        }
    }

    /// Drop every event emitted while muted, as a subscriber that fell
    /// behind would
    pub fn mute_events(&self, muted: bool) {
        self.events_muted.store(muted, Ordering::Release);
    }

    /// Emit `count` state changes for a transport nobody owns
    pub fn emit_noise(&self, count: usize) {
        let transport_id = TransportId::from("noise");
        for _ in 0..count {
            self.emit(EngineEvent::TransportStateChanged {
                transport_id: transport_id.clone(),
                state: TransportState::Connecting,
            });
        }
    }

    #[must_use]
    pub fn counts(&self) -> EngineCounts {
        let state = self.state.lock();
        EngineCounts {
            routers: state.routers.len(),
            transports: state.transports.len(),
            producers: state.producers.len(),
            consumers: state.consumers.len(),
        }
    }

    #[must_use]
    pub fn consumer_paused(&self, consumer_id: &ConsumerId) -> Option<bool> {
        self.state.lock().consumers.get(consumer_id).map(|c| c.paused)
    }

    #[must_use]
    pub fn key_frame_requests(&self, consumer_id: &ConsumerId) -> u32 {
        self.state
            .lock()
            .consumers
            .get(consumer_id)
            .map_or(0, |c| c.key_frame_requests)
    }

    #[must_use]
    pub fn router_worker(&self, router_id: &RouterId) -> Option<WorkerId> {
        self.state.lock().routers.get(router_id).map(|r| r.worker_id)
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new(1, "127.0.0.1")
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create_router(&self, media_codecs: Vec<RtpCodecCapability>) -> Result<RouterHandle, EngineError> {
        let mut state = self.state.lock();
        let worker_id = self
            .pick_worker(&state.dead_workers)
            .ok_or(EngineError::NoWorker)?;

        let mut used: HashSet<u8> = media_codecs
            .iter()
            .filter_map(|c| c.preferred_payload_type)
            .collect();
        let mut next_dynamic = FIRST_DYNAMIC_PAYLOAD_TYPE;
        let mut codecs = Vec::with_capacity(media_codecs.len());
        for mut codec in media_codecs {
            if codec.preferred_payload_type.is_none() {
                while used.contains(&next_dynamic) {
                    next_dynamic = next_dynamic
                        .checked_add(1)
                        .filter(|pt| *pt <= LAST_DYNAMIC_PAYLOAD_TYPE)
                        .ok_or_else(|| {
                            EngineError::InvalidState("dynamic payload types exhausted".to_string())
                        })?;
                }
                used.insert(next_dynamic);
                codec.preferred_payload_type = Some(next_dynamic);
            }
            codecs.push(codec);
        }

        let id = RouterId::new(uuid::Uuid::new_v4().to_string());
        let capabilities = RtpCapabilities {
            codecs,
            header_extensions: Vec::new(),
        };
        state.routers.insert(
            id.clone(),
            RouterRecord {
                worker_id,
                capabilities: capabilities.clone(),
            },
        );
        debug!(router_id = %id, worker_id, "Router created");

        Ok(RouterHandle {
            id,
            worker_id,
            rtp_capabilities: capabilities,
        })
    }

    async fn close_router(&self, router_id: &RouterId) -> Result<(), EngineError> {
        self.state.lock().drop_router(router_id);
        debug!(router_id = %router_id, "Router closed");
        Ok(())
    }

    async fn create_webrtc_transport(&self, router_id: &RouterId) -> Result<TransportParams, EngineError> {
        let mut state = self.state.lock();
        state.live_router(router_id)?;

        let id = TransportId::new(uuid::Uuid::new_v4().to_string());
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        state.transports.insert(
            id.clone(),
            TransportRecord {
                router_id: router_id.clone(),
                state: TransportState::New,
            },
        );

        let candidate = |protocol: &str, priority: u32| IceCandidate {
            foundation: format!("{protocol}candidate"),
            priority,
            ip: self.announced_ip.clone(),
            protocol: protocol.to_string(),
            port,
            candidate_type: "host".to_string(),
            tcp_type: (protocol == "tcp").then(|| "passive".to_string()),
        };

        Ok(TransportParams {
            id,
            ice_parameters: IceParameters {
                username_fragment: nanoid::nanoid!(16),
                password: nanoid::nanoid!(32),
                ice_lite: true,
            },
            ice_candidates: vec![candidate("udp", 1_076_302_079), candidate("tcp", 1_076_276_479)],
            dtls_parameters: DtlsParameters {
                role: Some("auto".to_string()),
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: Self::fingerprint(),
                }],
            },
            sctp_parameters: Some(json!({ "port": 5000, "OS": 1024, "MIS": 1024, "maxMessageSize": 262_144 })),
        })
    }

    async fn connect_transport(&self, transport_id: &TransportId, dtls_parameters: DtlsParameters) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock();
            state.transport_router(transport_id)?;
            if dtls_parameters.fingerprints.is_empty() {
                return Err(EngineError::InvalidState(
                    "remote DTLS parameters carry no fingerprint".to_string(),
                ));
            }
            let transport = state
                .transports
                .get_mut(transport_id)
                .ok_or_else(|| EngineError::unknown("transport", transport_id))?;
            if transport.state != TransportState::New {
                return Err(EngineError::InvalidState(format!(
                    "transport {transport_id} already connected"
                )));
            }
            transport.state = TransportState::Connected;
        }
        self.emit(EngineEvent::TransportStateChanged {
            transport_id: transport_id.clone(),
            state: TransportState::Connected,
        });
        Ok(())
    }

    async fn transport_state(&self, transport_id: &TransportId) -> Result<TransportState, EngineError> {
        self.state
            .lock()
            .transports
            .get(transport_id)
            .map(|transport| transport.state)
            .ok_or_else(|| EngineError::unknown("transport", transport_id))
    }

    async fn close_transport(&self, transport_id: &TransportId) -> Result<(), EngineError> {
        self.state.lock().drop_transport(transport_id);
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        _app_data: Value,
    ) -> Result<ProducerHandle, EngineError> {
        let mut state = self.state.lock();
        let router = state.transport_router(transport_id)?;
        if !router.capabilities.supports(kind, &rtp_parameters) {
            let mime = rtp_parameters
                .media_codecs()
                .next()
                .map_or_else(|| "<none>".to_string(), |c| c.mime_type.clone());
            return Err(EngineError::UnsupportedCodec(mime));
        }
        let router_id = state
            .transports
            .get(transport_id)
            .map(|t| t.router_id.clone())
            .ok_or_else(|| EngineError::unknown("transport", transport_id))?;

        let id = ProducerId::new(uuid::Uuid::new_v4().to_string());
        state.producers.insert(
            id.clone(),
            ProducerRecord {
                router_id,
                transport_id: transport_id.clone(),
                kind,
                rtp_parameters: rtp_parameters.clone(),
            },
        );
        Ok(ProducerHandle {
            id,
            kind,
            rtp_parameters,
        })
    }

    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), EngineError> {
        self.state.lock().drop_producer(producer_id);
        Ok(())
    }

    async fn can_consume(&self, router_id: &RouterId, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool {
        let state = self.state.lock();
        if state.live_router(router_id).is_err() {
            return false;
        }
        state.producers.get(producer_id).is_some_and(|producer| {
            &producer.router_id == router_id
                && producer
                    .rtp_parameters
                    .media_codecs()
                    .next()
                    .is_some_and(|codec| rtp_capabilities.find(producer.kind, codec).is_some())
        })
    }

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<ConsumerHandle, EngineError> {
        let mut state = self.state.lock();
        state.transport_router(transport_id)?;
        let producer = state
            .producers
            .get(producer_id)
            .ok_or_else(|| EngineError::unknown("producer", producer_id))?;
        let source = producer
            .rtp_parameters
            .media_codecs()
            .next()
            .ok_or_else(|| EngineError::InvalidState(format!("producer {producer_id} has no media codec")))?;
        let matched = rtp_capabilities
            .find(producer.kind, source)
            .ok_or_else(|| EngineError::UnsupportedCodec(source.mime_type.clone()))?;

        let payload_type = matched
            .preferred_payload_type
            .unwrap_or(source.payload_type);
        let mid = self.next_mid.fetch_add(1, Ordering::Relaxed);
        let rtp_parameters = RtpParameters {
            mid: Some(mid.to_string()),
            codecs: vec![matched.as_parameters(payload_type)],
            header_extensions: Vec::new(),
            encodings: vec![json!({ "ssrc": rand_ssrc() })],
            rtcp: Some(json!({ "cname": nanoid::nanoid!(8), "reducedSize": true })),
        };
        let kind = producer.kind;

        let id = ConsumerId::new(uuid::Uuid::new_v4().to_string());
        state.consumers.insert(
            id.clone(),
            ConsumerRecord {
                transport_id: transport_id.clone(),
                producer_id: producer_id.clone(),
                paused,
                key_frame_requests: 0,
            },
        );
        Ok(ConsumerHandle {
            id,
            producer_id: producer_id.clone(),
            kind,
            rtp_parameters,
            paused,
        })
    }

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let consumer = state
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| EngineError::unknown("consumer", consumer_id))?;
        consumer.paused = false;
        Ok(())
    }

    async fn request_key_frame(&self, consumer_id: &ConsumerId) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let consumer = state
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| EngineError::unknown("consumer", consumer_id))?;
        consumer.key_frame_requests += 1;
        Ok(())
    }

    async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), EngineError> {
        self.state.lock().consumers.remove(consumer_id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

fn rand_ssrc() -> u32 {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::RtpCodecParameters;

    fn vp8_parameters() -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "video/VP8".into(),
                payload_type: 96,
                clock_rate: 90_000,
                channels: None,
                parameters: serde_json::Map::new(),
                rtcp_feedback: vec![],
            }],
            ..RtpParameters::default()
        }
    }

    fn dtls() -> DtlsParameters {
        DtlsParameters {
            role: Some("client".into()),
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: "AA:BB".into(),
            }],
        }
    }

    #[tokio::test]
    async fn test_connect_emits_connected_once() {
        let engine = LoopbackEngine::default();
        let mut events = engine.subscribe();
        let router = engine
            .create_router(vec![RtpCodecCapability::vp8()])
            .await
            .unwrap();
        let transport = engine.create_webrtc_transport(&router.id).await.unwrap();

        engine.connect_transport(&transport.id, dtls()).await.unwrap();
        match events.recv().await.unwrap() {
            EngineEvent::TransportStateChanged { transport_id, state } => {
                assert_eq!(transport_id, transport.id);
                assert_eq!(state, TransportState::Connected);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(engine.connect_transport(&transport.id, dtls()).await.is_err());
    }

    #[tokio::test]
    async fn test_consumer_lifecycle_and_cascading_close() {
        let engine = LoopbackEngine::default();
        let router = engine
            .create_router(vec![RtpCodecCapability::opus(), RtpCodecCapability::vp8()])
            .await
            .unwrap();
        let send = engine.create_webrtc_transport(&router.id).await.unwrap();
        let recv = engine.create_webrtc_transport(&router.id).await.unwrap();
        let producer = engine
            .produce(&send.id, MediaKind::Video, vp8_parameters(), Value::Null)
            .await
            .unwrap();

        let caps = router.rtp_capabilities.clone();
        assert!(engine.can_consume(&router.id, &producer.id, &caps).await);
        let audio_only = RtpCapabilities {
            codecs: vec![RtpCodecCapability::opus()],
            header_extensions: vec![],
        };
        assert!(!engine.can_consume(&router.id, &producer.id, &audio_only).await);

        let consumer = engine.consume(&recv.id, &producer.id, &caps, true).await.unwrap();
        assert!(consumer.paused);
        assert_eq!(consumer.rtp_parameters.codecs[0].payload_type, 101);
        assert_eq!(engine.consumer_paused(&consumer.id), Some(true));

        engine.request_key_frame(&consumer.id).await.unwrap();
        engine.resume_consumer(&consumer.id).await.unwrap();
        assert_eq!(engine.consumer_paused(&consumer.id), Some(false));
        assert_eq!(engine.key_frame_requests(&consumer.id), 1);

        engine.close_transport(&send.id).await.unwrap();
        let counts = engine.counts();
        assert_eq!(counts.producers, 0);
        assert_eq!(counts.consumers, 0);
        assert_eq!(counts.transports, 1);

        engine.close_router(&router.id).await.unwrap();
        assert_eq!(engine.counts(), EngineCounts::default());
    }

    #[tokio::test]
    async fn test_produce_rejects_codec_outside_router() {
        let engine = LoopbackEngine::default();
        let router = engine
            .create_router(vec![RtpCodecCapability::opus()])
            .await
            .unwrap();
        let send = engine.create_webrtc_transport(&router.id).await.unwrap();
        let err = engine
            .produce(&send.id, MediaKind::Video, vp8_parameters(), Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedCodec(_)));
    }

    #[tokio::test]
    async fn test_closing_receive_transport_reaps_its_consumers() {
        let engine = LoopbackEngine::default();
        let router = engine.create_router(vec![RtpCodecCapability::vp8()]).await.unwrap();
        let send = engine.create_webrtc_transport(&router.id).await.unwrap();
        let recv = engine.create_webrtc_transport(&router.id).await.unwrap();
        let producer = engine
            .produce(&send.id, MediaKind::Video, vp8_parameters(), Value::Null)
            .await
            .unwrap();
        let caps = router.rtp_capabilities.clone();

        // A consumer whose handle never reached the caller
        engine.consume(&recv.id, &producer.id, &caps, true).await.unwrap();
        assert_eq!(engine.counts().consumers, 1);

        engine.close_transport(&recv.id).await.unwrap();
        let counts = engine.counts();
        assert_eq!(counts.consumers, 0);
        assert_eq!(counts.producers, 1);
    }

    #[tokio::test]
    async fn test_dynamic_payload_types_run_out() {
        let engine = LoopbackEngine::default();
        let unnumbered = |clock_rate| RtpCodecCapability {
            clock_rate,
            preferred_payload_type: None,
            ..RtpCodecCapability::vp8()
        };

        let fits: Vec<_> = (0..32).map(|i| unnumbered(90_000 + i)).collect();
        let router = engine.create_router(fits).await.unwrap();
        assert_eq!(
            router.rtp_capabilities.codecs.last().unwrap().preferred_payload_type,
            Some(127)
        );

        let too_many: Vec<_> = (0..40).map(|i| unnumbered(90_000 + i)).collect();
        let err = engine.create_router(too_many).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_transport_state_query() {
        let engine = LoopbackEngine::default();
        let router = engine.create_router(vec![RtpCodecCapability::vp8()]).await.unwrap();
        let transport = engine.create_webrtc_transport(&router.id).await.unwrap();
        assert_eq!(engine.transport_state(&transport.id).await.unwrap(), TransportState::New);

        engine.mute_events(true);
        let mut events = engine.subscribe();
        engine.connect_transport(&transport.id, dtls()).await.unwrap();
        assert!(events.try_recv().is_err());
        assert_eq!(
            engine.transport_state(&transport.id).await.unwrap(),
            TransportState::Connected
        );

        engine.close_transport(&transport.id).await.unwrap();
        assert!(engine.transport_state(&transport.id).await.is_err());
    }

    #[tokio::test]
    async fn test_kill_worker_only_affects_its_routers() {
        let engine = LoopbackEngine::new(2, "127.0.0.1");
        let mut events = engine.subscribe();
        let a = engine.create_router(vec![RtpCodecCapability::vp8()]).await.unwrap();
        let b = engine.create_router(vec![RtpCodecCapability::vp8()]).await.unwrap();
        assert_ne!(a.worker_id, b.worker_id);

        engine.kill_worker(a.worker_id);
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::WorkerDied { worker_id } if worker_id == a.worker_id
        ));
        assert!(engine.create_webrtc_transport(&a.id).await.is_err());
        assert!(engine.create_webrtc_transport(&b.id).await.is_ok());

        // New routers land on the surviving worker
        let c = engine.create_router(vec![RtpCodecCapability::vp8()]).await.unwrap();
        assert_eq!(c.worker_id, b.worker_id);
    }
}
