//! Media engine adapter
//!
//! The SFU never touches RTP itself. Routers, transports, producers and
//! consumers live inside an external media engine; this module defines the
//! narrow async interface the signaling core drives it through, plus the
//! events the engine reports back (transport state changes, worker death).

mod loopback;

pub use loopback::{EngineCounts, LoopbackEngine};

use crate::error::SfuError;
use crate::rtp::{DtlsParameters, MediaKind, RtpCapabilities, RtpCodecCapability, RtpParameters, TransportParams};
use crate::types::{ConsumerId, ProducerId, RouterId, TransportId, WorkerId};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors reported by a media engine implementation
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("worker {0} is closed")]
    WorkerClosed(WorkerId),

    #[error("no live worker available")]
    NoWorker,

    #[error("unknown {kind} {id}")]
    Unknown { kind: &'static str, id: String },

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    pub fn unknown(kind: &'static str, id: impl ToString) -> Self {
        Self::Unknown {
            kind,
            id: id.to_string(),
        }
    }
}

/// A router: the per-room capability context
#[derive(Debug, Clone)]
pub struct RouterHandle {
    pub id: RouterId,
    pub worker_id: WorkerId,
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone)]
pub struct ProducerHandle {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
}

/// Connection state of a transport as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// Asynchronous notifications from the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TransportStateChanged {
        transport_id: TransportId,
        state: TransportState,
    },
    /// A worker process died; every router on it is gone
    WorkerDied { worker_id: WorkerId },
}

/// Interface to the external media engine.
///
/// Closing an object that is already gone is not an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_router(&self, media_codecs: Vec<RtpCodecCapability>) -> Result<RouterHandle, EngineError>;

    async fn close_router(&self, router_id: &RouterId) -> Result<(), EngineError>;

    async fn create_webrtc_transport(&self, router_id: &RouterId) -> Result<TransportParams, EngineError>;

    /// Hand the remote DTLS parameters to a transport. Completion of the
    /// handshake is reported later through [`EngineEvent::TransportStateChanged`].
    async fn connect_transport(&self, transport_id: &TransportId, dtls_parameters: DtlsParameters) -> Result<(), EngineError>;

    /// Current state of a transport, for resynchronising after missed events
    async fn transport_state(&self, transport_id: &TransportId) -> Result<TransportState, EngineError>;

    async fn close_transport(&self, transport_id: &TransportId) -> Result<(), EngineError>;

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
    ) -> Result<ProducerHandle, EngineError>;

    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), EngineError>;

    /// Whether a receiver with these capabilities can decode the producer
    async fn can_consume(&self, router_id: &RouterId, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool;

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<ConsumerHandle, EngineError>;

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), EngineError>;

    /// Ask the consumer's source to emit a key frame
    async fn request_key_frame(&self, consumer_id: &ConsumerId) -> Result<(), EngineError>;

    async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), EngineError>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

/// Engine handle used by the core: every call is bounded by a timeout and
/// errors are lifted into [`SfuError`].
#[derive(Clone)]
pub(crate) struct EngineClient {
    inner: Arc<dyn MediaEngine>,
    timeout: Duration,
}

impl EngineClient {
    pub(crate) fn new(inner: Arc<dyn MediaEngine>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T, EngineError>>) -> Result<T, SfuError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(SfuError::from),
            Err(_) => Err(EngineError::Timeout(self.timeout).into()),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.subscribe()
    }

    pub(crate) async fn create_router(&self, codecs: Vec<RtpCodecCapability>) -> Result<RouterHandle, SfuError> {
        self.bounded(self.inner.create_router(codecs)).await
    }

    pub(crate) async fn close_router(&self, router_id: &RouterId) -> Result<(), SfuError> {
        self.bounded(self.inner.close_router(router_id)).await
    }

    pub(crate) async fn create_webrtc_transport(&self, router_id: &RouterId) -> Result<TransportParams, SfuError> {
        self.bounded(self.inner.create_webrtc_transport(router_id)).await
    }

    pub(crate) async fn connect_transport(&self, transport_id: &TransportId, dtls: DtlsParameters) -> Result<(), SfuError> {
        self.bounded(self.inner.connect_transport(transport_id, dtls)).await
    }

    pub(crate) async fn transport_state(&self, transport_id: &TransportId) -> Result<TransportState, SfuError> {
        self.bounded(self.inner.transport_state(transport_id)).await
    }

    pub(crate) async fn close_transport(&self, transport_id: &TransportId) -> Result<(), SfuError> {
        self.bounded(self.inner.close_transport(transport_id)).await
    }

    pub(crate) async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
    ) -> Result<ProducerHandle, SfuError> {
        self.bounded(self.inner.produce(transport_id, kind, rtp_parameters, app_data))
            .await
    }

    pub(crate) async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), SfuError> {
        self.bounded(self.inner.close_producer(producer_id)).await
    }

    /// A timed-out capability check counts as "cannot consume"
    pub(crate) async fn can_consume(&self, router_id: &RouterId, producer_id: &ProducerId, caps: &RtpCapabilities) -> bool {
        tokio::time::timeout(self.timeout, self.inner.can_consume(router_id, producer_id, caps))
            .await
            .unwrap_or(false)
    }

    pub(crate) async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        caps: &RtpCapabilities,
        paused: bool,
    ) -> Result<ConsumerHandle, SfuError> {
        self.bounded(self.inner.consume(transport_id, producer_id, caps, paused))
            .await
    }

    pub(crate) async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), SfuError> {
        self.bounded(self.inner.resume_consumer(consumer_id)).await
    }

    pub(crate) async fn request_key_frame(&self, consumer_id: &ConsumerId) -> Result<(), SfuError> {
        self.bounded(self.inner.request_key_frame(consumer_id)).await
    }

    pub(crate) async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), SfuError> {
        self.bounded(self.inner.close_consumer(consumer_id)).await
    }
}
