// Shared helpers for the signaling integration tests
//
// A `TestClient` plays the browser: it owns a connection, feeds JSON through
// the message router and reads replies/pushes off the outbound queue.

#![allow(dead_code)]

use confab_sfu::{
    Connection, ConnectionHandle, LoopbackEngine, MessageRouter, Outbound, RoomId, Sfu, SfuConfig,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub engine: Arc<LoopbackEngine>,
    pub router: MessageRouter,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(SfuConfig::default(), 1)
    }

    pub fn with(config: SfuConfig, workers: usize) -> Self {
        let engine = Arc::new(LoopbackEngine::new(workers, "127.0.0.1"));
        let sfu = Sfu::new(config, engine.clone());
        Self {
            engine,
            router: MessageRouter::new(sfu),
        }
    }

    pub fn sfu(&self) -> &Arc<Sfu> {
        self.router.sfu()
    }

    pub fn client(&self) -> TestClient {
        let (conn, rx) = Connection::new(256);
        TestClient {
            conn,
            rx,
            router: self.router.clone(),
            pending: VecDeque::new(),
            closed: None,
        }
    }

    /// Poll until `check` holds for the room's consumer graph
    pub async fn eventually<F>(&self, what: &str, mut check: F)
    where
        F: FnMut(&confab_sfu::SfuStats) -> bool,
    {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let stats = self.sfu().stats().await;
            if check(&stats) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {what}; last stats {stats:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub struct TestClient {
    conn: Connection,
    rx: mpsc::Receiver<Outbound>,
    router: MessageRouter,
    pending: VecDeque<Value>,
    pub closed: Option<String>,
}

pub fn dtls() -> Value {
    json!({
        "role": "client",
        "fingerprints": [{ "algorithm": "sha-256", "value": "AB:CD:EF" }]
    })
}

pub fn opus_parameters() -> Value {
    json!({
        "mid": "0",
        "codecs": [{
            "mimeType": "audio/opus",
            "payloadType": 111,
            "clockRate": 48000,
            "channels": 2
        }],
        "encodings": [{ "ssrc": 11111111 }]
    })
}

pub fn vp8_parameters() -> Value {
    json!({
        "mid": "1",
        "codecs": [
            { "mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000 },
            { "mimeType": "video/rtx", "payloadType": 97, "clockRate": 90000,
              "parameters": { "apt": 96 } }
        ],
        "encodings": [{ "ssrc": 22222222 }]
    })
}

impl TestClient {
    pub fn handle(&self) -> ConnectionHandle {
        self.conn.handle()
    }

    pub async fn send(&self, message: Value) {
        self.router
            .handle_text(&self.conn.handle(), &message.to_string())
            .await;
    }

    async fn next(&mut self) -> Option<Value> {
        loop {
            let item = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
                .await
                .ok()??;
            match item {
                Outbound::Message(message) => return Some(serde_json::to_value(message).unwrap()),
                Outbound::Close { reason } => self.closed = Some(reason),
            }
        }
    }

    /// Next message of the given type; others are kept for later
    pub async fn expect(&mut self, kind: &str) -> Value {
        if let Some(pos) = self.pending.iter().position(|m| m["type"] == kind) {
            return self.pending.remove(pos).unwrap()["payload"].clone();
        }
        loop {
            let message = self
                .next()
                .await
                .unwrap_or_else(|| panic!("no {kind} message; pending {:?}", self.pending));
            if message["type"] == kind {
                return message["payload"].clone();
            }
            self.pending.push_back(message);
        }
    }

    /// Drain everything currently queued without waiting
    pub fn drain(&mut self) -> Vec<Value> {
        while let Ok(item) = self.rx.try_recv() {
            match item {
                Outbound::Message(message) => self
                    .pending
                    .push_back(serde_json::to_value(message).unwrap()),
                Outbound::Close { reason } => self.closed = Some(reason),
            }
        }
        self.pending.drain(..).collect()
    }

    pub fn count_pending(&mut self, kind: &str) -> usize {
        let all = self.drain();
        let count = all.iter().filter(|m| m["type"] == kind).count();
        self.pending.extend(all);
        count
    }

    pub async fn request(&mut self, message: Value, reply: &str) -> Value {
        self.send(message).await;
        self.expect(reply).await
    }

    pub async fn create_room(&mut self) -> (RoomId, String) {
        let payload = self.request(json!({ "type": "create-room" }), "room-created").await;
        (
            RoomId::from(payload["roomId"].as_str().unwrap()),
            payload["peerId"].as_str().unwrap().to_string(),
        )
    }

    pub async fn join_room(&mut self, room_id: &RoomId) -> Value {
        self.request(
            json!({ "type": "join-room", "payload": { "joinRoomId": room_id.as_str() } }),
            "joined-room",
        )
        .await
    }

    pub async fn capabilities(&mut self) -> Value {
        self.request(json!({ "type": "getRtpCapabilities" }), "rtpCapabilities")
            .await["rtpCapabilities"]
            .clone()
    }

    /// createTransport + transport-connect; returns the transport id
    pub async fn open_send_transport(&mut self) -> String {
        let params = self
            .request(json!({ "type": "createTransport" }), "transportCreated")
            .await;
        let id = params["id"].as_str().unwrap().to_string();
        self.request(
            json!({ "type": "transport-connect",
                    "payload": { "transportId": id, "dtlsParameters": dtls() } }),
            "transport-connected",
        )
        .await;
        id
    }

    /// create-consumerTransport + consumer-connect; returns the transport id
    pub async fn open_recv_transport(&mut self) -> String {
        let params = self
            .request(
                json!({ "type": "create-consumerTransport" }),
                "consumerTransportCreated",
            )
            .await;
        let id = params["id"].as_str().unwrap().to_string();
        self.request(
            json!({ "type": "consumer-connect",
                    "payload": { "transportId": id, "dtlsParameters": dtls() } }),
            "consumer-connected",
        )
        .await;
        id
    }

    /// transport-produce; returns the producer id
    pub async fn produce(&mut self, kind: &str, rtp_parameters: Value) -> String {
        let payload = self
            .request(
                json!({ "type": "transport-produce",
                        "payload": { "kind": kind, "rtpParameters": rtp_parameters } }),
                "produce-data",
            )
            .await;
        payload["id"].as_str().unwrap().to_string()
    }

    /// Join (or create) and bring both transports up
    pub async fn enter(&mut self, room: Option<&RoomId>) -> (RoomId, String) {
        let (room_id, peer_id) = match room {
            Some(room_id) => {
                let joined = self.join_room(room_id).await;
                (room_id.clone(), joined["peerId"].as_str().unwrap().to_string())
            }
            None => self.create_room().await,
        };
        self.capabilities().await;
        self.open_send_transport().await;
        self.open_recv_transport().await;
        (room_id, peer_id)
    }

    pub async fn disconnect(self) {
        self.router.disconnect(&self.conn.handle()).await;
    }
}
