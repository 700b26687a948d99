// Error replies and engine failure handling

mod common;

use common::{opus_parameters, vp8_parameters, Harness};
use confab_sfu::rtp::{MediaKind, RtpParameters};
use confab_sfu::{EngineEvent, PeerId, RoomId, Sfu, SfuConfig, TransportId, TransportState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Poll a peer's snapshot until `check` holds. Only locks `room_id`.
async fn wait_for_peer<F>(sfu: &Arc<Sfu>, room_id: &RoomId, peer_id: &PeerId, what: &str, check: F)
where
    F: Fn(&confab_sfu::PeerSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = sfu.room_snapshot(room_id).await.expect("room exists");
        if snapshot.peer(peer_id).is_some_and(&check) {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn short_timeouts() -> SfuConfig {
    SfuConfig {
        transport_ready_timeout_ms: 100,
        ..SfuConfig::default()
    }
}

#[tokio::test]
async fn test_worker_death_only_closes_its_rooms() {
    let harness = Harness::with(SfuConfig::default(), 2);
    let mut a = harness.client();
    let mut b = harness.client();
    let mut c = harness.client();

    let (doomed, _) = a.enter(None).await;
    let (healthy, _) = b.enter(None).await;
    c.enter(Some(&healthy)).await;

    let doomed_worker = harness.sfu().room_snapshot(&doomed).await.unwrap().worker_id;
    let healthy_worker = harness.sfu().room_snapshot(&healthy).await.unwrap().worker_id;
    assert_ne!(doomed_worker, healthy_worker);

    harness.engine.kill_worker(doomed_worker);

    assert_eq!(a.expect("error").await["reason"], "ENGINE_FAILURE");
    a.drain();
    assert_eq!(a.closed.as_deref(), Some("ENGINE_FAILURE"));
    harness
        .eventually("doomed room removal", |stats| stats.rooms == 1)
        .await;
    assert!(!harness.sfu().registry().contains_room(&doomed));

    // The other room keeps working
    let producer = b.produce("audio", opus_parameters()).await;
    assert_eq!(c.expect("newConsumer").await["producerId"], producer.as_str());
    assert_eq!(b.count_pending("error"), 0);

    // A's connection no longer has a session
    a.send(json!({ "type": "getRtpCapabilities" })).await;
    assert_eq!(a.expect("error").await["reason"], "NO_SESSION");
}

#[tokio::test(start_paused = true)]
async fn test_produce_times_out_without_connected_transport() {
    let config = SfuConfig {
        transport_ready_timeout_ms: 1_500,
        ..SfuConfig::default()
    };
    let harness = Harness::with(config, 1);
    let mut a = harness.client();
    a.create_room().await;
    a.capabilities().await;

    // No send transport at all
    a.send(json!({ "type": "transport-produce",
                   "payload": { "kind": "audio", "rtpParameters": opus_parameters() } }))
        .await;
    assert_eq!(a.expect("error").await["reason"], "TRANSPORT_NOT_READY");

    // Created but never connected
    a.request(json!({ "type": "createTransport" }), "transportCreated")
        .await;
    a.send(json!({ "type": "transport-produce",
                   "payload": { "kind": "audio", "rtpParameters": opus_parameters() } }))
        .await;
    assert_eq!(a.expect("error").await["reason"], "TRANSPORT_NOT_READY");
    assert_eq!(harness.engine.counts().producers, 0);
}

#[tokio::test]
async fn test_failed_transport_is_not_ready() {
    let harness = Harness::with(short_timeouts(), 1);
    let mut a = harness.client();
    let (room_id, peer_id) = a.create_room().await;
    a.capabilities().await;
    let transport = TransportId::from(a.open_send_transport().await);
    a.produce("audio", opus_parameters()).await;

    harness.engine.fail_transport(&transport);
    let peer_id = PeerId::from(peer_id);
    wait_for_peer(harness.sfu(), &room_id, &peer_id, "failed transport", |peer| !peer.send_ready).await;

    a.send(json!({ "type": "transport-produce",
                   "payload": { "kind": "audio", "rtpParameters": opus_parameters() } }))
        .await;
    assert_eq!(a.expect("error").await["reason"], "TRANSPORT_NOT_READY");
}

#[tokio::test]
async fn test_producer_codec_outside_room_capabilities() {
    let harness = Harness::new();
    let mut a = harness.client();
    a.enter(None).await;

    let h264 = json!({
        "codecs": [{ "mimeType": "video/H264", "payloadType": 102, "clockRate": 90000 }],
        "encodings": [{ "ssrc": 1 }]
    });
    a.send(json!({ "type": "transport-produce",
                   "payload": { "kind": "video", "rtpParameters": h264 } }))
        .await;
    assert_eq!(a.expect("error").await["reason"], "CAPABILITY_MISMATCH");
}

#[tokio::test]
async fn test_transport_before_capabilities() {
    let harness = Harness::new();
    let mut a = harness.client();
    a.create_room().await;
    a.send(json!({ "type": "create-consumerTransport" })).await;
    assert_eq!(a.expect("error").await["reason"], "CAPABILITIES_UNKNOWN");
}

#[tokio::test]
async fn test_connect_unknown_transport() {
    let harness = Harness::new();
    let mut a = harness.client();
    a.create_room().await;
    a.capabilities().await;
    a.send(json!({ "type": "transport-connect",
                   "payload": { "transportId": "bogus", "dtlsParameters": common::dtls() } }))
        .await;
    assert_eq!(a.expect("error").await["reason"], "TRANSPORT_NOT_FOUND");
}

#[tokio::test]
async fn test_protocol_errors_keep_connection_usable() {
    let harness = Harness::new();
    let mut a = harness.client();

    a.send(json!({ "type": "teleport" })).await;
    assert_eq!(a.expect("error").await["reason"], "INVALID_MESSAGE");
    a.send(json!({ "type": "createTransport" })).await;
    assert_eq!(a.expect("error").await["reason"], "NO_SESSION");

    let (room_id, _) = a.create_room().await;
    assert!(harness.sfu().registry().contains_room(&room_id));
}

#[tokio::test]
async fn test_duplicate_room_id() {
    let harness = Harness::new();
    let mut a = harness.client();
    let mut b = harness.client();

    let created = a
        .request(
            json!({ "type": "create-room", "payload": { "roomId": "standup" } }),
            "room-created",
        )
        .await;
    assert_eq!(created["roomId"], "standup");

    b.send(json!({ "type": "create-room", "payload": { "roomId": "standup" } }))
        .await;
    assert_eq!(b.expect("error").await["reason"], "DUPLICATE_ROOM");
    assert_eq!(harness.engine.counts().routers, 1);
}

#[tokio::test]
async fn test_events_for_unknown_transports_are_ignored() {
    let harness = Harness::new();
    let mut a = harness.client();
    let (room_id, _) = a.enter(None).await;

    harness
        .sfu()
        .handle_engine_event(EngineEvent::TransportStateChanged {
            transport_id: TransportId::from("gone"),
            state: TransportState::Connected,
        })
        .await;

    assert_eq!(a.count_pending("error"), 0);
    assert!(harness
        .sfu()
        .room_snapshot(&room_id)
        .await
        .is_some_and(|room| room.peers.len() == 1));
    assert!(harness.sfu().room_snapshot(&RoomId::from("nope")).await.is_none());
}

#[tokio::test]
async fn test_join_creates_room_when_configured() {
    let config = SfuConfig {
        create_room_on_join: true,
        ..SfuConfig::default()
    };
    let harness = Harness::with(config, 1);
    let mut a = harness.client();
    let mut b = harness.client();

    let room_id = RoomId::from("ad-hoc");
    let first = a.join_room(&room_id).await;
    assert_eq!(first["existingPeerIds"], json!([]));
    let second = b.join_room(&room_id).await;
    assert_eq!(second["existingPeerIds"], json!([first["peerId"]]));
    assert_eq!(harness.engine.counts().routers, 1);
}

#[tokio::test]
async fn test_busy_room_does_not_hold_up_other_rooms() {
    let harness = Harness::new();
    let mut a = harness.client();
    let (busy, a_peer) = a.create_room().await;
    a.capabilities().await;
    let a_send = TransportId::from(a.open_send_transport().await);
    let a_peer = PeerId::from(a_peer);
    wait_for_peer(harness.sfu(), &busy, &a_peer, "send transport", |peer| peer.send_ready).await;

    // Park the busy room and queue an event for it
    let room = harness.sfu().registry().get_room(&busy).unwrap();
    let guard = room.lock().await;
    harness.engine.fail_transport(&a_send);

    let mut b = harness.client();
    let (quiet, b_peer) = b.create_room().await;
    b.capabilities().await;
    b.open_recv_transport().await;
    let b_peer = PeerId::from(b_peer);
    wait_for_peer(harness.sfu(), &quiet, &b_peer, "receive transport", |peer| peer.receive_ready).await;

    // The parked event is applied once the room is free again
    drop(guard);
    wait_for_peer(harness.sfu(), &busy, &a_peer, "failed transport", |peer| !peer.send_ready).await;
}

#[tokio::test]
async fn test_lagged_events_resync_transport_state() {
    let harness = Harness::new();
    let mut a = harness.client();
    let mut b = harness.client();
    let (room_id, _) = a.enter(None).await;
    let producer = a.produce("video", vp8_parameters()).await;

    let joined = b.join_room(&room_id).await;
    let b_peer = PeerId::from(joined["peerId"].as_str().unwrap());
    b.capabilities().await;

    // B's Connected event is lost, then the stream overflows
    harness.engine.mute_events(true);
    b.open_recv_transport().await;
    harness.engine.mute_events(false);
    harness.engine.emit_noise(2_000);

    assert_eq!(b.expect("newConsumer").await["producerId"], producer.as_str());
    wait_for_peer(harness.sfu(), &room_id, &b_peer, "receive transport", |peer| {
        peer.receive_ready && peer.consumers.len() == 1
    })
    .await;
    assert_eq!(harness.engine.counts().consumers, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_leave_releases_produce_waiting_for_transport() {
    let config = SfuConfig {
        transport_ready_timeout_ms: 30_000,
        ..SfuConfig::default()
    };
    let harness = Harness::with(config, 1);
    let mut a = harness.client();
    a.create_room().await;
    a.capabilities().await;
    a.request(json!({ "type": "createTransport" }), "transportCreated")
        .await;

    let sfu = Arc::clone(harness.sfu());
    let connection_id = a.handle().id().clone();
    let parameters: RtpParameters = serde_json::from_value(opus_parameters()).unwrap();
    let pending = tokio::spawn(async move {
        sfu.produce(&connection_id, None, MediaKind::Audio, parameters, Value::Null)
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    a.disconnect().await;
    let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("produce still waiting after the peer left")
        .unwrap();
    assert!(outcome.is_err());

    harness
        .eventually("room removal", |stats| stats.rooms == 0 && stats.producers == 0)
        .await;
    assert_eq!(harness.engine.counts().producers, 0);
}
