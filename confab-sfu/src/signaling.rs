//! Signaling message contract
//!
//! Every message is a JSON object `{ "type": ..., "payload": ... }`. Inbound
//! messages are parsed through a loose envelope first so that payload-less
//! messages may omit `payload` entirely, and so that an unknown type produces
//! a protocol error instead of a dropped socket.

use crate::error::{Result, SfuError};
use crate::rtp::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters, TransportParams};
use crate::types::{ConsumerId, PeerId, ProducerId, RoomId, TransportId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a browser sends to the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    CreateRoom {
        room_id: Option<RoomId>,
    },
    JoinRoom {
        room_id: RoomId,
    },
    GetRtpCapabilities,
    CreateTransport,
    TransportConnect {
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },
    TransportProduce {
        transport_id: Option<TransportId>,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
    },
    CreateConsumerTransport,
    ConsumerConnect {
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },
    Consume {
        rtp_capabilities: RtpCapabilities,
    },
    ConsumerReady {
        consumer_id: Option<ConsumerId>,
    },
    CloseProducer {
        producer_id: ProducerId,
    },
    CloseRoom,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomPayload {
    #[serde(default)]
    room_id: Option<RoomId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRoomPayload {
    join_room_id: RoomId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectPayload {
    transport_id: TransportId,
    #[serde(alias = "securityParams")]
    dtls_parameters: DtlsParameters,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProducePayload {
    #[serde(default)]
    transport_id: Option<TransportId>,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    #[serde(default)]
    app_data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumePayload {
    #[serde(alias = "capabilities")]
    rtp_capabilities: RtpCapabilities,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumerReadyPayload {
    #[serde(default)]
    consumer_id: Option<ConsumerId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseProducerPayload {
    producer_id: ProducerId,
}

fn payload<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| SfuError::InvalidMessage(format!("bad payload for {kind}: {e}")))
}

impl ClientMessage {
    /// Parse a text frame
    pub fn from_json(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| SfuError::InvalidMessage(e.to_string()))?;
        Self::from_envelope(envelope)
    }

    /// Parse an already-decoded JSON value
    pub fn from_value(value: Value) -> Result<Self> {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| SfuError::InvalidMessage(e.to_string()))?;
        Self::from_envelope(envelope)
    }

    fn from_envelope(Envelope { kind, payload: body }: Envelope) -> Result<Self> {
        let kind = kind.as_str();
        let message = match kind {
            "create-room" => {
                let room_id = if body.is_null() {
                    None
                } else {
                    payload::<CreateRoomPayload>(kind, body)?.room_id
                };
                Self::CreateRoom { room_id }
            }
            "join-room" => Self::JoinRoom {
                room_id: payload::<JoinRoomPayload>(kind, body)?.join_room_id,
            },
            "getRtpCapabilities" => Self::GetRtpCapabilities,
            "createTransport" => Self::CreateTransport,
            "transport-connect" => {
                let p: ConnectPayload = payload(kind, body)?;
                Self::TransportConnect {
                    transport_id: p.transport_id,
                    dtls_parameters: p.dtls_parameters,
                }
            }
            "transport-produce" => {
                let p: ProducePayload = payload(kind, body)?;
                Self::TransportProduce {
                    transport_id: p.transport_id,
                    kind: p.kind,
                    rtp_parameters: p.rtp_parameters,
                    app_data: p.app_data,
                }
            }
            "create-consumerTransport" => Self::CreateConsumerTransport,
            "consumer-connect" => {
                let p: ConnectPayload = payload(kind, body)?;
                Self::ConsumerConnect {
                    transport_id: p.transport_id,
                    dtls_parameters: p.dtls_parameters,
                }
            }
            "consume" => Self::Consume {
                rtp_capabilities: payload::<ConsumePayload>(kind, body)?.rtp_capabilities,
            },
            "consumer-ready" => {
                let consumer_id = if body.is_null() {
                    None
                } else {
                    payload::<ConsumerReadyPayload>(kind, body)?.consumer_id
                };
                Self::ConsumerReady { consumer_id }
            }
            "close-producer" => Self::CloseProducer {
                producer_id: payload::<CloseProducerPayload>(kind, body)?.producer_id,
            },
            "close-room" => Self::CloseRoom,
            other => {
                return Err(SfuError::InvalidMessage(format!(
                    "unknown message type: {other}"
                )))
            }
        };
        Ok(message)
    }

    /// Wire name of the message type
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create-room",
            Self::JoinRoom { .. } => "join-room",
            Self::GetRtpCapabilities => "getRtpCapabilities",
            Self::CreateTransport => "createTransport",
            Self::TransportConnect { .. } => "transport-connect",
            Self::TransportProduce { .. } => "transport-produce",
            Self::CreateConsumerTransport => "create-consumerTransport",
            Self::ConsumerConnect { .. } => "consumer-connect",
            Self::Consume { .. } => "consume",
            Self::ConsumerReady { .. } => "consumer-ready",
            Self::CloseProducer { .. } => "close-producer",
            Self::CloseRoom => "close-room",
        }
    }

    /// Whether failures are answered with an `error` message. Fire-and-forget
    /// messages are dropped with a log line instead.
    #[must_use]
    pub const fn expects_reply(&self) -> bool {
        !matches!(
            self,
            Self::ConsumerReady { .. } | Self::CloseProducer { .. } | Self::CloseRoom
        )
    }
}

/// Messages the server sends to a browser
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "room-created", rename_all = "camelCase")]
    RoomCreated { room_id: RoomId, peer_id: PeerId },

    #[serde(rename = "joined-room", rename_all = "camelCase")]
    JoinedRoom {
        join_room_id: RoomId,
        peer_id: PeerId,
        existing_peer_ids: Vec<PeerId>,
    },

    #[serde(rename = "peer-joined", rename_all = "camelCase")]
    PeerJoined { peer_id: PeerId },

    #[serde(rename = "peer-left", rename_all = "camelCase")]
    PeerLeft { peer_id: PeerId },

    #[serde(rename = "rtpCapabilities", rename_all = "camelCase")]
    RtpCapabilities { rtp_capabilities: RtpCapabilities },

    #[serde(rename = "transportCreated")]
    TransportCreated(TransportParams),

    #[serde(rename = "transport-connected", rename_all = "camelCase")]
    TransportConnected { transport_id: TransportId },

    #[serde(rename = "produce-data")]
    ProduceData { id: ProducerId },

    #[serde(rename = "consumerTransportCreated")]
    ConsumerTransportCreated(TransportParams),

    #[serde(rename = "consumer-connected", rename_all = "camelCase")]
    ConsumerConnected { transport_id: TransportId },

    #[serde(rename = "newConsumer", rename_all = "camelCase")]
    NewConsumer {
        id: ConsumerId,
        producer_id: ProducerId,
        producer_peer_id: PeerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },

    #[serde(rename = "consumer-closed", rename_all = "camelCase")]
    ConsumerClosed {
        consumer_id: ConsumerId,
        producer_id: ProducerId,
    },

    #[serde(rename = "error")]
    Error { reason: String, message: String },
}

impl ServerMessage {
    #[must_use]
    pub fn error(err: &SfuError) -> Self {
        Self::Error {
            reason: err.reason().to_string(),
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_less_messages() {
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"getRtpCapabilities"}"#).unwrap(),
            ClientMessage::GetRtpCapabilities
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"create-room","payload":{}}"#).unwrap(),
            ClientMessage::CreateRoom { room_id: None }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"close-room"}"#).unwrap(),
            ClientMessage::CloseRoom
        );
    }

    #[test]
    fn test_join_and_connect_payloads() {
        let join = ClientMessage::from_value(json!({
            "type": "join-room",
            "payload": { "joinRoomId": "abc" }
        }))
        .unwrap();
        assert_eq!(
            join,
            ClientMessage::JoinRoom {
                room_id: RoomId::from("abc")
            }
        );

        let connect = ClientMessage::from_value(json!({
            "type": "consumer-connect",
            "payload": {
                "transportId": "t1",
                "securityParams": { "role": "client", "fingerprints": [
                    { "algorithm": "sha-256", "value": "AA" }
                ]}
            }
        }))
        .unwrap();
        match connect {
            ClientMessage::ConsumerConnect {
                transport_id,
                dtls_parameters,
            } => {
                assert_eq!(transport_id.as_str(), "t1");
                assert_eq!(dtls_parameters.fingerprints.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_invalid_messages() {
        let err = ClientMessage::from_json(r#"{"type":"teleport"}"#).unwrap_err();
        assert_eq!(err.reason(), "INVALID_MESSAGE");
        let err = ClientMessage::from_json(r#"{"type":"join-room"}"#).unwrap_err();
        assert_eq!(err.reason(), "INVALID_MESSAGE");
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_consumer_ready_tolerates_missing_id() {
        let msg = ClientMessage::from_json(r#"{"type":"consumer-ready","payload":{}}"#).unwrap();
        assert_eq!(msg, ClientMessage::ConsumerReady { consumer_id: None });
        assert!(!msg.expects_reply());
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::JoinedRoom {
            join_room_id: RoomId::from("r"),
            peer_id: PeerId::from("p2"),
            existing_peer_ids: vec![PeerId::from("p1")],
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "joined-room",
                "payload": { "joinRoomId": "r", "peerId": "p2", "existingPeerIds": ["p1"] }
            })
        );

        let err = ServerMessage::error(&SfuError::not_found(crate::error::Entity::Room, "r"));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["reason"], "ROOM_NOT_FOUND");
    }
}
