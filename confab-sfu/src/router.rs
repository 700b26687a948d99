//! Message router
//!
//! Maps each inbound signaling message to a room manager operation and
//! serializes the outcome back onto the sender's connection. Request-style
//! messages always get exactly one reply (the result or an `error`);
//! fire-and-forget messages only log on failure.

use crate::connection::ConnectionHandle;
use crate::error::{Result, SfuError};
use crate::manager::Sfu;
use crate::signaling::{ClientMessage, ServerMessage};
use crate::types::Direction;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct MessageRouter {
    sfu: Arc<Sfu>,
}

impl MessageRouter {
    #[must_use]
    pub const fn new(sfu: Arc<Sfu>) -> Self {
        Self { sfu }
    }

    #[must_use]
    pub const fn sfu(&self) -> &Arc<Sfu> {
        &self.sfu
    }

    /// Handle one text frame. Malformed input is answered with an
    /// `INVALID_MESSAGE` error; the connection stays usable.
    pub async fn handle_text(&self, connection: &ConnectionHandle, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle(connection, message).await,
            Err(e) => {
                warn!(connection_id = %connection.id(), error = %e, "Rejected malformed message");
                connection.send(ServerMessage::error(&e));
            }
        }
    }

    pub async fn handle(&self, connection: &ConnectionHandle, message: ClientMessage) {
        let name = message.name();
        let expects_reply = message.expects_reply();
        debug!(connection_id = %connection.id(), message = name, "Handling message");

        match self.dispatch(connection, message).await {
            Ok(Some(reply)) => {
                connection.send(reply);
            }
            Ok(None) => {}
            Err(e) if expects_reply => {
                debug!(connection_id = %connection.id(), message = name, error = %e, "Request failed");
                connection.send(ServerMessage::error(&e));
            }
            Err(e) => {
                warn!(connection_id = %connection.id(), message = name, error = %e, "Dropped message");
            }
        }
    }

    async fn dispatch(&self, connection: &ConnectionHandle, message: ClientMessage) -> Result<Option<ServerMessage>> {
        let conn_id = connection.id();
        let reply = match message {
            ClientMessage::CreateRoom { room_id } => {
                let joined = self.sfu.create_room(connection, room_id).await?;
                ServerMessage::RoomCreated {
                    room_id: joined.room_id,
                    peer_id: joined.peer_id,
                }
            }
            ClientMessage::JoinRoom { room_id } => {
                let joined = self.sfu.join_room(connection, room_id).await?;
                ServerMessage::JoinedRoom {
                    join_room_id: joined.room_id,
                    peer_id: joined.peer_id,
                    existing_peer_ids: joined.existing_peer_ids,
                }
            }
            ClientMessage::GetRtpCapabilities => ServerMessage::RtpCapabilities {
                rtp_capabilities: self.sfu.rtp_capabilities(conn_id).await?,
            },
            ClientMessage::CreateTransport => {
                ServerMessage::TransportCreated(self.sfu.create_transport(conn_id, Direction::Send).await?)
            }
            ClientMessage::TransportConnect {
                transport_id,
                dtls_parameters,
            } => {
                self.sfu
                    .connect_transport(conn_id, Direction::Send, &transport_id, dtls_parameters)
                    .await?;
                ServerMessage::TransportConnected { transport_id }
            }
            ClientMessage::TransportProduce {
                transport_id,
                kind,
                rtp_parameters,
                app_data,
            } => ServerMessage::ProduceData {
                id: self
                    .sfu
                    .produce(conn_id, transport_id.as_ref(), kind, rtp_parameters, app_data)
                    .await?,
            },
            ClientMessage::CreateConsumerTransport => ServerMessage::ConsumerTransportCreated(
                self.sfu.create_transport(conn_id, Direction::Receive).await?,
            ),
            ClientMessage::ConsumerConnect {
                transport_id,
                dtls_parameters,
            } => {
                self.sfu
                    .connect_transport(conn_id, Direction::Receive, &transport_id, dtls_parameters)
                    .await?;
                ServerMessage::ConsumerConnected { transport_id }
            }
            ClientMessage::Consume { rtp_capabilities } => {
                // Consumers are announced through `newConsumer` pushes
                self.sfu.consume(conn_id, rtp_capabilities).await?;
                return Ok(None);
            }
            ClientMessage::ConsumerReady { consumer_id } => {
                let consumer_id = consumer_id.ok_or_else(|| {
                    SfuError::InvalidMessage("consumer-ready without consumerId".to_string())
                })?;
                self.sfu.consumer_ready(conn_id, &consumer_id).await?;
                return Ok(None);
            }
            ClientMessage::CloseProducer { producer_id } => {
                self.sfu.close_producer(conn_id, &producer_id).await?;
                return Ok(None);
            }
            ClientMessage::CloseRoom => {
                if !self.sfu.leave(conn_id).await {
                    return Err(SfuError::NoSession);
                }
                return Ok(None);
            }
        };
        Ok(Some(reply))
    }

    /// The connection went away; tear down whatever session it had
    pub async fn disconnect(&self, connection: &ConnectionHandle) {
        if self.sfu.leave(connection.id()).await {
            info!(connection_id = %connection.id(), "Session closed on disconnect");
        }
    }
}
