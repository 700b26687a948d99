//! Confab SFU signaling core
//!
//! Coordinates multi-party WebRTC sessions through an external media engine.
//! Browsers talk JSON over a persistent connection; the core keeps the
//! session state (rooms, peers, transports, producers, consumers) and drives
//! the engine so that every receiving peer consumes every other peer's media.
//!
//! ## Architecture
//!
//! - **`SessionRegistry`**: room, connection and transport lookup tables
//! - **`Room`**: one router plus the peers in it, behind a single async lock
//! - **`PeerSession`**: transports, producers and consumers of one participant
//! - **`fanout`**: keeps "one consumer per (receiver, producer)" converged
//! - **`MediaEngine`**: the boundary to the engine that actually moves RTP
//! - **`MessageRouter`**: signaling messages in, replies and pushes out
//!
//! ## Usage
//!
//! ```rust,ignore
//! use confab_sfu::{Connection, LoopbackEngine, MessageRouter, Sfu, SfuConfig};
//! use std::sync::Arc;
//!
//! let sfu = Sfu::new(SfuConfig::default(), Arc::new(LoopbackEngine::default()));
//! let router = MessageRouter::new(sfu);
//!
//! let (conn, mut outbound) = Connection::new(256);
//! router.handle_text(&conn.handle(), r#"{"type":"create-room"}"#).await;
//! ```

mod config;
mod connection;
pub mod engine;
mod error;
mod fanout;
mod manager;
mod peer;
mod registry;
mod room;
mod router;
pub mod rtp;
mod signaling;
mod types;

pub use config::SfuConfig;
pub use connection::{Connection, ConnectionHandle, Outbound};
pub use engine::{EngineError, EngineEvent, LoopbackEngine, MediaEngine, TransportState};
pub use error::{Entity, Result, SfuError};
pub use manager::{Joined, Sfu, SfuStats};
pub use peer::{ConsumerEntry, ConsumerSnapshot, PeerSession, PeerSnapshot, ProducerEntry};
pub use registry::{SessionRegistry, SessionRoute, TransportRoute};
pub use room::{Room, RoomSnapshot, RoomState};
pub use router::MessageRouter;
pub use signaling::{ClientMessage, ServerMessage};
pub use types::{
    ConnectionId, ConsumerId, Direction, PeerId, ProducerId, RoomId, RouterId, TransportId, WorkerId,
};
