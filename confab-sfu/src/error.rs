//! Error types for the SFU core

use crate::engine::EngineError;
use std::fmt;
use thiserror::Error;

/// What kind of object a `NotFound` refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Room,
    Peer,
    Transport,
    Producer,
    Consumer,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Room => "room",
            Self::Peer => "peer",
            Self::Transport => "transport",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SfuError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("{0} transport is not ready")]
    TransportNotReady(crate::types::Direction),

    #[error("RTP capabilities must be requested before creating transports")]
    CapabilitiesUnknown,

    #[error("Capability mismatch: {0}")]
    CapabilityMismatch(String),

    #[error("Room already exists: {0}")]
    DuplicateRoom(String),

    #[error("Room is full: {0}")]
    RoomFull(String),

    #[error("Maximum number of rooms reached")]
    TooManyRooms,

    #[error("Connection has no session")]
    NoSession,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Media engine failure: {0}")]
    EngineFailure(#[from] EngineError),
}

impl SfuError {
    pub fn not_found(entity: Entity, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable reason sent to clients in `error` messages
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { entity, .. } => match entity {
                Entity::Room => "ROOM_NOT_FOUND",
                Entity::Peer => "PEER_NOT_FOUND",
                Entity::Transport => "TRANSPORT_NOT_FOUND",
                Entity::Producer => "PRODUCER_NOT_FOUND",
                Entity::Consumer => "CONSUMER_NOT_FOUND",
            },
            Self::TransportNotReady(_) => "TRANSPORT_NOT_READY",
            Self::CapabilitiesUnknown => "CAPABILITIES_UNKNOWN",
            Self::CapabilityMismatch(_) => "CAPABILITY_MISMATCH",
            Self::DuplicateRoom(_) => "DUPLICATE_ROOM",
            Self::RoomFull(_) => "ROOM_FULL",
            Self::TooManyRooms => "TOO_MANY_ROOMS",
            Self::NoSession => "NO_SESSION",
            Self::InvalidMessage(_) => "INVALID_MESSAGE",
            Self::EngineFailure(_) => "ENGINE_FAILURE",
        }
    }
}

pub type Result<T> = std::result::Result<T, SfuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons() {
        assert_eq!(
            SfuError::not_found(Entity::Room, "r1").reason(),
            "ROOM_NOT_FOUND"
        );
        assert_eq!(
            SfuError::not_found(Entity::Room, "r1").to_string(),
            "room not found: r1"
        );
        assert_eq!(SfuError::NoSession.reason(), "NO_SESSION");
        let engine = SfuError::from(EngineError::WorkerClosed(3));
        assert_eq!(engine.reason(), "ENGINE_FAILURE");
    }
}
