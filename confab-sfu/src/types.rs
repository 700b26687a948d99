//! Common identifier types used throughout the SFU

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random 12-character id
            #[must_use]
            pub fn generate() -> Self {
                Self(nanoid::nanoid!(12))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a conferencing room
    RoomId
);

string_id!(
    /// Unique identifier for a peer session. Never reused.
    PeerId
);

string_id!(
    /// Identifier of one signaling connection
    ConnectionId
);

string_id!(
    /// Media-engine router (capability context) identifier
    RouterId
);

string_id!(TransportId);
string_id!(ProducerId);
string_id!(ConsumerId);

/// Index of a media-engine worker process backing one or more routers
pub type WorkerId = usize;

/// Which way media flows over a transport, from the peer's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Peer sends media to the SFU (producers live here)
    Send,
    /// Peer receives media from the SFU (consumers live here)
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Receive => f.write_str("receive"),
        }
    }
}
