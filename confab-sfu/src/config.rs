//! SFU Configuration

use crate::rtp::RtpCodecCapability;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SFU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// Maximum number of concurrent rooms (0 = unlimited)
    pub max_rooms: usize,
    /// Maximum peers per room (0 = unlimited)
    pub max_peers_per_room: usize,
    /// Create unknown rooms on `join-room` instead of answering `ROOM_NOT_FOUND`
    pub create_room_on_join: bool,
    /// How long produce/consume requests wait for their transport to connect
    pub transport_ready_timeout_ms: u64,
    /// Upper bound for a single media engine call
    pub engine_call_timeout_ms: u64,
    /// Interval of the empty-room sweeper
    pub cleanup_interval_secs: u64,
    /// Outbound message queue capacity per connection
    pub outbound_queue_capacity: usize,
    /// Codecs every room's router is created with
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            max_rooms: 0,
            max_peers_per_room: 50,
            create_room_on_join: false,
            transport_ready_timeout_ms: 10_000,
            engine_call_timeout_ms: 5_000,
            cleanup_interval_secs: 60,
            outbound_queue_capacity: 256,
            media_codecs: vec![RtpCodecCapability::opus(), RtpCodecCapability::vp8()],
        }
    }
}

impl SfuConfig {
    #[must_use]
    pub const fn transport_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_ready_timeout_ms)
    }

    #[must_use]
    pub const fn engine_call_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_call_timeout_ms)
    }

    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Collect human-readable configuration problems
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.media_codecs.is_empty() {
            errors.push("sfu.media_codecs must list at least one codec".to_string());
        }
        if self.transport_ready_timeout_ms == 0 {
            errors.push("sfu.transport_ready_timeout_ms must be positive".to_string());
        }
        if self.engine_call_timeout_ms == 0 {
            errors.push("sfu.engine_call_timeout_ms must be positive".to_string());
        }
        if self.cleanup_interval_secs == 0 {
            errors.push("sfu.cleanup_interval_secs must be positive".to_string());
        }
        if self.outbound_queue_capacity == 0 {
            errors.push("sfu.outbound_queue_capacity must be positive".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SfuConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.media_codecs.len(), 2);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let config = SfuConfig {
            media_codecs: vec![],
            engine_call_timeout_ms: 0,
            ..SfuConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
