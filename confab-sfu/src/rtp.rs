//! RTP capability and transport descriptors exchanged with browsers
//!
//! Field names follow the camelCase shapes produced by browser WebRTC device
//! libraries, so payloads can be passed through without translation.

use crate::types::TransportId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
}

impl RtcpFeedback {
    fn new(kind: &str, parameter: &str) -> Self {
        Self {
            kind: kind.to_string(),
            parameter: parameter.to_string(),
        }
    }
}

/// One codec a router or a receiving device supports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    /// Opus, 48 kHz stereo
    #[must_use]
    pub fn opus() -> Self {
        Self {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: 48_000,
            channels: Some(2),
            preferred_payload_type: Some(100),
            parameters: Map::new(),
            rtcp_feedback: vec![RtcpFeedback::new("transport-cc", "")],
        }
    }

    /// VP8, 90 kHz
    #[must_use]
    pub fn vp8() -> Self {
        Self {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            clock_rate: 90_000,
            channels: None,
            preferred_payload_type: Some(101),
            parameters: Map::new(),
            rtcp_feedback: vec![
                RtcpFeedback::new("nack", ""),
                RtcpFeedback::new("nack", "pli"),
                RtcpFeedback::new("ccm", "fir"),
                RtcpFeedback::new("goog-remb", ""),
            ],
        }
    }

    /// Whether a negotiated codec is the same codec as this capability.
    ///
    /// Mime types compare case-insensitively; channel count only matters when
    /// both sides state one.
    #[must_use]
    pub fn matches(&self, codec: &RtpCodecParameters) -> bool {
        self.mime_type.eq_ignore_ascii_case(&codec.mime_type)
            && self.clock_rate == codec.clock_rate
            && match (self.channels, codec.channels) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }

    /// Same comparison between two capabilities
    #[must_use]
    pub fn matches_capability(&self, other: &Self) -> bool {
        self.kind == other.kind && self.matches(&other.as_parameters(0))
    }

    pub(crate) fn as_parameters(&self, payload_type: u8) -> RtpCodecParameters {
        RtpCodecParameters {
            mime_type: self.mime_type.clone(),
            payload_type,
            clock_rate: self.clock_rate,
            channels: self.channels,
            parameters: self.parameters.clone(),
            rtcp_feedback: self.rtcp_feedback.clone(),
        }
    }
}

/// Full capability set of a router or a receiving device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<Value>,
}

impl RtpCapabilities {
    /// First capability matching a negotiated codec of the given kind
    #[must_use]
    pub fn find(&self, kind: MediaKind, codec: &RtpCodecParameters) -> Option<&RtpCodecCapability> {
        self.codecs
            .iter()
            .find(|cap| cap.kind == kind && cap.matches(codec))
    }

    /// Whether the media codecs of a producer's parameters are all supported
    #[must_use]
    pub fn supports(&self, kind: MediaKind, parameters: &RtpParameters) -> bool {
        let mut media = parameters.media_codecs().peekable();
        media.peek().is_some() && media.all(|codec| self.find(kind, codec).is_some())
    }
}

/// One codec as negotiated for a specific stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecParameters {
    /// Retransmission and FEC entries are not media codecs
    #[must_use]
    pub fn is_media(&self) -> bool {
        let subtype = self
            .mime_type
            .split_once('/')
            .map_or(self.mime_type.as_str(), |(_, sub)| sub);
        !matches!(
            subtype.to_ascii_lowercase().as_str(),
            "rtx" | "red" | "ulpfec" | "flexfec"
        )
    }
}

/// RTP parameters of a single producer or consumer stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default)]
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<Value>,
    #[serde(default)]
    pub encodings: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtcp: Option<Value>,
}

impl RtpParameters {
    pub fn media_codecs(&self) -> impl Iterator<Item = &RtpCodecParameters> {
        self.codecs.iter().filter(|codec| codec.is_media())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub protocol: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Everything a browser needs to build its side of a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_parameters: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vp8_params() -> RtpParameters {
        serde_json::from_value(json!({
            "mid": "0",
            "codecs": [
                { "mimeType": "video/vp8", "payloadType": 96, "clockRate": 90000 },
                { "mimeType": "video/rtx", "payloadType": 97, "clockRate": 90000,
                  "parameters": { "apt": 96 } }
            ],
            "encodings": [{ "ssrc": 1111 }]
        }))
        .unwrap()
    }

    #[test]
    fn test_capability_matching_ignores_case_and_rtx() {
        let caps = RtpCapabilities {
            codecs: vec![RtpCodecCapability::opus(), RtpCodecCapability::vp8()],
            header_extensions: vec![],
        };
        let params = vp8_params();
        assert_eq!(params.media_codecs().count(), 1);
        assert!(caps.supports(MediaKind::Video, &params));
        assert!(!caps.supports(MediaKind::Audio, &params));
    }

    #[test]
    fn test_empty_parameters_are_not_supported() {
        let caps = RtpCapabilities {
            codecs: vec![RtpCodecCapability::vp8()],
            header_extensions: vec![],
        };
        assert!(!caps.supports(MediaKind::Video, &RtpParameters::default()));
    }

    #[test]
    fn test_channel_count_mismatch() {
        let opus = RtpCodecCapability::opus();
        let mono = RtpCodecParameters {
            channels: Some(1),
            ..opus.as_parameters(111)
        };
        assert!(!opus.matches(&mono));
        let unspecified = RtpCodecParameters {
            channels: None,
            ..opus.as_parameters(111)
        };
        assert!(opus.matches(&unspecified));
    }

    #[test]
    fn test_transport_params_wire_shape() {
        let params = TransportParams {
            id: TransportId::from("t1"),
            ice_parameters: IceParameters {
                username_fragment: "u".into(),
                password: "p".into(),
                ice_lite: true,
            },
            ice_candidates: vec![],
            dtls_parameters: DtlsParameters::default(),
            sctp_parameters: None,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["iceParameters"]["usernameFragment"], "u");
        assert_eq!(value["iceParameters"]["iceLite"], true);
        assert!(value.get("sctpParameters").is_none());
    }
}
