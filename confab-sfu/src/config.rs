//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use webrtc::rtp_transceiver::RTCPFeedback;

/// Receive-side buffer sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Number of packets a forwarder's buffer can hold.
    pub packet_buffer_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            packet_buffer_size: 500,
        }
    }
}

/// One RTCP feedback capability, e.g. `nack` or `nack pli`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub parameter: String,
}

impl RtcpFeedback {
    pub fn new(typ: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            typ: typ.into(),
            parameter: parameter.into(),
        }
    }

    #[must_use]
    pub fn to_webrtc(&self) -> RTCPFeedback {
        RTCPFeedback {
            typ: self.typ.clone(),
            parameter: self.parameter.clone(),
        }
    }
}

/// RTCP feedback lists negotiated per track kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedbackConfig {
    pub audio: Vec<RtcpFeedback>,
    pub video: Vec<RtcpFeedback>,
}

impl Default for RtcpFeedbackConfig {
    fn default() -> Self {
        Self {
            audio: vec![
                RtcpFeedback::new("nack", ""),
                RtcpFeedback::new("transport-cc", ""),
            ],
            video: vec![
                RtcpFeedback::new("nack", ""),
                RtcpFeedback::new("nack", "pli"),
                RtcpFeedback::new("goog-remb", ""),
                RtcpFeedback::new("transport-cc", ""),
            ],
        }
    }
}

/// Configuration for one media direction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectionConfig {
    pub rtcp_feedback: RtcpFeedbackConfig,
}

/// Tunables for the subscription engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// How long after track creation the deferred quality recomputation
    /// runs, giving early subscribers time to advertise what they want.
    pub initial_quality_update_wait: Duration,
    /// Number of RTCP source-description sends after a forwarder binds.
    pub binding_report_count: usize,
    /// Spacing between binding-report sends.
    pub binding_report_interval: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            initial_quality_update_wait: Duration::from_secs(10),
            binding_report_count: 7,
            binding_report_interval: Duration::from_millis(20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_reproduce_binding_burst() {
        let config = SubscriptionConfig::default();
        assert_eq!(config.binding_report_count, 7);
        assert_eq!(config.binding_report_interval, Duration::from_millis(20));
        assert_eq!(config.initial_quality_update_wait, Duration::from_secs(10));
    }

    #[test]
    fn default_feedback_lists_per_kind() {
        let config = RtcpFeedbackConfig::default();
        let pairs = |list: &[RtcpFeedback]| {
            list.iter()
                .map(|fb| (fb.typ.clone(), fb.parameter.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(
            pairs(&config.audio),
            vec![
                ("nack".to_string(), String::new()),
                ("transport-cc".to_string(), String::new()),
            ]
        );
        assert_eq!(
            pairs(&config.video),
            vec![
                ("nack".to_string(), String::new()),
                ("nack".to_string(), "pli".to_string()),
                ("goog-remb".to_string(), String::new()),
                ("transport-cc".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn feedback_converts_to_webrtc() {
        let fb = RtcpFeedback::new("nack", "pli").to_webrtc();
        assert_eq!(fb.typ, "nack");
        assert_eq!(fb.parameter, "pli");
    }
}
