//! Telemetry contract consumed by the media engine.
//!
//! Sinks are best-effort and fire-and-forget: methods take `&self`, must not
//! block the caller for long, and may drop events under pressure.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ParticipantId, TrackId, TrackInfo};

/// Boxed RTCP packet as produced and consumed by the transport layer.
pub type RtcpPacket = Box<dyn webrtc::rtcp::packet::Packet + Send + Sync>;

/// Direction of a media stream relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    Upstream,
    Downstream,
}

/// Sink for subscription and media-flow events.
pub trait TelemetrySink: Send + Sync {
    fn track_subscribed(&self, subscriber_id: &ParticipantId, track: &TrackInfo);

    fn track_unsubscribed(&self, subscriber_id: &ParticipantId, track: &TrackInfo);

    /// A packet (media or padding) left this node towards a subscriber.
    fn on_downstream_packet(&self, subscriber_id: &ParticipantId, track_id: &TrackId, size: usize);

    /// A batch of RTCP packets crossed this node.
    fn handle_rtcp(
        &self,
        direction: StreamDirection,
        subscriber_id: &ParticipantId,
        track_id: &TrackId,
        packets: &[RtcpPacket],
    );
}

/// Telemetry sink that writes events to the tracing pipeline.
///
/// Default sink for deployments without a dedicated metrics backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn track_subscribed(&self, subscriber_id: &ParticipantId, track: &TrackInfo) {
        debug!(
            subscriber_id = %subscriber_id,
            track_id = %track.id,
            kind = %track.kind,
            "track subscribed"
        );
    }

    fn track_unsubscribed(&self, subscriber_id: &ParticipantId, track: &TrackInfo) {
        debug!(
            subscriber_id = %subscriber_id,
            track_id = %track.id,
            kind = %track.kind,
            "track unsubscribed"
        );
    }

    fn on_downstream_packet(&self, subscriber_id: &ParticipantId, track_id: &TrackId, size: usize) {
        debug!(
            subscriber_id = %subscriber_id,
            track_id = %track_id,
            size,
            "downstream packet"
        );
    }

    fn handle_rtcp(
        &self,
        direction: StreamDirection,
        subscriber_id: &ParticipantId,
        track_id: &TrackId,
        packets: &[RtcpPacket],
    ) {
        debug!(
            direction = ?direction,
            subscriber_id = %subscriber_id,
            track_id = %track_id,
            count = packets.len(),
            "rtcp batch"
        );
    }
}
