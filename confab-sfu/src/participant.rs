//! Contracts the engine consumes from its collaborators.
//!
//! The publishing track, the subscriber participant and the subscriber's
//! peer connection all live outside this crate; the engine only sees these
//! traits. Subscriber objects acquire their own locks and may call back into
//! the engine, so the engine never invokes them while holding one of its own
//! locks.

use std::sync::Arc;

use async_trait::async_trait;
use confab_core::telemetry::RtcpPacket;
use confab_core::types::{ParticipantId, ParticipantIdentity, TrackId, TrackInfo, TrackKind};
use webrtc::error::Result as RtcResult;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpSendParameters;

use crate::down_track::DownTrack;
use crate::subscribed_track::SubscribedTrack;

/// Capabilities advertised by a participant's client protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolVersion {
    transceiver_reuse: bool,
}

impl ProtocolVersion {
    #[must_use]
    pub const fn new(transceiver_reuse: bool) -> Self {
        Self { transceiver_reuse }
    }

    /// Whether the client can cope with `add_track` re-using a dormant
    /// transceiver instead of always creating a fresh one.
    #[must_use]
    pub const fn supports_transceiver_reuse(&self) -> bool {
        self.transceiver_reuse
    }
}

/// Send-side RTP egress on a subscriber's peer connection.
#[async_trait]
pub trait RtpSender: Send + Sync {
    /// Stable identity, used to match a sender back to its transceiver.
    fn id(&self) -> String;

    async fn get_parameters(&self) -> RTCRtpSendParameters;
}

/// Bidirectional media slot on a subscriber's peer connection.
#[async_trait]
pub trait RtpTransceiver: Send + Sync {
    async fn sender(&self) -> Option<Arc<dyn RtpSender>>;

    /// Negotiated media id, `None` before negotiation.
    fn mid(&self) -> Option<String>;
}

/// The subscriber-facing side of a peer connection.
#[async_trait]
pub trait SubscriberPeerConnection: Send + Sync {
    /// Attach a forwarder, re-using a dormant transceiver when possible.
    async fn add_track(&self, track: Arc<DownTrack>) -> RtcResult<Arc<dyn RtpSender>>;

    async fn get_transceivers(&self) -> Vec<Arc<dyn RtpTransceiver>>;

    /// Attach a forwarder on a freshly created transceiver.
    async fn add_transceiver_from_track(
        &self,
        track: Arc<DownTrack>,
        direction: RTCRtpTransceiverDirection,
    ) -> RtcResult<Arc<dyn RtpTransceiver>>;

    async fn remove_track(&self, sender: Arc<dyn RtpSender>) -> RtcResult<()>;

    async fn write_rtcp(&self, packets: &[RtcpPacket]) -> RtcResult<()>;

    fn connection_state(&self) -> RTCPeerConnectionState;
}

/// A subscribing participant.
#[async_trait]
pub trait Participant: Send + Sync {
    fn id(&self) -> ParticipantId;

    fn identity(&self) -> ParticipantIdentity;

    fn protocol_version(&self) -> ProtocolVersion;

    fn subscriber_pc(&self) -> Arc<dyn SubscriberPeerConnection>;

    /// Record the subscription in the participant's own track list. The
    /// participant keeps a lookup reference only; the registry owns the
    /// record.
    async fn add_subscribed_track(&self, track: Arc<SubscribedTrack>);

    async fn remove_subscribed_track(&self, track: Arc<SubscribedTrack>);

    /// Kick off renegotiation of the subscriber's peer connection.
    async fn negotiate(&self);
}

/// The published track this engine fans out.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> TrackId;

    fn participant_id(&self) -> ParticipantId;

    fn participant_identity(&self) -> ParticipantIdentity;

    fn kind(&self) -> TrackKind;

    fn is_muted(&self) -> bool;

    /// Serialized form handed to telemetry sinks.
    fn to_info(&self) -> TrackInfo;
}
