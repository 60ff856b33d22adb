//! Pairing of one published track with one subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use confab_core::types::{ParticipantId, ParticipantIdentity, TrackKind, VideoQuality};

use crate::down_track::DownTrack;

/// One subscriber's view of a published track.
///
/// Owned exclusively by the subscription registry; the subscriber's own
/// track list holds a lookup reference only. Mute state from both ends is
/// folded into the forwarder, which decides between media and padding.
pub struct SubscribedTrack {
    publisher_id: ParticipantId,
    publisher_identity: ParticipantIdentity,
    subscriber_id: ParticipantId,
    down_track: Arc<DownTrack>,

    pub_muted: AtomicBool,
    sub_muted: AtomicBool,

    /// Quality ceiling the subscriber asked for on this track.
    max_quality: RwLock<VideoQuality>,
}

impl SubscribedTrack {
    pub fn new(
        publisher_id: ParticipantId,
        publisher_identity: ParticipantIdentity,
        subscriber_id: ParticipantId,
        down_track: Arc<DownTrack>,
    ) -> Self {
        Self {
            publisher_id,
            publisher_identity,
            subscriber_id,
            down_track,
            pub_muted: AtomicBool::new(false),
            sub_muted: AtomicBool::new(false),
            max_quality: RwLock::new(VideoQuality::High),
        }
    }

    pub fn publisher_id(&self) -> &ParticipantId {
        &self.publisher_id
    }

    pub fn publisher_identity(&self) -> &ParticipantIdentity {
        &self.publisher_identity
    }

    pub fn subscriber_id(&self) -> &ParticipantId {
        &self.subscriber_id
    }

    pub fn down_track(&self) -> Arc<DownTrack> {
        self.down_track.clone()
    }

    pub fn pub_muted(&self) -> bool {
        self.pub_muted.load(Ordering::Acquire)
    }

    pub fn sub_muted(&self) -> bool {
        self.sub_muted.load(Ordering::Acquire)
    }

    pub fn set_publisher_muted(&self, muted: bool) {
        self.pub_muted.store(muted, Ordering::Release);
        self.push_mute();
    }

    pub fn set_subscriber_muted(&self, muted: bool) {
        self.sub_muted.store(muted, Ordering::Release);
        self.push_mute();
    }

    /// The subscriber changed its desired ceiling for this track.
    pub fn set_max_quality(&self, quality: VideoQuality) {
        *self.max_quality.write() = quality;
    }

    pub fn max_quality(&self) -> VideoQuality {
        *self.max_quality.read()
    }

    /// Apply the subscriber's quality ceiling to the forwarder.
    pub fn update_video_layer(&self) {
        if self.down_track.kind() != TrackKind::Video {
            return;
        }
        if let Some(layer) = self.max_quality().spatial_layer() {
            self.down_track.set_max_spatial_layer(layer);
        }
    }

    /// The forwarder bound to the subscriber's peer connection; settings
    /// recorded before the bind now take effect.
    pub fn bound(&self) {
        debug!(
            subscriber_id = %self.subscriber_id,
            track_id = %self.down_track.track_id(),
            "subscribed track bound"
        );
        self.update_video_layer();
    }

    fn push_mute(&self) {
        self.down_track.set_muted(self.pub_muted() || self.sub_muted());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::types::TrackId;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    use crate::down_track::UpstreamReceiver;

    fn subscribed(kind: TrackKind) -> SubscribedTrack {
        let codec = RTCRtpCodecCapability {
            mime_type: match kind {
                TrackKind::Audio => "audio/opus".to_string(),
                TrackKind::Video => "video/VP8".to_string(),
            },
            clock_rate: 90000,
            ..Default::default()
        };
        let down_track = Arc::new(
            DownTrack::new(
                codec,
                UpstreamReceiver {
                    track_id: TrackId::from("track-1"),
                    stream_id: "stream-1".to_string(),
                    ssrc: 99,
                    kind,
                },
                ParticipantId::from("sub-1"),
                500,
            )
            .unwrap(),
        );
        SubscribedTrack::new(
            ParticipantId::from("pub-1"),
            ParticipantIdentity::from("alice"),
            ParticipantId::from("sub-1"),
            down_track,
        )
    }

    #[test]
    fn mute_flags_fold_into_forwarder() {
        let track = subscribed(TrackKind::Video);
        assert!(!track.down_track().muted());

        track.set_publisher_muted(true);
        assert!(track.down_track().muted());

        track.set_publisher_muted(false);
        track.set_subscriber_muted(true);
        assert!(track.down_track().muted());

        track.set_subscriber_muted(false);
        assert!(!track.down_track().muted());
    }

    #[test]
    fn video_layer_follows_desired_quality() {
        let track = subscribed(TrackKind::Video);
        track.set_max_quality(VideoQuality::Low);
        track.update_video_layer();
        assert_eq!(track.down_track().max_spatial_layer(), 0);

        track.set_max_quality(VideoQuality::High);
        track.update_video_layer();
        assert_eq!(track.down_track().max_spatial_layer(), 2);
    }

    #[test]
    fn audio_tracks_keep_default_layer() {
        let track = subscribed(TrackKind::Audio);
        track.set_max_quality(VideoQuality::Low);
        track.update_video_layer();
        assert_eq!(track.down_track().max_spatial_layer(), 2);
    }
}
