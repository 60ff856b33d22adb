//! Subscription fan-out for one published track.
//!
//! `TrackSubscriptions` owns the set of subscribers receiving a track,
//! wires each subscriber's forwarder into that subscriber's peer
//! connection, and keeps the publisher informed of the minimum quality it
//! must produce. Forwarder callbacks and timers arrive on arbitrary
//! workers; the registry is a concurrent map and subscriber objects are
//! only ever called from detached tasks, never while an engine lock is
//! held, because subscribers take their own locks and call back in.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtcp::source_description::SourceDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

use confab_core::error::{Error, Result};
use confab_core::telemetry::{RtcpPacket, StreamDirection, TelemetrySink};
use confab_core::types::{NodeId, ParticipantId, TrackKind, VideoQuality};

use crate::config::{DirectionConfig, ReceiverConfig, SubscriptionConfig};
use crate::down_track::{DownTrack, DownTrackInfo, UpstreamReceiver};
use crate::max_quality::{MaxQualityTracker, SubscribedQuality};
use crate::participant::{MediaTrack, Participant, RtpSender};
use crate::subscribed_track::SubscribedTrack;

/// Collaborators and tunables for one track's subscription engine.
pub struct TrackSubscriptionsParams {
    pub media_track: Arc<dyn MediaTrack>,
    pub receiver: ReceiverConfig,
    pub subscriber: DirectionConfig,
    pub subscription: SubscriptionConfig,
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
}

/// Debug snapshot of one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribedTrackInfo {
    pub pub_muted: bool,
    pub sub_muted: bool,
    pub down_track: DownTrackInfo,
}

/// Manages the subscriptions of one published track.
pub struct TrackSubscriptions {
    params: TrackSubscriptionsParams,
    subscribed_tracks: DashMap<ParticipantId, Arc<SubscribedTrack>>,
    max_quality: Arc<MaxQualityTracker>,
}

impl TrackSubscriptions {
    pub fn new(params: TrackSubscriptionsParams) -> Arc<Self> {
        let max_quality = Arc::new(MaxQualityTracker::new(
            params.media_track.kind(),
            params.subscription.initial_quality_update_wait,
        ));
        Arc::new(Self {
            params,
            subscribed_tracks: DashMap::new(),
            max_quality,
        })
    }

    pub fn is_subscriber(&self, subscriber_id: &ParticipantId) -> bool {
        self.subscribed_tracks.contains_key(subscriber_id)
    }

    /// Subscribe `sub` to this track.
    ///
    /// Returns `Ok(None)` when the subscriber is already present (the
    /// caller treats re-subscription as idempotent). Errors that prevent
    /// the subscription from being established surface to the caller;
    /// nothing is registered in that case.
    pub async fn add_subscriber(
        self: &Arc<Self>,
        sub: Arc<dyn Participant>,
        codec: RTCRtpCodecCapability,
        upstream: UpstreamReceiver,
    ) -> Result<Option<Arc<DownTrack>>> {
        let subscriber_id = sub.id();

        if self.subscribed_tracks.contains_key(&subscriber_id) {
            return Ok(None);
        }

        let rtcp_feedback = match self.params.media_track.kind() {
            TrackKind::Audio => &self.params.subscriber.rtcp_feedback.audio,
            TrackKind::Video => &self.params.subscriber.rtcp_feedback.video,
        };
        let down_track = Arc::new(DownTrack::new(
            RTCRtpCodecCapability {
                mime_type: codec.mime_type,
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                sdp_fmtp_line: codec.sdp_fmtp_line,
                rtcp_feedback: rtcp_feedback.iter().map(|fb| fb.to_webrtc()).collect(),
            },
            upstream,
            subscriber_id.clone(),
            self.params.receiver.packet_buffer_size,
        )?);

        let sub_track = Arc::new(SubscribedTrack::new(
            self.params.media_track.participant_id(),
            self.params.media_track.participant_identity(),
            subscriber_id.clone(),
            down_track.clone(),
        ));

        let pc = sub.subscriber_pc();
        let (transceiver, sender) = if sub.protocol_version().supports_transceiver_reuse() {
            // add_track may re-use a dormant transceiver when the
            // attributes match, which keeps the SDP from accumulating
            // dead sections. There is no way to get the transceiver back
            // from the sender, so search for it.
            let sender = pc.add_track(down_track.clone()).await?;

            let mut attached = None;
            for transceiver in pc.get_transceivers().await {
                if let Some(candidate) = transceiver.sender().await {
                    if candidate.id() == sender.id() {
                        attached = Some(transceiver);
                        break;
                    }
                }
            }
            let transceiver = attached.ok_or(Error::NoTransceiver)?;
            (transceiver, sender)
        } else {
            let transceiver = pc
                .add_transceiver_from_track(
                    down_track.clone(),
                    RTCRtpTransceiverDirection::Sendonly,
                )
                .await?;
            let sender = transceiver.sender().await.ok_or(Error::NoSender)?;
            (transceiver, sender)
        };

        let send_parameters = sender.get_parameters().await;
        down_track.set_rtp_header_extensions(send_parameters.rtp_parameters.header_extensions);
        down_track.set_transceiver(transceiver);

        // On bind: mark the record bound and push binding reports, off the
        // transport thread.
        {
            let engine = Arc::downgrade(self);
            let sub = sub.clone();
            let sub_track = sub_track.clone();
            down_track.on_bind(move || {
                tokio::spawn(async move {
                    sub_track.bound();
                    if let Some(engine) = engine.upgrade() {
                        engine.send_binding_reports(sub).await;
                    }
                });
            });
        }

        if let Some(telemetry) = self.params.telemetry.clone() {
            let track_id = self.params.media_track.id();
            {
                let telemetry = telemetry.clone();
                let subscriber_id = subscriber_id.clone();
                let track_id = track_id.clone();
                down_track.on_packet_sent(move |size| {
                    telemetry.on_downstream_packet(&subscriber_id, &track_id, size);
                });
            }
            {
                let telemetry = telemetry.clone();
                let subscriber_id = subscriber_id.clone();
                let track_id = track_id.clone();
                down_track.on_padding_sent(move |size| {
                    telemetry.on_downstream_packet(&subscriber_id, &track_id, size);
                });
            }
            {
                let subscriber_id = subscriber_id.clone();
                down_track.on_rtcp(move |packets| {
                    telemetry.handle_rtcp(
                        StreamDirection::Downstream,
                        &subscriber_id,
                        &track_id,
                        &packets,
                    );
                });
            }
        }

        // On close: run the removal protocol in a detached task so the
        // transport callback never re-enters its own locks.
        {
            let engine = Arc::downgrade(self);
            let sub = sub.clone();
            let sender = sender.clone();
            let sub_track = sub_track.clone();
            let subscriber_id = subscriber_id.clone();
            down_track.on_close(move || {
                tokio::spawn(async move {
                    if let Some(engine) = engine.upgrade() {
                        engine
                            .handle_down_track_closed(sub, sender, sub_track, subscriber_id)
                            .await;
                    }
                });
            });
        }

        self.subscribed_tracks
            .insert(subscriber_id.clone(), sub_track.clone());
        sub_track.set_publisher_muted(self.params.media_track.is_muted());

        // The subscriber takes its own locks inside these calls and may
        // call back into the engine, so run them detached. Start at HIGH
        // until the subscriber advertises what it actually wants.
        {
            let engine = self.clone();
            let sub = sub.clone();
            let sub_track = sub_track.clone();
            let subscriber_id = subscriber_id.clone();
            tokio::spawn(async move {
                engine.notify_subscriber_max_quality(subscriber_id, VideoQuality::High);
                sub.add_subscribed_track(sub_track).await;
                sub.negotiate().await;
            });
        }

        if let Some(telemetry) = &self.params.telemetry {
            telemetry.track_subscribed(&subscriber_id, &self.params.media_track.to_info());
        }

        Ok(Some(down_track))
    }

    /// Teardown for one forwarder, triggered solely by its close hook.
    async fn handle_down_track_closed(
        &self,
        sub: Arc<dyn Participant>,
        sender: Arc<dyn RtpSender>,
        sub_track: Arc<SubscribedTrack>,
        subscriber_id: ParticipantId,
    ) {
        self.subscribed_tracks.remove(&subscriber_id);
        if let Some(telemetry) = &self.params.telemetry {
            telemetry.track_unsubscribed(&subscriber_id, &self.params.media_track.to_info());
        }

        // Nothing to detach from a dead connection.
        let pc = sub.subscriber_pc();
        if pc.connection_state() == RTCPeerConnectionState::Closed {
            return;
        }

        debug!(
            track_id = %self.params.media_track.id(),
            subscriber = %sub.identity(),
            subscriber_id = %subscriber_id,
            kind = %self.params.media_track.kind(),
            "removing peer connection track"
        );
        if let Err(err) = pc.remove_track(sender).await {
            match err {
                // Subscriber is closing; nothing left to remove.
                webrtc::Error::ErrConnectionClosed => return,
                // Track state may already be inactive.
                webrtc::Error::ErrSenderNotCreatedByConnection => {}
                other => {
                    debug!(
                        error = %other,
                        subscriber = %sub.identity(),
                        subscriber_id = %subscriber_id,
                        "could not remove track from peer connection"
                    );
                }
            }
        }

        self.notify_subscriber_max_quality(subscriber_id, VideoQuality::Off);
        sub.remove_subscribed_track(sub_track).await;
        sub.negotiate().await;
    }

    /// Stop the forwarder to `subscriber_id`; the close hook runs the rest
    /// of the teardown.
    pub fn remove_subscriber(&self, subscriber_id: &ParticipantId) {
        if let Some(sub_track) = self.get_subscribed_track(subscriber_id) {
            let down_track = sub_track.down_track();
            tokio::spawn(async move {
                down_track.close();
            });
        }
    }

    pub fn remove_all_subscribers(&self) {
        debug!(
            track_id = %self.params.media_track.id(),
            "removing all subscribers"
        );
        let tracks: Vec<Arc<SubscribedTrack>> = self
            .subscribed_tracks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for sub_track in tracks {
            let down_track = sub_track.down_track();
            tokio::spawn(async move {
                down_track.close();
            });
        }
        // Structural reset; late close hooks delete by key and find
        // nothing, which is fine.
        self.subscribed_tracks.clear();
    }

    /// Tear down every subscriber not in `allowed`. Returns the revoked
    /// ids for authorization auditing.
    pub fn revoke_disallowed(&self, allowed: &[ParticipantId]) -> Vec<ParticipantId> {
        let mut revoked = Vec::new();
        for entry in self.subscribed_tracks.iter() {
            if !allowed.contains(entry.key()) {
                let down_track = entry.value().down_track();
                tokio::spawn(async move {
                    down_track.close();
                });
                revoked.push(entry.key().clone());
            }
        }
        revoked
    }

    /// Fan the publisher's mute state to every subscription. Unmuting may
    /// re-enable layers that were throttled away while nobody could see
    /// them.
    pub fn set_muted(&self, muted: bool) {
        let tracks: Vec<Arc<SubscribedTrack>> = self
            .subscribed_tracks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for sub_track in tracks {
            sub_track.set_publisher_muted(muted);
        }

        if !muted {
            self.max_quality.recompute();
        }
    }

    pub fn update_video_layers(&self) {
        let tracks: Vec<Arc<SubscribedTrack>> = self
            .subscribed_tracks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for sub_track in tracks {
            sub_track.update_video_layer();
        }
    }

    pub fn debug_info(&self) -> Vec<SubscribedTrackInfo> {
        self.subscribed_tracks
            .iter()
            .map(|entry| {
                let sub_track = entry.value();
                SubscribedTrackInfo {
                    pub_muted: sub_track.pub_muted(),
                    sub_muted: sub_track.sub_muted(),
                    down_track: sub_track.down_track().debug_info(),
                }
            })
            .collect()
    }

    /// Register the publisher's layer-enable callback.
    pub fn on_subscribed_max_quality_change(
        &self,
        f: impl Fn(Vec<SubscribedQuality>, VideoQuality) + Send + Sync + 'static,
    ) {
        self.max_quality.on_change(f);
    }

    pub fn notify_subscriber_max_quality(
        &self,
        subscriber_id: ParticipantId,
        quality: VideoQuality,
    ) {
        // Record the ceiling on the subscription itself so layer fan-outs
        // re-apply it, then fold it into the aggregate.
        if let Some(sub_track) = self.get_subscribed_track(&subscriber_id) {
            sub_track.set_max_quality(quality);
            sub_track.update_video_layer();
        }
        self.max_quality.notify_subscriber(subscriber_id, quality);
    }

    pub fn notify_node_max_quality(&self, node_id: NodeId, quality: VideoQuality) {
        self.max_quality.notify_node(node_id, quality);
    }

    pub fn start_max_quality_timer(&self) {
        self.max_quality.start_initial_timer();
    }

    pub fn stop_max_quality_timer(&self) {
        self.max_quality.stop_initial_timer();
    }

    pub fn current_max_quality(&self) -> VideoQuality {
        self.max_quality.current_max()
    }

    /// Number of spatial layers any consumer currently needs.
    pub fn num_subscribed(&self) -> u32 {
        self.max_quality.num_enabled_layers()
    }

    /// Engine teardown: cancel the deferred quality update and stop every
    /// forwarder.
    pub fn close(&self) {
        self.max_quality.stop_initial_timer();
        self.remove_all_subscribers();
    }

    fn get_subscribed_track(&self, subscriber_id: &ParticipantId) -> Option<Arc<SubscribedTrack>> {
        self.subscribed_tracks
            .get(subscriber_id)
            .map(|entry| entry.value().clone())
    }

    /// Burst of RTCP source descriptions after a forwarder binds, so the
    /// receiver can associate the new SSRC with its source (RFC 7941).
    /// A send failure aborts the remainder of the burst. Panics from a
    /// faulty transport stay inside the guard.
    async fn send_binding_reports(&self, sub: Arc<dyn Participant>) {
        let Some(sub_track) = self.get_subscribed_track(&sub.id()) else {
            return;
        };
        let Some(chunks) = sub_track.down_track().create_source_description_chunks() else {
            return;
        };

        let packets: Vec<RtcpPacket> = vec![Box::new(SourceDescription { chunks })];
        let pc = sub.subscriber_pc();
        let count = self.params.subscription.binding_report_count;
        let interval = self.params.subscription.binding_report_interval;
        let track_id = self.params.media_track.id();

        let burst = async move {
            for i in 0..count {
                if let Err(err) = pc.write_rtcp(&packets).await {
                    error!(
                        error = %err,
                        track_id = %track_id,
                        "could not write RTCP source description"
                    );
                    return;
                }
                if i + 1 < count {
                    tokio::time::sleep(interval).await;
                }
            }
        };
        let _ = AssertUnwindSafe(burst).catch_unwind().await;
    }
}
