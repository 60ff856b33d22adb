//! Subscription fan-out engine for the confab SFU.
//!
//! For each published media track this crate maintains the set of
//! subscribers currently receiving it, attaches a send-side forwarder to
//! every subscriber's peer connection, and continuously re-derives the
//! minimum quality the publisher must keep producing from what every
//! downstream consumer actually wants.
//!
//! ## Architecture
//!
//! - **`TrackSubscriptions`**: the per-track engine; registry of
//!   subscribers plus quality aggregation and teardown
//! - **`DownTrack`**: one outbound RTP path to one subscriber
//! - **`SubscribedTrack`**: pairing of a published track with a subscriber,
//!   carrying mute state from both ends
//! - **`MaxQualityTracker`**: folds per-subscriber and per-node desired
//!   qualities into the publisher's enabled-layer set
//!
//! The publishing track, the subscriber participants and their peer
//! connections are collaborators behind the traits in [`participant`];
//! the engine never holds a lock while calling into them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use confab_sfu::{TrackSubscriptions, TrackSubscriptionsParams};
//!
//! let subscriptions = TrackSubscriptions::new(TrackSubscriptionsParams {
//!     media_track,
//!     receiver: ReceiverConfig::default(),
//!     subscriber: DirectionConfig::default(),
//!     subscription: SubscriptionConfig::default(),
//!     telemetry: Some(telemetry),
//! });
//! subscriptions.on_subscribed_max_quality_change(|layers, max| {
//!     // gate the publisher's per-layer encoders
//! });
//! subscriptions.start_max_quality_timer();
//! let down_track = subscriptions.add_subscriber(sub, codec, upstream).await?;
//! ```

pub mod config;
pub mod down_track;
pub mod max_quality;
pub mod participant;
pub mod subscribed_track;
pub mod subscriptions;

pub use config::{
    DirectionConfig, ReceiverConfig, RtcpFeedback, RtcpFeedbackConfig, SubscriptionConfig,
};
pub use down_track::{DownTrack, DownTrackInfo, UpstreamReceiver};
pub use max_quality::{MaxQualityTracker, QualityChangeHandler, SubscribedQuality};
pub use participant::{
    MediaTrack, Participant, ProtocolVersion, RtpSender, RtpTransceiver,
    SubscriberPeerConnection,
};
pub use subscribed_track::SubscribedTrack;
pub use subscriptions::{SubscribedTrackInfo, TrackSubscriptions, TrackSubscriptionsParams};
