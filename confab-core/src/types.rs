//! Common identifier and media types shared across the workspace

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
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
    /// Unique identifier for a participant
    ParticipantId
);

string_id!(
    /// Human-readable identity of a participant
    ParticipantIdentity
);

string_id!(
    /// Unique identifier for a media track
    TrackId
);

string_id!(
    /// Identifier of a peer media node acting on behalf of its own subscribers
    NodeId
);

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn is_video(self) -> bool {
        matches!(self, Self::Video)
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Video quality a consumer wants to receive.
///
/// The order is total: `Off < Low < Medium < High`. `Off` means the
/// consumer does not want the track at all.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl VideoQuality {
    /// The simulcast layers a publisher can produce, lowest first.
    pub const LAYERS: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    /// Spatial layer index for this quality, `None` for `Off`.
    #[must_use]
    pub const fn spatial_layer(self) -> Option<u8> {
        match self {
            Self::Off => None,
            Self::Low => Some(0),
            Self::Medium => Some(1),
            Self::High => Some(2),
        }
    }

    /// Restriction identifier used in simulcast SDP, `None` for `Off`.
    #[must_use]
    pub const fn rid(self) -> Option<&'static str> {
        match self {
            Self::Off => None,
            Self::Low => Some("l"),
            Self::Medium => Some("m"),
            Self::High => Some("h"),
        }
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Serialized form of a published track, handed to telemetry sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: TrackId,
    pub participant_id: ParticipantId,
    pub participant_identity: ParticipantIdentity,
    pub kind: TrackKind,
    pub muted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_order_is_total() {
        assert!(VideoQuality::Off < VideoQuality::Low);
        assert!(VideoQuality::Low < VideoQuality::Medium);
        assert!(VideoQuality::Medium < VideoQuality::High);
        assert_eq!(
            VideoQuality::LAYERS.iter().copied().max(),
            Some(VideoQuality::High)
        );
    }

    #[test]
    fn spatial_layers_match_qualities() {
        assert_eq!(VideoQuality::Off.spatial_layer(), None);
        assert_eq!(VideoQuality::Low.spatial_layer(), Some(0));
        assert_eq!(VideoQuality::Medium.spatial_layer(), Some(1));
        assert_eq!(VideoQuality::High.spatial_layer(), Some(2));
    }

    #[test]
    fn ids_round_trip() {
        let id = ParticipantId::from("sub-1");
        assert_eq!(id.as_str(), "sub-1");
        assert_eq!(id.to_string(), "sub-1");
        assert_eq!(ParticipantId::new("sub-1"), id);
    }
}
