//! Shared foundation for the confab media server.
//!
//! This crate carries the protocol-level types (participant, track and node
//! identifiers, track kinds, video qualities), the workspace error type, the
//! logging bootstrap, and the telemetry contract that engine crates report
//! into.

pub mod config;
pub mod error;
pub mod logging;
pub mod telemetry;
pub mod types;

pub use config::{LogFormat, LoggingConfig};
pub use error::{Error, Result};
pub use telemetry::{LogTelemetry, RtcpPacket, StreamDirection, TelemetrySink};
pub use types::{
    NodeId, ParticipantId, ParticipantIdentity, TrackId, TrackInfo, TrackKind, VideoQuality,
};
