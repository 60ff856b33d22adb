//! Forwarder handle: one outbound RTP path to one subscriber.
//!
//! A `DownTrack` is created when a subscriber is added and closed by engine
//! teardown, explicit revocation, or peer-connection failure. The transport
//! drives its edges (`handle_bound`, `record_packet_sent`, `handle_rtcp`,
//! ...) from arbitrary worker threads; the engine reacts through the
//! registered hooks.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use webrtc::rtcp::source_description::{
    SdesType, SourceDescriptionChunk, SourceDescriptionItem,
};
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpHeaderExtensionParameters,
};

use confab_core::error::{Error, Result};
use confab_core::telemetry::RtcpPacket;
use confab_core::types::{ParticipantId, TrackId, TrackKind};

use crate::participant::RtpTransceiver;

type OnceHook = Box<dyn FnOnce() + Send + Sync>;
type SentHook = Arc<dyn Fn(usize) + Send + Sync>;
type RtcpHook = Arc<dyn Fn(Vec<RtcpPacket>) + Send + Sync>;

/// Descriptor of the publisher-side receiver a forwarder pulls from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamReceiver {
    pub track_id: TrackId,
    pub stream_id: String,
    pub ssrc: u32,
    pub kind: TrackKind,
}

/// Snapshot of a forwarder's state for debug enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownTrackInfo {
    pub subscriber_id: ParticipantId,
    pub track_id: TrackId,
    pub mime_type: String,
    pub ssrc: u32,
    pub bound: bool,
    pub closed: bool,
    pub muted: bool,
    pub max_spatial_layer: u8,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub padding_bytes_sent: u64,
}

/// Send-side RTP pipeline from one published track to one subscriber.
pub struct DownTrack {
    subscriber_id: ParticipantId,
    codec: RTCRtpCodecCapability,
    upstream: UpstreamReceiver,
    packet_buffer_size: usize,

    bound: AtomicBool,
    closed: AtomicBool,
    muted: AtomicBool,
    max_spatial_layer: AtomicU8,

    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    padding_bytes_sent: AtomicU64,

    transceiver: RwLock<Option<Arc<dyn RtpTransceiver>>>,
    header_extensions: RwLock<Vec<RTCRtpHeaderExtensionParameters>>,

    on_bind: Mutex<Option<OnceHook>>,
    on_close: Mutex<Option<OnceHook>>,
    on_packet_sent: RwLock<Option<SentHook>>,
    on_padding_sent: RwLock<Option<SentHook>>,
    on_rtcp: RwLock<Option<RtcpHook>>,
}

impl DownTrack {
    /// Build a forwarder for `subscriber_id` fed by `upstream`.
    ///
    /// `codec` must carry the full negotiated capability including the
    /// RTCP feedback list for the track kind.
    pub fn new(
        codec: RTCRtpCodecCapability,
        upstream: UpstreamReceiver,
        subscriber_id: ParticipantId,
        packet_buffer_size: usize,
    ) -> Result<Self> {
        if codec.mime_type.is_empty() {
            return Err(Error::Codec("missing mime type".to_string()));
        }
        if codec.clock_rate == 0 {
            return Err(Error::Codec(format!(
                "invalid clock rate for {}",
                codec.mime_type
            )));
        }

        Ok(Self {
            subscriber_id,
            codec,
            upstream,
            packet_buffer_size,
            bound: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            max_spatial_layer: AtomicU8::new(2),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            padding_bytes_sent: AtomicU64::new(0),
            transceiver: RwLock::new(None),
            header_extensions: RwLock::new(Vec::new()),
            on_bind: Mutex::new(None),
            on_close: Mutex::new(None),
            on_packet_sent: RwLock::new(None),
            on_padding_sent: RwLock::new(None),
            on_rtcp: RwLock::new(None),
        })
    }

    pub fn subscriber_id(&self) -> &ParticipantId {
        &self.subscriber_id
    }

    pub fn track_id(&self) -> &TrackId {
        &self.upstream.track_id
    }

    pub fn codec(&self) -> &RTCRtpCodecCapability {
        &self.codec
    }

    pub fn kind(&self) -> TrackKind {
        self.upstream.kind
    }

    pub fn ssrc(&self) -> u32 {
        self.upstream.ssrc
    }

    pub fn packet_buffer_size(&self) -> usize {
        self.packet_buffer_size
    }

    pub fn bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // Hook registration. Each slot holds at most one hook; registering
    // again replaces the previous one.

    pub fn on_bind(&self, f: impl FnOnce() + Send + Sync + 'static) {
        *self.on_bind.lock() = Some(Box::new(f));
    }

    pub fn on_close(&self, f: impl FnOnce() + Send + Sync + 'static) {
        *self.on_close.lock() = Some(Box::new(f));
    }

    pub fn on_packet_sent(&self, f: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_packet_sent.write() = Some(Arc::new(f));
    }

    pub fn on_padding_sent(&self, f: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_padding_sent.write() = Some(Arc::new(f));
    }

    pub fn on_rtcp(&self, f: impl Fn(Vec<RtcpPacket>) + Send + Sync + 'static) {
        *self.on_rtcp.write() = Some(Arc::new(f));
    }

    /// Transport edge: the remote end accepted the track and the first
    /// packet can flow. Fires the bind hook exactly once.
    pub fn handle_bound(&self) {
        if self.is_closed() {
            return;
        }
        if self.bound.swap(true, Ordering::AcqRel) {
            return;
        }
        let hook = self.on_bind.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Transport edge: a media packet of `size` bytes went out.
    pub fn record_packet_sent(&self, size: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
        let hook = self.on_packet_sent.read().clone();
        if let Some(hook) = hook {
            hook(size);
        }
    }

    /// Transport edge: a padding packet of `size` bytes went out.
    pub fn record_padding_sent(&self, size: usize) {
        self.padding_bytes_sent
            .fetch_add(size as u64, Ordering::Relaxed);
        let hook = self.on_padding_sent.read().clone();
        if let Some(hook) = hook {
            hook(size);
        }
    }

    /// Transport edge: inbound RTCP from the subscriber.
    pub fn handle_rtcp(&self, packets: Vec<RtcpPacket>) {
        let hook = self.on_rtcp.read().clone();
        if let Some(hook) = hook {
            hook(packets);
        }
    }

    /// Stop the forwarder permanently. Idempotent; the close hook fires on
    /// the first call only. All hooks are dropped afterwards so the
    /// forwarder no longer pins the subscriber or the engine.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let hook = self.on_close.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        *self.on_bind.lock() = None;
        *self.on_packet_sent.write() = None;
        *self.on_padding_sent.write() = None;
        *self.on_rtcp.write() = None;
    }

    pub fn set_transceiver(&self, transceiver: Arc<dyn RtpTransceiver>) {
        *self.transceiver.write() = Some(transceiver);
    }

    /// Store the header extensions negotiated on the sender so outgoing
    /// packets can carry matching ids.
    pub fn set_rtp_header_extensions(
        &self,
        extensions: Vec<RTCRtpHeaderExtensionParameters>,
    ) {
        *self.header_extensions.write() = extensions;
    }

    pub fn rtp_header_extensions(&self) -> Vec<RTCRtpHeaderExtensionParameters> {
        self.header_extensions.read().clone()
    }

    /// Whether the forwarder should emit padding instead of media.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Ceiling on the spatial layer this forwarder selects from.
    pub fn set_max_spatial_layer(&self, layer: u8) {
        self.max_spatial_layer.store(layer, Ordering::Release);
    }

    pub fn max_spatial_layer(&self) -> u8 {
        self.max_spatial_layer.load(Ordering::Acquire)
    }

    /// SDES chunks identifying this forwarder's SSRC, per RFC 7941: a
    /// CNAME item carrying the stream id, plus a private item carrying the
    /// negotiated MID when one exists. `None` until the track is bound.
    pub fn create_source_description_chunks(&self) -> Option<Vec<SourceDescriptionChunk>> {
        if !self.bound() {
            return None;
        }

        let mut chunks = vec![SourceDescriptionChunk {
            source: self.upstream.ssrc,
            items: vec![SourceDescriptionItem {
                sdes_type: SdesType::SdesCname,
                text: Bytes::from(self.upstream.stream_id.clone()),
            }],
        }];

        let mid = self.transceiver.read().as_ref().and_then(|t| t.mid());
        if let Some(mid) = mid {
            chunks.push(SourceDescriptionChunk {
                source: self.upstream.ssrc,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::SdesPrivate,
                    text: Bytes::from(mid),
                }],
            });
        }

        Some(chunks)
    }

    pub fn debug_info(&self) -> DownTrackInfo {
        DownTrackInfo {
            subscriber_id: self.subscriber_id.clone(),
            track_id: self.upstream.track_id.clone(),
            mime_type: self.codec.mime_type.clone(),
            ssrc: self.upstream.ssrc,
            bound: self.bound(),
            closed: self.is_closed(),
            muted: self.muted(),
            max_spatial_layer: self.max_spatial_layer(),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            padding_bytes_sent: self.padding_bytes_sent.load(Ordering::Relaxed),
        }
    }
}
