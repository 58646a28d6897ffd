//! Normalized media units

use bytes::Bytes;
use chrono::{DateTime, Utc};
use mediarelay_core::RtpPacket;
use std::time::Duration;

/// Codec-specific content of a unit.
///
/// Units built from a single RTP packet start out empty; the processor fills
/// the payload in once enough packets have been decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Opaque data of a format without a dedicated processor
    Generic(Bytes),
    /// H.264 access unit, one entry per NAL unit
    H264(Vec<Bytes>),
    /// H.265 access unit, one entry per NAL unit
    H265(Vec<Bytes>),
    /// VP8 frame
    Vp8(Bytes),
    /// Opus packets, in presentation order
    Opus(Vec<Bytes>),
}

impl Payload {
    /// Name of the payload kind
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Generic(_) => "generic",
            Payload::H264(_) => "H264",
            Payload::H265(_) => "H265",
            Payload::Vp8(_) => "VP8",
            Payload::Opus(_) => "Opus",
        }
    }

    /// Whether no media has been decoded into the payload
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Generic(data) | Payload::Vp8(data) => data.is_empty(),
            Payload::H264(nalus) | Payload::H265(nalus) | Payload::Opus(nalus) => nalus.is_empty(),
        }
    }
}

/// A media sample on its way through a processor
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    /// RTP packets carrying the unit; empty for synthesized units until a
    /// processor generates them
    pub rtp_packets: Vec<RtpPacket>,
    /// Wall-clock time the unit was received
    pub ntp: DateTime<Utc>,
    /// Presentation time on the session clock
    pub pts: Duration,
    /// Codec content
    pub payload: Payload,
}

impl Unit {
    /// Unit built from media that did not arrive over RTP
    pub fn new(ntp: DateTime<Utc>, pts: Duration, payload: Payload) -> Self {
        Self {
            rtp_packets: Vec::new(),
            ntp,
            pts,
            payload,
        }
    }

    /// Unit wrapping one received RTP packet
    pub fn from_rtp_packet(
        packet: RtpPacket,
        ntp: DateTime<Utc>,
        pts: Duration,
        payload: Payload,
    ) -> Self {
        Self {
            rtp_packets: vec![packet],
            ntp,
            pts,
            payload,
        }
    }

    /// Whether the unit carries RTP packets
    pub fn has_rtp_packets(&self) -> bool {
        !self.rtp_packets.is_empty()
    }
}
