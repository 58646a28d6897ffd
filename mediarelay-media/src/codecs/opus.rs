//! Opus RTP payload format (RFC 7587)
//!
//! Every RTP packet carries exactly one Opus packet. The packet duration is
//! read from the TOC byte (RFC 6716, section 3.1).

use super::PacketSequencer;
use crate::error::{MediaError, MediaResult};
use bytes::Bytes;
use mediarelay_core::RtpPacket;
use std::time::Duration;

const CODEC: &str = "Opus";

/// Longest duration a single Opus packet may cover
pub const MAX_PACKET_DURATION: Duration = Duration::from_millis(120);

fn frame_duration(config: u8) -> Duration {
    match config {
        // SILK-only
        0..=11 => Duration::from_millis([10, 20, 40, 60][(config % 4) as usize]),
        // Hybrid
        12..=15 => Duration::from_millis([10, 20][(config % 2) as usize]),
        // CELT-only
        _ => Duration::from_micros([2_500, 5_000, 10_000, 20_000][(config % 4) as usize]),
    }
}

/// Duration of the audio carried by one Opus packet
pub fn packet_duration(packet: &[u8]) -> MediaResult<Duration> {
    let Some(&toc) = packet.first() else {
        return Err(MediaError::malformed(CODEC, "packet is empty"));
    };

    let frames = match toc & 0x03 {
        0 => 1,
        1 | 2 => 2,
        _ => {
            let Some(&count) = packet.get(1) else {
                return Err(MediaError::malformed(CODEC, "missing frame count byte"));
            };
            let count = count & 0x3F;
            if count == 0 {
                return Err(MediaError::malformed(CODEC, "frame count is zero"));
            }
            count as u32
        }
    };

    let duration = frame_duration(toc >> 3) * frames;
    if duration > MAX_PACKET_DURATION {
        return Err(MediaError::malformed(
            CODEC,
            format!("packet duration {:?} exceeds {:?}", duration, MAX_PACKET_DURATION),
        ));
    }
    Ok(duration)
}

/// Extract the Opus packet carried by an RTP packet
pub fn decode(packet: &RtpPacket) -> MediaResult<Bytes> {
    packet_duration(&packet.payload)?;
    Ok(packet.payload.clone())
}

/// Wraps Opus packets into RTP packets
#[derive(Debug)]
pub struct OpusEncoder {
    sequencer: PacketSequencer,
    max_payload_size: usize,
}

impl OpusEncoder {
    /// Create an encoder emitting payloads of at most `max_payload_size` bytes
    pub fn new(sequencer: PacketSequencer, max_payload_size: usize) -> Self {
        Self {
            sequencer,
            max_payload_size,
        }
    }

    /// Check that `packet` can be wrapped, returning its duration
    pub fn check(&self, packet: &[u8]) -> MediaResult<Duration> {
        if packet.len() > self.max_payload_size {
            return Err(MediaError::PayloadTooBig {
                size: packet.len(),
                max: self.max_payload_size,
            });
        }
        packet_duration(packet)
    }

    /// Wrap one Opus packet. The timestamp is left at zero.
    pub fn encode(&mut self, packet: &Bytes) -> MediaResult<RtpPacket> {
        self.check(packet)?;
        Ok(self.sequencer.next_packet(packet.clone(), false))
    }
}
