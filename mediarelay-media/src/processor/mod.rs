//! Per-codec unit processors
//!
//! A processor is created once per track by [`new_processor`] and normalizes
//! every unit of that track: it validates or repacks the codec payload and
//! makes sure the RTP packets leaving it carry the right timestamp.

mod generic;
#[cfg(feature = "h264")]
mod h264;
#[cfg(feature = "h265")]
mod h265;
#[cfg(feature = "opus")]
mod opus;
#[cfg(feature = "vp8")]
mod vp8;

pub use generic::GenericProcessor;
#[cfg(feature = "h264")]
pub use h264::H264Processor;
#[cfg(feature = "h265")]
pub use h265::H265Processor;
#[cfg(feature = "opus")]
pub use opus::OpusProcessor;
#[cfg(feature = "vp8")]
pub use vp8::Vp8Processor;

use crate::config::ProcessorConfig;
use crate::error::{MediaError, MediaResult};
use crate::format::Format;
use crate::unit::Unit;
use chrono::{DateTime, Utc};
use mediarelay_core::{duration_to_ticks, RtpPacket};
use std::fmt;
use std::time::Duration;

/// Normalizes the units of one track
pub trait Processor: Send + fmt::Debug {
    /// Normalize a unit in place.
    ///
    /// `has_non_rtsp_readers` tells whether anyone needs the decoded payload;
    /// when nobody does, RTP packets may be routed as they are.
    fn process(&mut self, unit: &mut Unit, has_non_rtsp_readers: bool) -> MediaResult<()>;

    /// Wrap a received RTP packet into this codec's unit type. The payload
    /// buffer is shared with the packet, not copied.
    fn unit_for_rtp_packet(&self, packet: RtpPacket, ntp: DateTime<Utc>, pts: Duration) -> Unit;
}

/// Create the processor for a track format.
///
/// Formats without a dedicated processor, or whose codec feature is disabled,
/// get a [`GenericProcessor`].
pub fn new_processor(
    config: &ProcessorConfig,
    format: &Format,
) -> MediaResult<Box<dyn Processor>> {
    config.validate()?;

    let processor: Box<dyn Processor> = match format {
        #[cfg(feature = "h264")]
        Format::H264(h264) => Box::new(H264Processor::new(config, h264)),
        #[cfg(feature = "h265")]
        Format::H265(h265) => Box::new(H265Processor::new(config, h265)),
        #[cfg(feature = "vp8")]
        Format::Vp8(vp8) => Box::new(Vp8Processor::new(config, vp8)),
        #[cfg(feature = "opus")]
        Format::Opus(opus) => Box::new(OpusProcessor::new(config, opus)),
        _ => Box::new(GenericProcessor::new(config, format)),
    };
    tracing::debug!("created {:?} for {} track", processor, format.codec());
    Ok(processor)
}

/// Assign RTP timestamps to freshly generated packets.
///
/// Packets that replace received ones keep the timestamp of the first
/// received packet, bit for bit. Otherwise the timestamp is derived from the
/// presentation time; the conversion is exact modulo 2^32, so it cannot
/// overflow however large `pts` gets.
pub fn set_timestamp(
    new_packets: &mut [RtpPacket],
    old_packets: &[RtpPacket],
    clock_rate: u32,
    pts: Duration,
) {
    let timestamp = match old_packets.first() {
        Some(original) => original.header.timestamp,
        None => duration_to_ticks(pts, clock_rate) as u32,
    };
    for packet in new_packets {
        packet.header.timestamp = timestamp;
    }
}

/// Drop padding from a forwarded packet and check it still fits the limit
pub(crate) fn check_forwarded_packet(
    packet: &mut RtpPacket,
    udp_max_payload_size: usize,
) -> MediaResult<()> {
    packet.remove_padding();
    let size = packet.marshal_size();
    if size > udp_max_payload_size {
        return Err(MediaError::PayloadTooBig {
            size,
            max: udp_max_payload_size,
        });
    }
    Ok(())
}

pub(crate) fn unexpected_payload(expected: &str, unit: &Unit) -> MediaError {
    MediaError::InvalidUnit {
        expected: expected.to_string(),
        actual: unit.payload.kind().to_string(),
    }
}
