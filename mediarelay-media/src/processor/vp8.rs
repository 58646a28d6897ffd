use super::{check_forwarded_packet, set_timestamp, unexpected_payload, Processor};
use crate::codecs::vp8::{Vp8Decoder, Vp8Encoder};
use crate::codecs::PacketSequencer;
use crate::config::ProcessorConfig;
use crate::error::MediaResult;
use crate::format::{Vp8Format, VIDEO_CLOCK_RATE};
use crate::unit::{Payload, Unit};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use mediarelay_core::RtpPacket;
use std::time::Duration;

/// VP8 processor
#[derive(Debug)]
pub struct Vp8Processor {
    udp_max_payload_size: usize,
    decoder: Option<Vp8Decoder>,
    encoder: Option<Vp8Encoder>,
}

impl Vp8Processor {
    /// Create a processor for `format`
    pub fn new(config: &ProcessorConfig, format: &Vp8Format) -> Self {
        let max_payload_size = config.max_rtp_payload_size();
        Self {
            udp_max_payload_size: config.udp_max_payload_size,
            decoder: None,
            encoder: config.generate_rtp_packets.then(|| {
                Vp8Encoder::new(PacketSequencer::new(format.payload_type), max_payload_size)
            }),
        }
    }
}

impl Processor for Vp8Processor {
    fn process(&mut self, unit: &mut Unit, has_non_rtsp_readers: bool) -> MediaResult<()> {
        if !matches!(unit.payload, Payload::Vp8(_)) {
            return Err(unexpected_payload("VP8", unit));
        }
        let Unit {
            rtp_packets,
            pts,
            payload,
            ..
        } = unit;
        let Payload::Vp8(frame) = payload else {
            return Ok(());
        };

        if let Some(packet) = rtp_packets.first_mut() {
            check_forwarded_packet(packet, self.udp_max_payload_size)?;

            if has_non_rtsp_readers || self.decoder.is_some() {
                let decoder = self.decoder.get_or_insert_with(Vp8Decoder::new);
                if let Some(decoded) = decoder.decode(packet)? {
                    *frame = decoded;
                }
            }
            return Ok(());
        }

        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };
        let mut packets = encoder.encode(frame)?;
        set_timestamp(&mut packets, rtp_packets, VIDEO_CLOCK_RATE, *pts);
        *rtp_packets = packets;
        Ok(())
    }

    fn unit_for_rtp_packet(&self, packet: RtpPacket, ntp: DateTime<Utc>, pts: Duration) -> Unit {
        Unit::from_rtp_packet(packet, ntp, pts, Payload::Vp8(Bytes::new()))
    }
}
