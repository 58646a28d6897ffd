use super::{check_forwarded_packet, set_timestamp, unexpected_payload, Processor};
use crate::codecs::opus::{self, OpusEncoder};
use crate::codecs::PacketSequencer;
use crate::config::ProcessorConfig;
use crate::error::MediaResult;
use crate::format::{OpusFormat, OPUS_CLOCK_RATE};
use crate::unit::{Payload, Unit};
use chrono::{DateTime, Utc};
use mediarelay_core::RtpPacket;
use std::time::Duration;

/// Opus processor.
///
/// A synthesized unit may hold several Opus packets; each one becomes its own
/// RTP packet, timestamped at the end of the audio preceding it.
#[derive(Debug)]
pub struct OpusProcessor {
    udp_max_payload_size: usize,
    encoder: Option<OpusEncoder>,
}

impl OpusProcessor {
    /// Create a processor for `format`
    pub fn new(config: &ProcessorConfig, format: &OpusFormat) -> Self {
        let max_payload_size = config.max_rtp_payload_size();
        Self {
            udp_max_payload_size: config.udp_max_payload_size,
            encoder: config.generate_rtp_packets.then(|| {
                OpusEncoder::new(PacketSequencer::new(format.payload_type), max_payload_size)
            }),
        }
    }
}

impl Processor for OpusProcessor {
    fn process(&mut self, unit: &mut Unit, has_non_rtsp_readers: bool) -> MediaResult<()> {
        if !matches!(unit.payload, Payload::Opus(_)) {
            return Err(unexpected_payload("Opus", unit));
        }
        let Unit {
            rtp_packets,
            pts,
            payload,
            ..
        } = unit;
        let Payload::Opus(packets) = payload else {
            return Ok(());
        };

        if let Some(packet) = rtp_packets.first_mut() {
            check_forwarded_packet(packet, self.udp_max_payload_size)?;

            if has_non_rtsp_readers {
                *packets = vec![opus::decode(packet)?];
            }
            return Ok(());
        }

        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };

        // A rejected unit must not consume sequence numbers
        let durations = packets
            .iter()
            .map(|opus_packet| encoder.check(opus_packet))
            .collect::<MediaResult<Vec<_>>>()?;

        let mut generated = Vec::with_capacity(packets.len());
        let mut packet_pts = *pts;
        for (opus_packet, duration) in packets.iter().zip(durations) {
            let mut rtp = encoder.encode(opus_packet)?;
            set_timestamp(std::slice::from_mut(&mut rtp), rtp_packets, OPUS_CLOCK_RATE, packet_pts);
            generated.push(rtp);
            packet_pts += duration;
        }
        *rtp_packets = generated;
        Ok(())
    }

    fn unit_for_rtp_packet(&self, packet: RtpPacket, ntp: DateTime<Utc>, pts: Duration) -> Unit {
        Unit::from_rtp_packet(packet, ntp, pts, Payload::Opus(Vec::new()))
    }
}
