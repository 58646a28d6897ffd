use super::{check_forwarded_packet, set_timestamp, unexpected_payload, Processor};
use crate::codecs::PacketSequencer;
use crate::config::ProcessorConfig;
use crate::error::MediaResult;
use crate::format::Format;
use crate::unit::{Payload, Unit};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use mediarelay_core::RtpPacket;
use std::time::Duration;

/// Processor for formats the relay does not look into
#[derive(Debug)]
pub struct GenericProcessor {
    udp_max_payload_size: usize,
    clock_rate: u32,
    sequencer: Option<PacketSequencer>,
}

impl GenericProcessor {
    /// Create a processor for `format`
    pub fn new(config: &ProcessorConfig, format: &Format) -> Self {
        Self {
            udp_max_payload_size: config.udp_max_payload_size,
            clock_rate: format.clock_rate(),
            sequencer: config
                .generate_rtp_packets
                .then(|| PacketSequencer::new(format.payload_type())),
        }
    }
}

impl Processor for GenericProcessor {
    fn process(&mut self, unit: &mut Unit, _has_non_rtsp_readers: bool) -> MediaResult<()> {
        let Payload::Generic(data) = &unit.payload else {
            return Err(unexpected_payload("generic", unit));
        };

        if let Some(packet) = unit.rtp_packets.first_mut() {
            return check_forwarded_packet(packet, self.udp_max_payload_size);
        }

        let Some(sequencer) = self.sequencer.as_mut() else {
            return Ok(());
        };
        if data.is_empty() {
            return Ok(());
        }

        let mut packets = vec![sequencer.next_packet(data.clone(), true)];
        check_forwarded_packet(&mut packets[0], self.udp_max_payload_size)?;
        set_timestamp(&mut packets, &unit.rtp_packets, self.clock_rate, unit.pts);
        unit.rtp_packets = packets;
        Ok(())
    }

    fn unit_for_rtp_packet(&self, packet: RtpPacket, ntp: DateTime<Utc>, pts: Duration) -> Unit {
        Unit::from_rtp_packet(packet, ntp, pts, Payload::Generic(Bytes::new()))
    }
}
