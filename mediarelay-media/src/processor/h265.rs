use super::{set_timestamp, unexpected_payload, Processor};
use crate::codecs::h264::MAX_NALUS_PER_ACCESS_UNIT;
use crate::codecs::h265::{
    split_aggregation_packet, H265Decoder, H265Encoder, NaluType, NALU_HEADER_SIZE,
};
use crate::codecs::PacketSequencer;
use crate::config::ProcessorConfig;
use crate::error::{MediaError, MediaResult};
use crate::format::{H265Format, VIDEO_CLOCK_RATE};
use crate::unit::{Payload, Unit};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use mediarelay_core::{RtpPacket, RTP_HEADER_SIZE};
use std::time::Duration;

/// H.265 processor.
///
/// Tracks the latest VPS, SPS and PPS and puts them in front of every IRAP
/// picture it emits. Like H.264, received packets are routed untouched until
/// one exceeds the payload size limit; after that the stream is
/// re-packetized.
#[derive(Debug)]
pub struct H265Processor {
    udp_max_payload_size: usize,
    payload_type: u8,
    vps: Option<Bytes>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    decoder: Option<H265Decoder>,
    encoder: Option<H265Encoder>,
}

impl H265Processor {
    /// Create a processor for `format`
    pub fn new(config: &ProcessorConfig, format: &H265Format) -> Self {
        let max_payload_size = config.max_rtp_payload_size();
        Self {
            udp_max_payload_size: config.udp_max_payload_size,
            payload_type: format.payload_type,
            vps: format.vps.clone(),
            sps: format.sps.clone(),
            pps: format.pps.clone(),
            decoder: None,
            encoder: config.generate_rtp_packets.then(|| {
                H265Encoder::new(PacketSequencer::new(format.payload_type), max_payload_size)
            }),
        }
    }

    fn update_parameter(&mut self, nalu: &Bytes) {
        let Some(&header) = nalu.first() else {
            return;
        };
        let slot = match NaluType::from_header(header) {
            NaluType::Vps => &mut self.vps,
            NaluType::Sps => &mut self.sps,
            NaluType::Pps => &mut self.pps,
            _ => return,
        };
        if slot.as_ref() != Some(nalu) {
            *slot = Some(nalu.clone());
        }
    }

    fn update_parameters_from_packet(&mut self, packet: &RtpPacket) {
        let Some(&header) = packet.payload.first() else {
            return;
        };
        match NaluType::from_header(header) {
            NaluType::Vps | NaluType::Sps | NaluType::Pps => self.update_parameter(&packet.payload),
            NaluType::Aggregation => {
                if let Ok(nalus) = split_aggregation_packet(&packet.payload) {
                    for nalu in &nalus {
                        self.update_parameter(nalu);
                    }
                }
            }
            _ => {}
        }
    }

    /// Strip delimiters and parameter sets, then put the current parameter
    /// sets back in front of the first IRAP slice.
    fn remux_access_unit(&self, au: Vec<Bytes>) -> Vec<Bytes> {
        let mut is_random_access = false;
        let mut filtered = Vec::with_capacity(au.len() + 3);

        for nalu in au {
            match NaluType::from_header(nalu[0]) {
                NaluType::Vps
                | NaluType::Sps
                | NaluType::Pps
                | NaluType::AccessUnitDelimiter => continue,
                NaluType::Irap(_) if !is_random_access => {
                    is_random_access = true;
                    if let (Some(vps), Some(sps), Some(pps)) = (&self.vps, &self.sps, &self.pps) {
                        filtered.extend([vps.clone(), sps.clone(), pps.clone()]);
                    }
                }
                _ => {}
            }
            filtered.push(nalu);
        }

        filtered
    }

    fn start_reencoding(&mut self, original: &RtpPacket) {
        let max_payload_size = self.udp_max_payload_size - RTP_HEADER_SIZE;
        tracing::debug!(
            "RTP packets are too big (> {} bytes), remuxing them into smaller ones",
            max_payload_size
        );
        self.encoder = Some(H265Encoder::new(
            PacketSequencer::with_state(
                self.payload_type,
                original.header.ssrc,
                original.header.sequence_number,
            ),
            max_payload_size,
        ));
    }
}

fn validate_access_unit(au: &[Bytes]) -> MediaResult<()> {
    if au.len() > MAX_NALUS_PER_ACCESS_UNIT {
        return Err(MediaError::TooManyNalUnits {
            count: au.len(),
            max: MAX_NALUS_PER_ACCESS_UNIT,
        });
    }
    if au.iter().any(|nalu| nalu.len() < NALU_HEADER_SIZE) {
        return Err(MediaError::malformed(
            "H265",
            "access unit contains a NAL unit shorter than its header",
        ));
    }
    Ok(())
}

impl Processor for H265Processor {
    fn process(&mut self, unit: &mut Unit, has_non_rtsp_readers: bool) -> MediaResult<()> {
        if !matches!(unit.payload, Payload::H265(_)) {
            return Err(unexpected_payload("H265", unit));
        }
        let Unit {
            rtp_packets,
            pts,
            payload,
            ..
        } = unit;
        let Payload::H265(au) = payload else {
            return Ok(());
        };

        let mut originals = Vec::new();

        if let Some(packet) = rtp_packets.first_mut() {
            self.update_parameters_from_packet(packet);

            if self.encoder.is_none() {
                packet.remove_padding();
                if packet.marshal_size() > self.udp_max_payload_size {
                    self.start_reencoding(packet);
                }
            }

            if !has_non_rtsp_readers && self.decoder.is_none() && self.encoder.is_none() {
                return Ok(());
            }

            let decoded = self
                .decoder
                .get_or_insert_with(H265Decoder::new)
                .decode_until_marker(packet);

            if self.encoder.is_some() {
                originals = std::mem::take(rtp_packets);
            }

            match decoded? {
                Some(nalus) => *au = self.remux_access_unit(nalus),
                None => return Ok(()),
            }

            if self.encoder.is_none() {
                return Ok(());
            }
        } else {
            validate_access_unit(au)?;
            for nalu in au.iter() {
                self.update_parameter(nalu);
            }
            *au = self.remux_access_unit(std::mem::take(au));
        }

        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };
        if au.is_empty() {
            return Ok(());
        }

        let mut packets = encoder.encode(au)?;
        set_timestamp(&mut packets, &originals, VIDEO_CLOCK_RATE, *pts);
        *rtp_packets = packets;
        Ok(())
    }

    fn unit_for_rtp_packet(&self, packet: RtpPacket, ntp: DateTime<Utc>, pts: Duration) -> Unit {
        Unit::from_rtp_packet(packet, ntp, pts, Payload::H265(Vec::new()))
    }
}
