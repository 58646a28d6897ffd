use super::{set_timestamp, unexpected_payload, Processor};
use crate::codecs::h264::{
    split_stap_a, H264Decoder, H264Encoder, NaluType, MAX_NALUS_PER_ACCESS_UNIT,
};
use crate::codecs::PacketSequencer;
use crate::config::ProcessorConfig;
use crate::error::{MediaError, MediaResult};
use crate::format::{H264Format, VIDEO_CLOCK_RATE};
use crate::unit::{Payload, Unit};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use mediarelay_core::{RtpPacket, RTP_HEADER_SIZE};
use std::time::Duration;

/// H.264 processor.
///
/// Keeps the latest SPS and PPS seen in the stream so that every IDR frame it
/// emits is self-contained. Received packets are routed untouched unless one
/// of them is too big for the configured payload size; from then on the whole
/// stream is re-packetized.
#[derive(Debug)]
pub struct H264Processor {
    udp_max_payload_size: usize,
    payload_type: u8,
    packetization_mode: u8,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    decoder: Option<H264Decoder>,
    encoder: Option<H264Encoder>,
}

impl H264Processor {
    /// Create a processor for `format`
    pub fn new(config: &ProcessorConfig, format: &H264Format) -> Self {
        let max_payload_size = config.max_rtp_payload_size();
        let encoder = config.generate_rtp_packets.then(|| {
            H264Encoder::new(
                PacketSequencer::new(format.payload_type),
                max_payload_size,
                format.packetization_mode,
            )
        });

        Self {
            udp_max_payload_size: config.udp_max_payload_size,
            payload_type: format.payload_type,
            packetization_mode: format.packetization_mode,
            sps: format.sps.clone(),
            pps: format.pps.clone(),
            decoder: None,
            encoder,
        }
    }

    fn update_parameter(&mut self, nalu: &Bytes) {
        let slot = match NaluType::from_header(nalu[0]) {
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
            NaluType::Sps | NaluType::Pps => self.update_parameter(&packet.payload),
            NaluType::StapA => {
                // Malformed aggregates are reported by the decoder
                if let Ok(nalus) = split_stap_a(&packet.payload) {
                    for nalu in &nalus {
                        self.update_parameter(nalu);
                    }
                }
            }
            _ => {}
        }
    }

    fn update_parameters_from_access_unit(&mut self, au: &[Bytes]) {
        for nalu in au {
            self.update_parameter(nalu);
        }
    }

    /// Strip delimiters and parameter sets, then put the current parameter
    /// sets back in front of the first IDR slice.
    fn remux_access_unit(&self, au: Vec<Bytes>) -> Vec<Bytes> {
        let mut is_key_frame = false;
        let mut filtered = Vec::with_capacity(au.len() + 2);

        for nalu in au {
            match NaluType::from_header(nalu[0]) {
                NaluType::Sps | NaluType::Pps | NaluType::AccessUnitDelimiter => continue,
                NaluType::Idr if !is_key_frame => {
                    is_key_frame = true;
                    if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                        filtered.push(sps.clone());
                        filtered.push(pps.clone());
                    }
                }
                _ => {}
            }
            filtered.push(nalu);
        }

        filtered
    }

    /// Continue the received stream (same SSRC, next sequence numbers) with
    /// packets of our own.
    fn start_reencoding(&mut self, original: &RtpPacket) {
        let max_payload_size = self.udp_max_payload_size - RTP_HEADER_SIZE;
        tracing::debug!(
            "RTP packets are too big (> {} bytes), remuxing them into smaller ones",
            max_payload_size
        );
        self.encoder = Some(H264Encoder::new(
            PacketSequencer::with_state(
                self.payload_type,
                original.header.ssrc,
                original.header.sequence_number,
            ),
            max_payload_size,
            self.packetization_mode,
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
    if au.iter().any(Bytes::is_empty) {
        return Err(MediaError::malformed("H264", "access unit contains an empty NAL unit"));
    }
    Ok(())
}

impl Processor for H264Processor {
    fn process(&mut self, unit: &mut Unit, has_non_rtsp_readers: bool) -> MediaResult<()> {
        if !matches!(unit.payload, Payload::H264(_)) {
            return Err(unexpected_payload("H264", unit));
        }
        let Unit {
            rtp_packets,
            pts,
            payload,
            ..
        } = unit;
        let Payload::H264(au) = payload else {
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

            // Once started, reassembly continues so no fragment is left behind
            if !has_non_rtsp_readers && self.decoder.is_none() && self.encoder.is_none() {
                return Ok(());
            }

            let decoded = self
                .decoder
                .get_or_insert_with(H264Decoder::new)
                .decode_until_marker(packet);

            if self.encoder.is_some() {
                // Replaced by the re-encoded packets once the access unit completes
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
            self.update_parameters_from_access_unit(au);
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
        Unit::from_rtp_packet(packet, ntp, pts, Payload::H264(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::h264::{FU_END, FU_START};
    use mediarelay_core::RtpHeader;

    const SPS: &[u8] = &[0x67, 0x42, 0xc0, 0x1f];
    const PPS: &[u8] = &[0x68, 0xce, 0x3c, 0x80];

    fn packet(seq: u16, marker: bool, payload: Vec<u8>) -> RtpPacket {
        let mut header = RtpHeader::new(96, seq, 0x1234_5678, 0xcafe_babe);
        header.marker = marker;
        RtpPacket::new(header, Bytes::from(payload))
    }

    fn processor(generate_rtp_packets: bool) -> H264Processor {
        let config = ProcessorConfig {
            generate_rtp_packets,
            ..Default::default()
        };
        H264Processor::new(&config, &H264Format::new(96))
    }

    fn process_packet(
        processor: &mut H264Processor,
        packet: RtpPacket,
        has_non_rtsp_readers: bool,
    ) -> MediaResult<Unit> {
        let mut unit = processor.unit_for_rtp_packet(packet, Utc::now(), Duration::from_secs(1));
        processor.process(&mut unit, has_non_rtsp_readers)?;
        Ok(unit)
    }

    #[test]
    fn test_routes_packets_without_decoding() {
        let mut processor = processor(false);
        let unit = process_packet(&mut processor, packet(1, true, vec![0x65, 0x88]), false).unwrap();

        assert_eq!(unit.rtp_packets.len(), 1);
        assert_eq!(unit.payload, Payload::H264(Vec::new()));
    }

    #[test]
    fn test_decodes_and_remuxes_for_non_rtsp_readers() {
        let mut processor = processor(false);

        let stap_a = vec![0x78, 0x00, 0x04, 0x67, 0x42, 0xc0, 0x1f, 0x00, 0x04, 0x68, 0xce, 0x3c, 0x80];
        let unit = process_packet(&mut processor, packet(1, false, stap_a), true).unwrap();
        assert!(unit.payload.is_empty());

        let unit = process_packet(&mut processor, packet(2, false, vec![0x09, 0xf0]), true).unwrap();
        assert!(unit.payload.is_empty());

        let unit = process_packet(&mut processor, packet(3, true, vec![0x65, 0x88]), true).unwrap();
        assert_eq!(
            unit.payload,
            Payload::H264(vec![
                Bytes::from_static(SPS),
                Bytes::from_static(PPS),
                Bytes::from_static(&[0x65, 0x88]),
            ])
        );
        assert_eq!(unit.rtp_packets.len(), 1);
    }

    #[test]
    fn test_toggling_readers_keeps_access_units_apart() {
        let mut processor = processor(false);

        let unit = process_packet(&mut processor, packet(1, false, vec![0x65, 0xaa]), true).unwrap();
        assert!(unit.payload.is_empty());

        let unit = process_packet(&mut processor, packet(2, true, vec![0x65, 0xbb]), false).unwrap();
        assert_eq!(
            unit.payload,
            Payload::H264(vec![Bytes::from_static(&[0x65, 0xaa]), Bytes::from_static(&[0x65, 0xbb])])
        );

        let unit = process_packet(&mut processor, packet(3, true, vec![0x41, 0xcc]), true).unwrap();
        assert_eq!(unit.payload, Payload::H264(vec![Bytes::from_static(&[0x41, 0xcc])]));
        assert_eq!(unit.rtp_packets.len(), 1);
    }

    #[test]
    fn test_non_starting_fragment_is_skipped() {
        let mut processor = processor(false);
        let unit = process_packet(&mut processor, packet(1, true, vec![0x7c, FU_END | 5, 1]), true);
        assert!(unit.unwrap().payload.is_empty());
    }

    #[test]
    fn test_malformed_packet_fails() {
        let mut processor = processor(false);
        let result = process_packet(&mut processor, packet(1, true, vec![0x78, 0x00, 0x09]), true);
        assert!(matches!(result, Err(MediaError::MalformedPayload { .. })));
    }

    #[test]
    fn test_oversized_packet_switches_to_reencoding() {
        let mut processor = processor(false);
        let mut nalu = vec![0x65];
        nalu.extend(std::iter::repeat(0xab).take(3000));

        let unit = process_packet(&mut processor, packet(500, true, nalu.clone()), false).unwrap();

        assert!(unit.rtp_packets.len() >= 3);
        for (i, out) in unit.rtp_packets.iter().enumerate() {
            assert!(out.marshal_size() <= 1472);
            assert_eq!(out.header.timestamp, 0x1234_5678);
            assert_eq!(out.header.ssrc, 0xcafe_babe);
            assert_eq!(out.header.sequence_number, 500 + i as u16);
        }
        assert_eq!(unit.rtp_packets[0].payload[1] & FU_START, FU_START);
        assert!(unit.rtp_packets.last().unwrap().header.marker);

        // Small packets are re-encoded too from now on
        let unit = process_packet(&mut processor, packet(501, true, vec![0x41, 0x9a]), false).unwrap();
        assert_eq!(unit.rtp_packets.len(), 1);
        assert_eq!(unit.rtp_packets[0].header.sequence_number, 500 + 3);
    }

    #[test]
    fn test_reencoding_waits_for_complete_access_unit() {
        let mut processor = processor(false);
        let big = {
            let mut nalu = vec![0x65];
            nalu.extend(std::iter::repeat(0x11).take(2000));
            nalu
        };

        let unit = process_packet(&mut processor, packet(1, false, big), false).unwrap();
        assert!(unit.rtp_packets.is_empty());

        let unit = process_packet(&mut processor, packet(2, true, vec![0x41, 0x01]), false).unwrap();
        assert!(!unit.rtp_packets.is_empty());
        assert!(unit.rtp_packets.iter().all(|p| p.header.timestamp == 0x1234_5678));
    }

    #[test]
    fn test_synthesized_access_unit() {
        let mut processor = processor(true);
        let mut unit = Unit::new(
            Utc::now(),
            Duration::from_millis(1500),
            Payload::H264(vec![
                Bytes::from_static(&[0x09, 0xf0]),
                Bytes::from_static(SPS),
                Bytes::from_static(PPS),
                Bytes::from_static(&[0x65, 0x88, 0x80]),
            ]),
        );
        processor.process(&mut unit, false).unwrap();

        assert_eq!(
            unit.payload,
            Payload::H264(vec![
                Bytes::from_static(SPS),
                Bytes::from_static(PPS),
                Bytes::from_static(&[0x65, 0x88, 0x80]),
            ])
        );
        assert_eq!(unit.rtp_packets.len(), 1);
        assert_eq!(unit.rtp_packets[0].header.timestamp, 135_000);
        assert!(unit.rtp_packets[0].header.marker);
    }

    #[test]
    fn test_synthesized_access_unit_with_empty_nalu() {
        let mut processor = processor(true);
        let mut unit = Unit::new(
            Utc::now(),
            Duration::ZERO,
            Payload::H264(vec![Bytes::new()]),
        );
        assert!(processor.process(&mut unit, false).is_err());
    }

    #[test]
    fn test_parameter_sets_from_format() {
        let config = ProcessorConfig::default();
        let mut format = H264Format::new(96);
        format.sps = Some(Bytes::from_static(SPS));
        format.pps = Some(Bytes::from_static(PPS));
        let processor = H264Processor::new(&config, &format);

        let au = processor.remux_access_unit(vec![
            Bytes::from_static(&[0x65, 0x01]),
            Bytes::from_static(&[0x65, 0x02]),
        ]);
        assert_eq!(au.len(), 4);
        assert_eq!(&au[0][..], SPS);
        assert_eq!(&au[3][..], &[0x65, 0x02]);
    }
}
