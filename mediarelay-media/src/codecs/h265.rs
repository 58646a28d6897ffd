//! H.265 RTP payload format (RFC 7798)
//!
//! Same framing model as H.264 with two-byte NAL headers: single NAL unit
//! packets, aggregation packets (AP) and fragmentation units (FU). DONL
//! fields are not supported (`sprop-max-don-diff` must be zero).

use super::h264::{FU_END, FU_START, MAX_ACCESS_UNIT_SIZE, MAX_NALUS_PER_ACCESS_UNIT};
use super::PacketSequencer;
use crate::error::{MediaError, MediaResult};
use bytes::{BufMut, Bytes, BytesMut};
use mediarelay_core::RtpPacket;

const CODEC: &str = "H265";

/// Size of the NAL unit header
pub const NALU_HEADER_SIZE: usize = 2;

/// NAL unit type, from bits 1 to 6 of the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Coded slice of a non-IRAP picture (types 0 to 15)
    Slice(u8),
    /// Coded slice of an IRAP picture: BLA, IDR or CRA (types 16 to 21)
    Irap(u8),
    /// Video parameter set
    Vps,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Access unit delimiter
    AccessUnitDelimiter,
    /// Aggregation packet
    Aggregation,
    /// Fragmentation unit
    Fragmentation,
    /// Payload content information
    Paci,
    /// Any other type
    Other(u8),
}

impl NaluType {
    /// Type of a NAL unit given its first byte
    pub fn from_header(header: u8) -> Self {
        match (header >> 1) & 0x3F {
            typ @ 0..=15 => NaluType::Slice(typ),
            typ @ 16..=21 => NaluType::Irap(typ),
            32 => NaluType::Vps,
            33 => NaluType::Sps,
            34 => NaluType::Pps,
            35 => NaluType::AccessUnitDelimiter,
            48 => NaluType::Aggregation,
            49 => NaluType::Fragmentation,
            50 => NaluType::Paci,
            other => NaluType::Other(other),
        }
    }

    /// Numeric value of the type
    pub fn value(self) -> u8 {
        match self {
            NaluType::Slice(value) | NaluType::Irap(value) | NaluType::Other(value) => value,
            NaluType::Vps => 32,
            NaluType::Sps => 33,
            NaluType::Pps => 34,
            NaluType::AccessUnitDelimiter => 35,
            NaluType::Aggregation => 48,
            NaluType::Fragmentation => 49,
            NaluType::Paci => 50,
        }
    }

    /// Whether decoding can start at this NAL unit, or at the parameter sets
    /// sent in front of it
    pub fn is_random_access(self) -> bool {
        matches!(
            self,
            NaluType::Irap(_) | NaluType::Vps | NaluType::Sps | NaluType::Pps
        )
    }
}

/// Split an aggregation packet (payload header included) into its NAL units
pub fn split_aggregation_packet(payload: &Bytes) -> MediaResult<Vec<Bytes>> {
    let mut nalus = Vec::new();
    let mut offset = NALU_HEADER_SIZE;

    while offset < payload.len() {
        if payload.len() - offset < 2 {
            return Err(MediaError::malformed(CODEC, "invalid aggregation packet (invalid size)"));
        }
        let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
        offset += 2;

        if size < NALU_HEADER_SIZE || size > payload.len() - offset {
            return Err(MediaError::malformed(CODEC, "invalid aggregation packet (invalid size)"));
        }
        nalus.push(payload.slice(offset..offset + size));
        offset += size;
    }

    if nalus.is_empty() {
        return Err(MediaError::malformed(
            CODEC,
            "aggregation packet doesn't contain any NALU",
        ));
    }
    Ok(nalus)
}

/// Reassembles access units from RTP packets
#[derive(Debug, Default)]
pub struct H265Decoder {
    fragments: Option<BytesMut>,
    frame: Vec<Bytes>,
    frame_size: usize,
    first_packet_received: bool,
}

impl H265Decoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the NAL units carried by one packet.
    ///
    /// Returns `Ok(None)` while a fragmentation is still in progress, and for
    /// continuation fragments received before any starting packet.
    pub fn decode(&mut self, packet: &RtpPacket) -> MediaResult<Option<Vec<Bytes>>> {
        let payload = &packet.payload;
        if payload.len() < NALU_HEADER_SIZE {
            self.fragments = None;
            return Err(MediaError::malformed(CODEC, "payload is too short"));
        }
        let typ = NaluType::from_header(payload[0]);

        if let Some(fragments) = self.fragments.as_mut() {
            if typ != NaluType::Fragmentation {
                self.fragments = None;
                return Err(MediaError::malformed(
                    CODEC,
                    "invalid non-FU packet (expected FU continuation)",
                ));
            }
            if payload.len() < 3 {
                self.fragments = None;
                return Err(MediaError::malformed(CODEC, "invalid FU packet (invalid size)"));
            }
            let fu_header = payload[2];
            if fu_header & FU_START != 0 {
                self.fragments = None;
                return Err(MediaError::malformed(
                    CODEC,
                    "invalid FU packet (decoded two starting packets in a row)",
                ));
            }
            let size = fragments.len() + payload.len() - 3;
            if size > MAX_ACCESS_UNIT_SIZE {
                self.fragments = None;
                return Err(MediaError::FrameTooBig {
                    codec: CODEC.to_string(),
                    size,
                    max: MAX_ACCESS_UNIT_SIZE,
                });
            }
            fragments.put_slice(&payload[3..]);

            if fu_header & FU_END == 0 {
                return Ok(None);
            }
            let nalu = self.fragments.take().unwrap_or_default().freeze();
            return Ok(Some(vec![nalu]));
        }

        match typ {
            NaluType::Fragmentation => {
                if payload.len() < 3 {
                    return Err(MediaError::malformed(CODEC, "invalid FU packet (invalid size)"));
                }
                let fu_header = payload[2];
                if fu_header & FU_START == 0 {
                    if !self.first_packet_received {
                        return Ok(None);
                    }
                    return Err(MediaError::malformed(CODEC, "invalid FU packet (non-starting)"));
                }
                if fu_header & FU_END != 0 {
                    return Err(MediaError::malformed(
                        CODEC,
                        "invalid FU packet (can't contain both a start and end bit)",
                    ));
                }

                // Rebuild the NAL header: F and layer bits from the payload
                // header, type from the FU header
                let mut fragments = BytesMut::with_capacity(payload.len() * 4);
                fragments.put_u8((payload[0] & 0x81) | ((fu_header & 0x3F) << 1));
                fragments.put_u8(payload[1]);
                fragments.put_slice(&payload[3..]);
                self.fragments = Some(fragments);
                self.first_packet_received = true;
                Ok(None)
            }
            NaluType::Aggregation => {
                let nalus = split_aggregation_packet(payload)?;
                self.first_packet_received = true;
                Ok(Some(nalus))
            }
            NaluType::Paci => Err(MediaError::malformed(
                CODEC,
                format!("packet type not supported ({:?})", typ),
            )),
            _ => {
                self.first_packet_received = true;
                Ok(Some(vec![payload.clone()]))
            }
        }
    }

    /// Collect NAL units until a packet with the marker bit completes the
    /// access unit.
    ///
    /// On error every buffered NAL unit of the current access unit is dropped.
    pub fn decode_until_marker(&mut self, packet: &RtpPacket) -> MediaResult<Option<Vec<Bytes>>> {
        let nalus = match self.decode(packet) {
            Ok(Some(nalus)) => nalus,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.reset_frame();
                return Err(err);
            }
        };

        let count = self.frame.len() + nalus.len();
        if count > MAX_NALUS_PER_ACCESS_UNIT {
            self.reset_frame();
            return Err(MediaError::TooManyNalUnits {
                count,
                max: MAX_NALUS_PER_ACCESS_UNIT,
            });
        }

        let size = self.frame_size + nalus.iter().map(Bytes::len).sum::<usize>();
        if size > MAX_ACCESS_UNIT_SIZE {
            self.reset_frame();
            return Err(MediaError::FrameTooBig {
                codec: CODEC.to_string(),
                size,
                max: MAX_ACCESS_UNIT_SIZE,
            });
        }

        self.frame.extend(nalus);
        self.frame_size = size;

        if !packet.header.marker {
            return Ok(None);
        }

        self.frame_size = 0;
        Ok(Some(std::mem::take(&mut self.frame)))
    }

    fn reset_frame(&mut self) {
        self.frame.clear();
        self.frame_size = 0;
    }
}

/// Splits access units into RTP packets
#[derive(Debug)]
pub struct H265Encoder {
    sequencer: PacketSequencer,
    max_payload_size: usize,
}

impl H265Encoder {
    /// Create an encoder emitting payloads of at most `max_payload_size` bytes
    pub fn new(sequencer: PacketSequencer, max_payload_size: usize) -> Self {
        Self {
            sequencer,
            max_payload_size,
        }
    }

    /// Packetize one access unit.
    ///
    /// Consecutive small NAL units are aggregated into AP packets, large ones
    /// are fragmented into FU packets. The last packet has the marker bit set.
    /// Timestamps are left at zero.
    pub fn encode(&mut self, au: &[Bytes]) -> MediaResult<Vec<RtpPacket>> {
        let mut payloads = Vec::new();
        let mut batch: Vec<&Bytes> = Vec::new();
        let mut batch_size = NALU_HEADER_SIZE;

        for nalu in au {
            if nalu.len() < NALU_HEADER_SIZE {
                return Err(MediaError::malformed(CODEC, "NAL unit is shorter than its header"));
            }

            if nalu.len() > self.max_payload_size {
                flush_batch(&mut batch, &mut payloads);
                batch_size = NALU_HEADER_SIZE;
                self.fragment(nalu, &mut payloads);
                continue;
            }

            if batch_size + 2 + nalu.len() > self.max_payload_size {
                flush_batch(&mut batch, &mut payloads);
                batch_size = NALU_HEADER_SIZE;
            }
            batch.push(nalu);
            batch_size += 2 + nalu.len();
        }
        flush_batch(&mut batch, &mut payloads);

        let count = payloads.len();
        Ok(payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| self.sequencer.next_packet(payload, i + 1 == count))
            .collect())
    }

    fn fragment(&self, nalu: &Bytes, payloads: &mut Vec<Bytes>) {
        let typ = NaluType::from_header(nalu[0]).value();
        let indicator = (nalu[0] & 0x81) | (NaluType::Fragmentation.value() << 1);
        let body = nalu.slice(NALU_HEADER_SIZE..);
        let chunk_size = self.max_payload_size - 3;
        let chunks = body.len().div_ceil(chunk_size);

        for (i, chunk) in body.chunks(chunk_size).enumerate() {
            let mut fu_header = typ;
            if i == 0 {
                fu_header |= FU_START;
            }
            if i + 1 == chunks {
                fu_header |= FU_END;
            }

            let mut buf = BytesMut::with_capacity(3 + chunk.len());
            buf.put_u8(indicator);
            buf.put_u8(nalu[1]);
            buf.put_u8(fu_header);
            buf.put_slice(chunk);
            payloads.push(buf.freeze());
        }
    }
}

fn layer_id(nalu: &[u8]) -> u8 {
    ((nalu[0] & 0x01) << 5) | (nalu[1] >> 3)
}

fn temporal_id(nalu: &[u8]) -> u8 {
    nalu[1] & 0x07
}

fn flush_batch(batch: &mut Vec<&Bytes>, payloads: &mut Vec<Bytes>) {
    match batch.len() {
        0 => {}
        1 => payloads.push(batch[0].clone()),
        _ => {
            // RFC 7798 section 4.4.2: F is set if any unit has it, layer and
            // temporal IDs are the lowest of the aggregated units
            let forbidden = batch.iter().any(|nalu| nalu[0] & 0x80 != 0);
            let layer = batch.iter().map(|nalu| layer_id(nalu)).min().unwrap_or(0);
            let tid = batch.iter().map(|nalu| temporal_id(nalu)).min().unwrap_or(1);

            let size = NALU_HEADER_SIZE + batch.iter().map(|nalu| 2 + nalu.len()).sum::<usize>();
            let mut buf = BytesMut::with_capacity(size);
            buf.put_u8(
                (u8::from(forbidden) << 7) | (NaluType::Aggregation.value() << 1) | (layer >> 5),
            );
            buf.put_u8(((layer & 0x1F) << 3) | tid);
            for nalu in batch.iter() {
                buf.put_u16(nalu.len() as u16);
                buf.put_slice(nalu);
            }
            payloads.push(buf.freeze());
        }
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediarelay_core::RtpHeader;

    fn packet(seq: u16, marker: bool, payload: Vec<u8>) -> RtpPacket {
        let mut header = RtpHeader::new(96, seq, 9000, 0xdead_beef);
        header.marker = marker;
        RtpPacket::new(header, Bytes::from(payload))
    }

    #[test]
    fn test_nalu_type_from_header() {
        assert_eq!(NaluType::from_header(0x26), NaluType::Irap(19));
        assert_eq!(NaluType::from_header(0x2a), NaluType::Irap(21));
        assert_eq!(NaluType::from_header(0x02), NaluType::Slice(1));
        assert_eq!(NaluType::from_header(0x40), NaluType::Vps);
        assert_eq!(NaluType::from_header(0x42), NaluType::Sps);
        assert_eq!(NaluType::from_header(0x44), NaluType::Pps);
        assert_eq!(NaluType::from_header(0x60), NaluType::Aggregation);
        assert_eq!(NaluType::from_header(0x62), NaluType::Fragmentation);
        assert!(NaluType::Irap(19).is_random_access());
        assert!(!NaluType::Slice(1).is_random_access());
    }

    #[test]
    fn test_decode_aggregation_packet() {
        let mut decoder = H265Decoder::new();
        let payload = vec![0x60, 0x01, 0x00, 0x03, 0x40, 0x01, 0x0c, 0x00, 0x02, 0x42, 0x01];
        let au = decoder.decode_until_marker(&packet(1, true, payload)).unwrap().unwrap();
        assert_eq!(
            au,
            vec![Bytes::from_static(&[0x40, 0x01, 0x0c]), Bytes::from_static(&[0x42, 0x01])]
        );

        let truncated = vec![0x60, 0x01, 0x00, 0x05, 0x40];
        assert!(decoder.decode_until_marker(&packet(2, true, truncated)).is_err());
    }

    #[test]
    fn test_decode_fragmentation_unit() {
        let mut decoder = H265Decoder::new();

        // IDR_W_RADL split over three packets
        assert!(decoder.decode(&packet(1, false, vec![0x62, 0x01, 0x93, 0xaa])).unwrap().is_none());
        assert!(decoder.decode(&packet(2, false, vec![0x62, 0x01, 0x13, 0xbb])).unwrap().is_none());
        let nalus = decoder.decode(&packet(3, true, vec![0x62, 0x01, 0x53, 0xcc])).unwrap().unwrap();

        assert_eq!(nalus, vec![Bytes::from_static(&[0x26, 0x01, 0xaa, 0xbb, 0xcc])]);
    }

    #[test]
    fn test_non_starting_fragment_without_previous_packet() {
        let mut decoder = H265Decoder::new();
        let result = decoder.decode_until_marker(&packet(1, true, vec![0x62, 0x01, 0x53, 0xcc]));
        assert_eq!(result, Ok(None));

        decoder.decode_until_marker(&packet(2, true, vec![0x26, 0x01, 0xaa])).unwrap();
        assert!(decoder.decode_until_marker(&packet(3, true, vec![0x62, 0x01, 0x53, 0xcc])).is_err());
    }

    #[test]
    fn test_decode_rejects_short_and_unsupported_packets() {
        let mut decoder = H265Decoder::new();
        assert!(decoder.decode(&packet(1, true, vec![0x26])).is_err());
        assert!(decoder.decode(&packet(2, true, vec![0x64, 0x01, 0x00])).is_err());
    }

    #[test]
    fn test_encode_aggregates_small_nalus() {
        let mut encoder = H265Encoder::new(PacketSequencer::with_state(96, 1, 100), 1200);
        let au = vec![
            Bytes::from_static(&[0x40, 0x01, 0x0c]),
            Bytes::from_static(&[0x42, 0x01, 0x01]),
            Bytes::from_static(&[0x44, 0x01, 0xc1]),
            Bytes::from_static(&[0x26, 0x01, 0xaf]),
        ];
        let packets = encoder.encode(&au).unwrap();

        assert_eq!(packets.len(), 1);
        assert!(packets[0].header.marker);
        assert_eq!(&packets[0].payload[..2], &[0x60, 0x01]);

        let mut decoder = H265Decoder::new();
        assert_eq!(decoder.decode_until_marker(&packets[0]).unwrap().unwrap(), au);
    }

    #[test]
    fn test_encode_fragments_large_nalu() {
        let mut encoder = H265Encoder::new(PacketSequencer::with_state(96, 1, 100), 100);
        let mut nalu = vec![0x26, 0x01];
        nalu.extend((0..250u32).map(|i| i as u8));
        let au = vec![Bytes::from(nalu)];

        let packets = encoder.encode(&au).unwrap();
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.payload.len() <= 100));
        assert_eq!(packets[0].payload[2], FU_START | 19);
        assert_eq!(packets[2].payload[2], FU_END | 19);
        assert_eq!(
            packets.iter().map(|p| p.header.sequence_number).collect::<Vec<_>>(),
            vec![100, 101, 102]
        );

        let mut decoder = H265Decoder::new();
        let mut decoded = None;
        for packet in &packets {
            decoded = decoder.decode_until_marker(packet).unwrap();
        }
        assert_eq!(decoded.unwrap(), au);
    }

    #[test]
    fn test_encode_rejects_truncated_nalu() {
        let mut encoder = H265Encoder::new(PacketSequencer::new(96), 1200);
        assert!(encoder.encode(&[Bytes::from_static(&[0x26])]).is_err());
    }
}
