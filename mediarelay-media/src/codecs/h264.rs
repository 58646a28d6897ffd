//! H.264 RTP payload format (RFC 6184)
//!
//! [`H264Decoder`] turns single NAL unit, STAP-A and FU-A packets back into
//! access units; [`H264Encoder`] splits access units into packets that fit the
//! configured payload size.

use super::PacketSequencer;
use crate::error::{MediaError, MediaResult};
use bytes::{BufMut, Bytes, BytesMut};
use mediarelay_core::RtpPacket;

const CODEC: &str = "H264";

/// FU header flag of the first fragment
pub const FU_START: u8 = 0x80;

/// FU header flag of the last fragment
pub const FU_END: u8 = 0x40;

/// Maximum number of NAL units in one access unit
pub const MAX_NALUS_PER_ACCESS_UNIT: usize = 1024;

/// Maximum size of one access unit in bytes
pub const MAX_ACCESS_UNIT_SIZE: usize = 8 * 1024 * 1024;

/// NAL unit type, from the low five bits of the NAL header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Coded slice of a non-IDR picture
    NonIdr,
    /// Coded slice of an IDR picture
    Idr,
    /// Supplemental enhancement information
    Sei,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Access unit delimiter
    AccessUnitDelimiter,
    /// Single-time aggregation packet
    StapA,
    /// Single-time aggregation packet with decoding order number
    StapB,
    /// Multi-time aggregation packet, 16-bit offsets
    Mtap16,
    /// Multi-time aggregation packet, 24-bit offsets
    Mtap24,
    /// Fragmentation unit
    FuA,
    /// Fragmentation unit with decoding order number
    FuB,
    /// Any other type
    Other(u8),
}

impl NaluType {
    /// Type of a NAL unit given its first byte
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            1 => NaluType::NonIdr,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::AccessUnitDelimiter,
            24 => NaluType::StapA,
            25 => NaluType::StapB,
            26 => NaluType::Mtap16,
            27 => NaluType::Mtap24,
            28 => NaluType::FuA,
            29 => NaluType::FuB,
            other => NaluType::Other(other),
        }
    }

    /// Numeric value of the type
    pub fn value(self) -> u8 {
        match self {
            NaluType::NonIdr => 1,
            NaluType::Idr => 5,
            NaluType::Sei => 6,
            NaluType::Sps => 7,
            NaluType::Pps => 8,
            NaluType::AccessUnitDelimiter => 9,
            NaluType::StapA => 24,
            NaluType::StapB => 25,
            NaluType::Mtap16 => 26,
            NaluType::Mtap24 => 27,
            NaluType::FuA => 28,
            NaluType::FuB => 29,
            NaluType::Other(value) => value,
        }
    }
}

/// Split a STAP-A payload (aggregation header included) into its NAL units
pub fn split_stap_a(payload: &Bytes) -> MediaResult<Vec<Bytes>> {
    let mut nalus = Vec::new();
    let mut offset = 1;

    while offset < payload.len() {
        if payload.len() - offset < 2 {
            return Err(MediaError::malformed(CODEC, "invalid STAP-A packet (invalid size)"));
        }
        let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
        offset += 2;

        if size == 0 || size > payload.len() - offset {
            return Err(MediaError::malformed(CODEC, "invalid STAP-A packet (invalid size)"));
        }
        nalus.push(payload.slice(offset..offset + size));
        offset += size;
    }

    if nalus.is_empty() {
        return Err(MediaError::malformed(
            CODEC,
            "STAP-A packet doesn't contain any NALU",
        ));
    }
    Ok(nalus)
}

/// Reassembles access units from RTP packets
#[derive(Debug, Default)]
pub struct H264Decoder {
    fragments: Option<BytesMut>,
    frame: Vec<Bytes>,
    frame_size: usize,
    first_packet_received: bool,
}

impl H264Decoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the NAL units carried by one packet.
    ///
    /// Returns `Ok(None)` while an FU-A fragmentation is still in progress, and
    /// for continuation fragments received before any starting packet.
    pub fn decode(&mut self, packet: &RtpPacket) -> MediaResult<Option<Vec<Bytes>>> {
        let payload = &packet.payload;
        let Some(&header) = payload.first() else {
            self.fragments = None;
            return Err(MediaError::malformed(CODEC, "payload is too short"));
        };
        let typ = NaluType::from_header(header);

        if let Some(fragments) = self.fragments.as_mut() {
            if typ != NaluType::FuA {
                self.fragments = None;
                return Err(MediaError::malformed(
                    CODEC,
                    "invalid non-FU-A packet (expected FU-A continuation)",
                ));
            }
            if payload.len() < 2 {
                self.fragments = None;
                return Err(MediaError::malformed(CODEC, "invalid FU-A packet (invalid size)"));
            }
            let fu_header = payload[1];
            if fu_header & FU_START != 0 {
                self.fragments = None;
                return Err(MediaError::malformed(
                    CODEC,
                    "invalid FU-A packet (decoded two starting packets in a row)",
                ));
            }
            if fragments.len() + payload.len() - 2 > MAX_ACCESS_UNIT_SIZE {
                let size = fragments.len() + payload.len() - 2;
                self.fragments = None;
                return Err(MediaError::FrameTooBig {
                    codec: CODEC.to_string(),
                    size,
                    max: MAX_ACCESS_UNIT_SIZE,
                });
            }
            fragments.put_slice(&payload[2..]);

            if fu_header & FU_END == 0 {
                return Ok(None);
            }
            let nalu = self.fragments.take().unwrap_or_default().freeze();
            return Ok(Some(vec![nalu]));
        }

        match typ {
            NaluType::FuA => {
                if payload.len() < 2 {
                    return Err(MediaError::malformed(CODEC, "invalid FU-A packet (invalid size)"));
                }
                let fu_header = payload[1];
                if fu_header & FU_START == 0 {
                    if !self.first_packet_received {
                        return Ok(None);
                    }
                    return Err(MediaError::malformed(CODEC, "invalid FU-A packet (non-starting)"));
                }
                if fu_header & FU_END != 0 {
                    return Err(MediaError::malformed(
                        CODEC,
                        "invalid FU-A packet (can't contain both a start and end bit)",
                    ));
                }

                let mut fragments = BytesMut::with_capacity(payload.len() * 4);
                fragments.put_u8((header & 0xE0) | (fu_header & 0x1F));
                fragments.put_slice(&payload[2..]);
                self.fragments = Some(fragments);
                self.first_packet_received = true;
                Ok(None)
            }
            NaluType::StapA => {
                let nalus = split_stap_a(payload)?;
                self.first_packet_received = true;
                Ok(Some(nalus))
            }
            NaluType::StapB | NaluType::Mtap16 | NaluType::Mtap24 | NaluType::FuB => Err(
                MediaError::malformed(CODEC, format!("packet type not supported ({:?})", typ)),
            ),
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
pub struct H264Encoder {
    sequencer: PacketSequencer,
    max_payload_size: usize,
    packetization_mode: u8,
}

impl H264Encoder {
    /// Create an encoder emitting payloads of at most `max_payload_size` bytes
    pub fn new(sequencer: PacketSequencer, max_payload_size: usize, packetization_mode: u8) -> Self {
        Self {
            sequencer,
            max_payload_size,
            packetization_mode,
        }
    }

    /// Packetize one access unit.
    ///
    /// Consecutive small NAL units are aggregated into STAP-A packets, large
    /// ones are fragmented into FU-A packets. The last packet has the marker
    /// bit set. Timestamps are left at zero.
    pub fn encode(&mut self, au: &[Bytes]) -> MediaResult<Vec<RtpPacket>> {
        let mut payloads = Vec::new();
        let mut batch: Vec<&Bytes> = Vec::new();
        let mut batch_size = 1;

        for nalu in au {
            if nalu.is_empty() {
                return Err(MediaError::malformed(CODEC, "empty NAL unit"));
            }

            if nalu.len() > self.max_payload_size {
                self.flush_batch(&mut batch, &mut payloads);
                batch_size = 1;
                self.fragment(nalu, &mut payloads)?;
                continue;
            }

            // Mode 0 forbids aggregation
            if self.packetization_mode == 0 || batch_size + 2 + nalu.len() > self.max_payload_size {
                self.flush_batch(&mut batch, &mut payloads);
                batch_size = 1;
            }
            batch.push(nalu);
            batch_size += 2 + nalu.len();
        }
        self.flush_batch(&mut batch, &mut payloads);

        let count = payloads.len();
        Ok(payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| self.sequencer.next_packet(payload, i + 1 == count))
            .collect())
    }

    fn flush_batch(&self, batch: &mut Vec<&Bytes>, payloads: &mut Vec<Bytes>) {
        match batch.len() {
            0 => {}
            1 => payloads.push(batch[0].clone()),
            _ => {
                let size = 1 + batch.iter().map(|nalu| 2 + nalu.len()).sum::<usize>();
                let nri = batch.iter().map(|nalu| nalu[0] & 0x60).max().unwrap_or(0);

                let mut buf = BytesMut::with_capacity(size);
                buf.put_u8(nri | NaluType::StapA.value());
                for nalu in batch.iter() {
                    buf.put_u16(nalu.len() as u16);
                    buf.put_slice(nalu);
                }
                payloads.push(buf.freeze());
            }
        }
        batch.clear();
    }

    fn fragment(&self, nalu: &Bytes, payloads: &mut Vec<Bytes>) -> MediaResult<()> {
        if self.packetization_mode == 0 {
            return Err(MediaError::EncodingFailed {
                codec: CODEC.to_string(),
                reason: format!(
                    "NAL unit of {} bytes does not fit a packet in packetization mode 0",
                    nalu.len()
                ),
            });
        }

        let header = nalu[0];
        let indicator = (header & 0xE0) | NaluType::FuA.value();
        let typ = header & 0x1F;
        let body = nalu.slice(1..);
        let chunk_size = self.max_payload_size - 2;
        let chunks = body.len().div_ceil(chunk_size);

        for (i, chunk) in body.chunks(chunk_size).enumerate() {
            let mut fu_header = typ;
            if i == 0 {
                fu_header |= FU_START;
            }
            if i + 1 == chunks {
                fu_header |= FU_END;
            }

            let mut buf = BytesMut::with_capacity(2 + chunk.len());
            buf.put_u8(indicator);
            buf.put_u8(fu_header);
            buf.put_slice(chunk);
            payloads.push(buf.freeze());
        }
        Ok(())
    }
}
