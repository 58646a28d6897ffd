//! RTP wire format (RFC 3550)
//!
//! This module implements binary encoding and decoding of RTP packets. Payloads
//! are kept as [`Bytes`] so that parsing a datagram and wrapping it into media
//! units never copies the payload.

use crate::error::{RelayError, RelayResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed RTP header, without CSRCs or extensions
pub const RTP_HEADER_SIZE: usize = 12;

/// Number of CSRC identifiers the CC field can announce
pub const MAX_CSRC_COUNT: usize = 15;

/// RTP header extension (RFC 3550, Section 5.3.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpExtension {
    /// Profile-defined identifier
    pub profile: u16,
    /// Extension data, padded to a multiple of 4 bytes on the wire
    pub data: Bytes,
}

impl RtpExtension {
    fn padded_len(&self) -> usize {
        (self.data.len() + 3) / 4 * 4
    }
}

/// RTP fixed header plus CSRC list and extension
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtpHeader {
    /// Padding flag
    pub padding: bool,
    /// Marker bit
    pub marker: bool,
    /// Payload type (7 bits)
    pub payload_type: u8,
    /// Sequence number
    pub sequence_number: u16,
    /// Media timestamp, wraps at 2^32
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
    /// Contributing source identifiers; only the first 15 are serialized
    pub csrc: Vec<u32>,
    /// Header extension, if present
    pub extension: Option<RtpExtension>,
}

impl RtpHeader {
    /// Create a header with the given identifying fields
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            ..Default::default()
        }
    }

    /// Size of the serialized header in bytes
    pub fn marshal_size(&self) -> usize {
        let mut size = RTP_HEADER_SIZE + self.csrc_count() * 4;
        if let Some(ext) = &self.extension {
            size += 4 + ext.padded_len();
        }
        size
    }

    fn csrc_count(&self) -> usize {
        self.csrc.len().min(MAX_CSRC_COUNT)
    }

    fn write_to(&self, buf: &mut BytesMut) {
        let mut first_byte = RTP_VERSION << 6;
        if self.padding {
            first_byte |= 1 << 5;
        }
        if self.extension.is_some() {
            first_byte |= 1 << 4;
        }
        first_byte |= self.csrc_count() as u8;
        buf.put_u8(first_byte);

        let mut second_byte = self.payload_type & 0x7F;
        if self.marker {
            second_byte |= 1 << 7;
        }
        buf.put_u8(second_byte);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in &self.csrc[..self.csrc_count()] {
            buf.put_u32(*csrc);
        }

        if let Some(ext) = &self.extension {
            let padded = ext.padded_len();
            buf.put_u16(ext.profile);
            buf.put_u16((padded / 4) as u16);
            buf.put_slice(&ext.data);
            buf.put_bytes(0, padded - ext.data.len());
        }
    }
}

/// A complete RTP packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtpPacket {
    /// Packet header
    pub header: RtpHeader,
    /// Payload, without padding
    pub payload: Bytes,
    /// Number of padding bytes, including the trailing count byte
    pub padding_size: u8,
}

impl RtpPacket {
    /// Create a packet without padding
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self {
            header,
            payload,
            padding_size: 0,
        }
    }

    /// Parse a packet from a borrowed datagram
    pub fn parse(data: &[u8]) -> RelayResult<Self> {
        Self::unmarshal(Bytes::copy_from_slice(data))
    }

    /// Parse a packet, sharing the datagram buffer with the payload
    pub fn unmarshal(data: Bytes) -> RelayResult<Self> {
        let mut buf = data;
        need(&buf, RTP_HEADER_SIZE)?;

        let first_byte = buf.get_u8();
        let version = first_byte >> 6;
        if version != RTP_VERSION {
            return Err(RelayError::UnsupportedVersion { version });
        }
        let padding = first_byte & 0x20 != 0;
        let has_extension = first_byte & 0x10 != 0;
        let csrc_count = (first_byte & 0x0F) as usize;

        let second_byte = buf.get_u8();
        let marker = second_byte & 0x80 != 0;
        let payload_type = second_byte & 0x7F;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        need(&buf, csrc_count * 4)?;
        let csrc = (0..csrc_count).map(|_| buf.get_u32()).collect();

        let extension = if has_extension {
            need(&buf, 4)?;
            let profile = buf.get_u16();
            let length = buf.get_u16() as usize * 4;
            need(&buf, length)?;
            Some(RtpExtension {
                profile,
                data: buf.split_to(length),
            })
        } else {
            None
        };

        let mut payload = buf;
        let mut padding_size = 0;
        if padding {
            let Some(&count) = payload.last() else {
                return Err(RelayError::InvalidPacket {
                    reason: "padding flag set on empty payload".to_string(),
                });
            };
            if count == 0 || count as usize > payload.len() {
                return Err(RelayError::InvalidPacket {
                    reason: format!(
                        "invalid padding size {} for payload of {} bytes",
                        count,
                        payload.len()
                    ),
                });
            }
            payload.truncate(payload.len() - count as usize);
            padding_size = count;
        }

        Ok(Self {
            header: RtpHeader {
                padding,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
                extension,
            },
            payload,
            padding_size,
        })
    }

    /// Size of the serialized packet in bytes
    pub fn marshal_size(&self) -> usize {
        let padding = if self.header.padding {
            self.padding_size as usize
        } else {
            0
        };
        self.header.marshal_size() + self.payload.len() + padding
    }

    /// Serialize the packet
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        self.header.write_to(&mut buf);
        buf.put_slice(&self.payload);
        if self.header.padding && self.padding_size > 0 {
            buf.put_bytes(0, self.padding_size as usize - 1);
            buf.put_u8(self.padding_size);
        }
        buf.freeze()
    }

    /// Drop padding so the packet can be forwarded as-is
    pub fn remove_padding(&mut self) {
        self.header.padding = false;
        self.padding_size = 0;
    }
}

fn need(buf: &Bytes, required: usize) -> RelayResult<()> {
    if buf.remaining() < required {
        return Err(RelayError::BufferTooSmall {
            required,
            available: buf.remaining(),
        });
    }
    Ok(())
}
