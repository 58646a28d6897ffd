//! RTP payload framing for the codec families the relay understands
//!
//! Each submodule converts between RTP packets and codec units (access units,
//! frames, packets). Nothing here decodes media; only the bitstream framing
//! defined by the RTP payload format is touched.

pub mod h264;
pub mod h265;
pub mod opus;
pub mod vp8;

use bytes::Bytes;
use mediarelay_core::{RtpHeader, RtpPacket};

/// Hands out headers for packets generated by an encoder.
///
/// Generated packets carry a zero timestamp; the processor assigns the real
/// one afterwards from the unit's presentation time.
#[derive(Debug, Clone)]
pub struct PacketSequencer {
    payload_type: u8,
    ssrc: u32,
    sequence_number: u16,
}

impl PacketSequencer {
    /// Start a stream with a random SSRC and initial sequence number
    pub fn new(payload_type: u8) -> Self {
        Self::with_state(payload_type, rand::random(), rand::random())
    }

    /// Continue an existing stream
    pub fn with_state(payload_type: u8, ssrc: u32, next_sequence_number: u16) -> Self {
        Self {
            payload_type,
            ssrc,
            sequence_number: next_sequence_number,
        }
    }

    /// SSRC of generated packets
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will get
    pub fn next_sequence_number(&self) -> u16 {
        self.sequence_number
    }

    /// Build the next packet of the stream
    pub fn next_packet(&mut self, payload: Bytes, marker: bool) -> RtpPacket {
        let mut header = RtpHeader::new(self.payload_type, self.sequence_number, 0, self.ssrc);
        header.marker = marker;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        RtpPacket::new(header, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_numbers_wrap() {
        let mut sequencer = PacketSequencer::with_state(96, 0x1234_5678, u16::MAX);
        let first = sequencer.next_packet(Bytes::from_static(b"a"), false);
        let second = sequencer.next_packet(Bytes::from_static(b"b"), true);

        assert_eq!(first.header.sequence_number, u16::MAX);
        assert_eq!(second.header.sequence_number, 0);
        assert_eq!(second.header.ssrc, 0x1234_5678);
        assert_eq!(second.header.payload_type, 96);
        assert!(!first.header.marker);
        assert!(second.header.marker);
        assert_eq!(sequencer.next_sequence_number(), 1);
    }
}
