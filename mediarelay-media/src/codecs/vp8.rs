//! VP8 RTP payload format (RFC 7741)

use super::PacketSequencer;
use crate::error::{MediaError, MediaResult};
use bytes::{BufMut, Bytes, BytesMut};
use mediarelay_core::RtpPacket;

const CODEC: &str = "VP8";

/// Maximum size of a reassembled frame in bytes
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Parsed VP8 payload descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadDescriptor {
    /// Non-reference frame
    pub non_reference: bool,
    /// Start of a VP8 partition
    pub start_of_partition: bool,
    /// Partition index
    pub partition_id: u8,
    /// 7 or 15 bit picture ID, when present
    pub picture_id: Option<u16>,
    /// Temporal level zero index, when present
    pub tl0_pic_idx: Option<u8>,
    /// Temporal layer index, when present
    pub tid: Option<u8>,
    /// Length of the descriptor in bytes
    pub size: usize,
}

impl PayloadDescriptor {
    /// Parse the descriptor at the start of an RTP payload
    pub fn parse(payload: &[u8]) -> MediaResult<Self> {
        let short = || MediaError::malformed(CODEC, "payload descriptor is too short");

        let first = *payload.first().ok_or_else(short)?;
        let mut descriptor = PayloadDescriptor {
            non_reference: first & 0x20 != 0,
            start_of_partition: first & 0x10 != 0,
            partition_id: first & 0x07,
            ..Default::default()
        };
        let mut idx = 1;

        if first & 0x80 != 0 {
            let ext = *payload.get(idx).ok_or_else(short)?;
            idx += 1;

            if ext & 0x80 != 0 {
                let pid = *payload.get(idx).ok_or_else(short)?;
                idx += 1;
                if pid & 0x80 != 0 {
                    let low = *payload.get(idx).ok_or_else(short)?;
                    idx += 1;
                    descriptor.picture_id = Some(u16::from_be_bytes([pid & 0x7F, low]));
                } else {
                    descriptor.picture_id = Some(pid as u16);
                }
            }

            if ext & 0x40 != 0 {
                descriptor.tl0_pic_idx = Some(*payload.get(idx).ok_or_else(short)?);
                idx += 1;
            }

            // T and K share one byte
            if ext & 0x30 != 0 {
                let tk = *payload.get(idx).ok_or_else(short)?;
                idx += 1;
                if ext & 0x20 != 0 {
                    descriptor.tid = Some(tk >> 6);
                }
            }
        }

        descriptor.size = idx;
        Ok(descriptor)
    }

    /// Whether the packet opens a new frame
    pub fn starts_frame(&self) -> bool {
        self.start_of_partition && self.partition_id == 0
    }
}

/// Reassembles VP8 frames from RTP packets
#[derive(Debug, Default)]
pub struct Vp8Decoder {
    fragments: Vec<Bytes>,
    fragments_size: usize,
    first_packet_received: bool,
}

impl Vp8Decoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet; a frame is returned once the marker bit closes it.
    ///
    /// Continuation packets received before any frame start are skipped.
    pub fn decode(&mut self, packet: &RtpPacket) -> MediaResult<Option<Bytes>> {
        let descriptor = match PayloadDescriptor::parse(&packet.payload) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                self.reset();
                return Err(err);
            }
        };

        let data = packet.payload.slice(descriptor.size..);
        if data.is_empty() {
            self.reset();
            return Err(MediaError::malformed(CODEC, "payload is empty"));
        }

        if descriptor.starts_frame() {
            self.reset();
            self.first_packet_received = true;
        } else if self.fragments.is_empty() {
            if !self.first_packet_received {
                return Ok(None);
            }
            return Err(MediaError::malformed(
                CODEC,
                "received a non-starting fragment without any previous starting fragment",
            ));
        }

        let size = self.fragments_size + data.len();
        if size > MAX_FRAME_SIZE {
            self.reset();
            return Err(MediaError::FrameTooBig {
                codec: CODEC.to_string(),
                size,
                max: MAX_FRAME_SIZE,
            });
        }
        self.fragments.push(data);
        self.fragments_size = size;

        if !packet.header.marker {
            return Ok(None);
        }

        let frame = if self.fragments.len() == 1 {
            self.fragments.remove(0)
        } else {
            let mut buf = BytesMut::with_capacity(self.fragments_size);
            for fragment in &self.fragments {
                buf.put_slice(fragment);
            }
            buf.freeze()
        };
        self.reset();
        Ok(Some(frame))
    }

    fn reset(&mut self) {
        self.fragments.clear();
        self.fragments_size = 0;
    }
}

/// Splits VP8 frames into RTP packets
#[derive(Debug)]
pub struct Vp8Encoder {
    sequencer: PacketSequencer,
    max_payload_size: usize,
}

impl Vp8Encoder {
    /// Create an encoder emitting payloads of at most `max_payload_size` bytes
    pub fn new(sequencer: PacketSequencer, max_payload_size: usize) -> Self {
        Self {
            sequencer,
            max_payload_size,
        }
    }

    /// Packetize one frame. Timestamps are left at zero.
    pub fn encode(&mut self, frame: &Bytes) -> MediaResult<Vec<RtpPacket>> {
        if frame.is_empty() {
            return Err(MediaError::EncodingFailed {
                codec: CODEC.to_string(),
                reason: "frame is empty".to_string(),
            });
        }

        let chunk_size = self.max_payload_size - 1;
        let count = frame.len().div_ceil(chunk_size);
        let mut packets = Vec::with_capacity(count);

        for (i, chunk) in frame.chunks(chunk_size).enumerate() {
            let mut buf = BytesMut::with_capacity(1 + chunk.len());
            // S bit on the first packet, partition 0 throughout
            buf.put_u8(if i == 0 { 0x10 } else { 0x00 });
            buf.put_slice(chunk);
            packets.push(self.sequencer.next_packet(buf.freeze(), i + 1 == count));
        }
        Ok(packets)
    }
}
