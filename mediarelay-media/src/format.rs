//! Track format descriptors
//!
//! A [`Format`] is fixed when a track is set up and selects the processor for
//! that track. Processors copy what they need out of it and never modify it.

use crate::codecs::h264::{self, NaluType};
use crate::codecs::h265;
use crate::error::{MediaError, MediaResult};
use bytes::Bytes;
use mediarelay_core::RtpPacket;

/// Media clock rate of video RTP payload formats
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Media clock rate of Opus, regardless of the actual sample rate
pub const OPUS_CLOCK_RATE: u32 = 48_000;

/// H.264 format parameters (RFC 6184)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H264Format {
    /// RTP payload type
    pub payload_type: u8,
    /// Sequence parameter set from the session description
    pub sps: Option<Bytes>,
    /// Picture parameter set from the session description
    pub pps: Option<Bytes>,
    /// Packetization mode (0 = single NAL unit, 1 = non-interleaved)
    pub packetization_mode: u8,
}

impl H264Format {
    /// Create a format with packetization mode 1 and no parameter sets
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            sps: None,
            pps: None,
            packetization_mode: 1,
        }
    }
}

/// H.265 format parameters (RFC 7798)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H265Format {
    /// RTP payload type
    pub payload_type: u8,
    /// Video parameter set from the session description
    pub vps: Option<Bytes>,
    /// Sequence parameter set from the session description
    pub sps: Option<Bytes>,
    /// Picture parameter set from the session description
    pub pps: Option<Bytes>,
}

impl H265Format {
    /// Create a format with no parameter sets
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            vps: None,
            sps: None,
            pps: None,
        }
    }
}

/// VP8 format parameters (RFC 7741)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vp8Format {
    /// RTP payload type
    pub payload_type: u8,
}

impl Vp8Format {
    /// Create a format
    pub fn new(payload_type: u8) -> Self {
        Self { payload_type }
    }
}

/// Opus format parameters (RFC 7587)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusFormat {
    /// RTP payload type
    pub payload_type: u8,
}

impl OpusFormat {
    /// Create a format
    pub fn new(payload_type: u8) -> Self {
        Self { payload_type }
    }
}

/// Any format without a dedicated processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericFormat {
    /// RTP payload type
    pub payload_type: u8,
    /// Encoding name from the rtpmap attribute, or the static type's name
    pub encoding: String,
    /// Media clock rate
    pub clock_rate: u32,
}

impl GenericFormat {
    /// Build a format from an `a=rtpmap` value (`name/clock-rate[/params]`),
    /// falling back to the static payload type table of RFC 3551.
    pub fn new(payload_type: u8, rtp_map: Option<&str>) -> MediaResult<Self> {
        let Some(rtp_map) = rtp_map else {
            let (encoding, clock_rate) = static_payload_type(payload_type).ok_or_else(|| {
                MediaError::InvalidConfiguration {
                    message: format!("payload type {} requires an rtpmap", payload_type),
                }
            })?;
            return Ok(Self {
                payload_type,
                encoding: encoding.to_string(),
                clock_rate,
            });
        };

        let mut parts = rtp_map.trim().split('/');
        let encoding = parts.next().unwrap_or_default();
        let clock_rate = parts
            .next()
            .and_then(|rate| rate.parse::<u32>().ok())
            .filter(|rate| *rate > 0)
            .ok_or_else(|| MediaError::InvalidConfiguration {
                message: format!("invalid clock rate in rtpmap '{}'", rtp_map),
            })?;

        Ok(Self {
            payload_type,
            encoding: encoding.to_string(),
            clock_rate,
        })
    }
}

fn static_payload_type(payload_type: u8) -> Option<(&'static str, u32)> {
    let entry = match payload_type {
        0 => ("PCMU", 8_000),
        3 => ("GSM", 8_000),
        4 => ("G723", 8_000),
        5 => ("DVI4", 8_000),
        6 => ("DVI4", 16_000),
        7 => ("LPC", 8_000),
        8 => ("PCMA", 8_000),
        9 => ("G722", 8_000),
        10 | 11 => ("L16", 44_100),
        12 => ("QCELP", 8_000),
        13 => ("CN", 8_000),
        14 => ("MPA", VIDEO_CLOCK_RATE),
        15 => ("G728", 8_000),
        16 => ("DVI4", 11_025),
        17 => ("DVI4", 22_050),
        18 => ("G729", 8_000),
        25 => ("CelB", VIDEO_CLOCK_RATE),
        26 => ("JPEG", VIDEO_CLOCK_RATE),
        28 => ("nv", VIDEO_CLOCK_RATE),
        31 => ("H261", VIDEO_CLOCK_RATE),
        32 => ("MPV", VIDEO_CLOCK_RATE),
        33 => ("MP2T", VIDEO_CLOCK_RATE),
        34 => ("H263", VIDEO_CLOCK_RATE),
        _ => return None,
    };
    Some(entry)
}

/// Codec family and parameters of a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Format {
    /// H.264 video
    H264(H264Format),
    /// H.265 video
    H265(H265Format),
    /// VP8 video
    Vp8(Vp8Format),
    /// Opus audio
    Opus(OpusFormat),
    /// Anything else
    Generic(GenericFormat),
}

impl Format {
    /// Codec name as used in logs and errors
    pub fn codec(&self) -> &str {
        match self {
            Format::H264(_) => "H264",
            Format::H265(_) => "H265",
            Format::Vp8(_) => "VP8",
            Format::Opus(_) => "Opus",
            Format::Generic(f) => f.encoding.as_str(),
        }
    }

    /// RTP payload type
    pub fn payload_type(&self) -> u8 {
        match self {
            Format::H264(f) => f.payload_type,
            Format::H265(f) => f.payload_type,
            Format::Vp8(f) => f.payload_type,
            Format::Opus(f) => f.payload_type,
            Format::Generic(f) => f.payload_type,
        }
    }

    /// Media clock rate in Hz
    pub fn clock_rate(&self) -> u32 {
        match self {
            Format::H264(_) | Format::H265(_) | Format::Vp8(_) => VIDEO_CLOCK_RATE,
            Format::Opus(_) => OPUS_CLOCK_RATE,
            Format::Generic(f) => f.clock_rate,
        }
    }

    /// Whether the sample carried by `packet` is presented when it is decoded.
    ///
    /// Only such samples may anchor a track on the session clock. H.264 and
    /// H.265 streams can reorder frames, so only packets opening a random
    /// access point (IDR or IRAP, or the parameter sets sent in front of it)
    /// qualify.
    pub fn pts_equals_dts(&self, packet: &RtpPacket) -> bool {
        match self {
            Format::H264(_) => h264_pts_equals_dts(&packet.payload),
            Format::H265(_) => h265_pts_equals_dts(&packet.payload),
            Format::Vp8(_) | Format::Opus(_) | Format::Generic(_) => true,
        }
    }
}

fn is_random_access(typ: NaluType) -> bool {
    matches!(typ, NaluType::Idr | NaluType::Sps | NaluType::Pps)
}

fn h264_pts_equals_dts(payload: &[u8]) -> bool {
    let Some(&header) = payload.first() else {
        return false;
    };

    match NaluType::from_header(header) {
        NaluType::StapA => {
            let mut rest = &payload[1..];
            while !rest.is_empty() {
                if rest.len() < 2 {
                    return false;
                }
                let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
                rest = &rest[2..];
                if size == 0 || size > rest.len() {
                    return false;
                }
                if is_random_access(NaluType::from_header(rest[0])) {
                    return true;
                }
                rest = &rest[size..];
            }
            false
        }
        NaluType::FuA => {
            if payload.len() < 2 {
                return false;
            }
            let fu_header = payload[1];
            fu_header & h264::FU_START != 0 && NaluType::from_header(fu_header) == NaluType::Idr
        }
        typ => is_random_access(typ),
    }
}

fn h265_pts_equals_dts(payload: &[u8]) -> bool {
    if payload.len() < h265::NALU_HEADER_SIZE {
        return false;
    }

    match h265::NaluType::from_header(payload[0]) {
        h265::NaluType::Aggregation => {
            let mut rest = &payload[h265::NALU_HEADER_SIZE..];
            while !rest.is_empty() {
                if rest.len() < 2 {
                    return false;
                }
                let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
                rest = &rest[2..];
                if size == 0 || size > rest.len() {
                    return false;
                }
                if h265::NaluType::from_header(rest[0]).is_random_access() {
                    return true;
                }
                rest = &rest[size..];
            }
            false
        }
        h265::NaluType::Fragmentation => {
            let Some(&fu_header) = payload.get(2) else {
                return false;
            };
            // FU type sits in the low six bits, not shifted like a NAL header
            fu_header & h264::FU_START != 0
                && h265::NaluType::from_header((fu_header & 0x3F) << 1).is_random_access()
        }
        typ => typ.is_random_access(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediarelay_core::RtpHeader;

    fn packet(payload: &'static [u8]) -> RtpPacket {
        RtpPacket::new(RtpHeader::new(96, 0, 0, 0), Bytes::from_static(payload))
    }

    #[test]
    fn test_clock_rates() {
        assert_eq!(Format::H264(H264Format::new(96)).clock_rate(), 90_000);
        assert_eq!(Format::Vp8(Vp8Format::new(97)).clock_rate(), 90_000);
        let opus = Format::Opus(OpusFormat::new(111));
        assert_eq!(opus.clock_rate(), 48_000);
        assert_eq!(opus.payload_type(), 111);
    }

    #[test]
    fn test_generic_from_rtp_map() {
        let format = GenericFormat::new(98, Some("MPEG4-GENERIC/44100/2")).unwrap();
        assert_eq!(format.encoding, "MPEG4-GENERIC");
        assert_eq!(format.clock_rate, 44_100);
        assert_eq!(Format::Generic(format).codec(), "MPEG4-GENERIC");

        assert!(GenericFormat::new(98, Some("L16")).is_err());
        assert!(GenericFormat::new(98, Some("L16/0")).is_err());
    }

    #[test]
    fn test_generic_static_payload_types() {
        let pcmu = GenericFormat::new(0, None).unwrap();
        assert_eq!((pcmu.encoding.as_str(), pcmu.clock_rate), ("PCMU", 8_000));
        let mp2t = GenericFormat::new(33, None).unwrap();
        assert_eq!(mp2t.clock_rate, 90_000);
        assert!(GenericFormat::new(100, None).is_err());
    }

    #[test]
    fn test_h264_pts_equals_dts() {
        let format = Format::H264(H264Format::new(96));

        // IDR, SPS and non-IDR single NAL units
        assert!(format.pts_equals_dts(&packet(&[0x65, 0x88])));
        assert!(format.pts_equals_dts(&packet(&[0x67, 0x42])));
        assert!(!format.pts_equals_dts(&packet(&[0x41, 0x9a])));
        assert!(!format.pts_equals_dts(&packet(&[])));

        // STAP-A carrying SPS + PPS
        assert!(format.pts_equals_dts(&packet(&[0x78, 0x00, 0x02, 0x67, 0x42, 0x00, 0x01, 0x68])));
        // STAP-A with a truncated aggregate
        assert!(!format.pts_equals_dts(&packet(&[0x78, 0x00, 0x09, 0x67])));

        // FU-A start of an IDR, FU-A continuation, FU-A start of a non-IDR
        assert!(format.pts_equals_dts(&packet(&[0x7c, 0x85, 0x01])));
        assert!(!format.pts_equals_dts(&packet(&[0x7c, 0x05, 0x01])));
        assert!(!format.pts_equals_dts(&packet(&[0x7c, 0x81, 0x01])));
    }

    #[test]
    fn test_h265_pts_equals_dts() {
        let format = Format::H265(H265Format::new(96));
        assert_eq!(format.codec(), "H265");
        assert_eq!(format.clock_rate(), 90_000);

        // IDR_W_RADL, CRA, VPS, trailing picture, truncated header
        assert!(format.pts_equals_dts(&packet(&[0x26, 0x01, 0xaf])));
        assert!(format.pts_equals_dts(&packet(&[0x2a, 0x01, 0xaf])));
        assert!(format.pts_equals_dts(&packet(&[0x40, 0x01, 0x0c])));
        assert!(!format.pts_equals_dts(&packet(&[0x02, 0x01, 0xd0])));
        assert!(!format.pts_equals_dts(&packet(&[0x26])));

        // AP carrying VPS, AP carrying two trailing pictures, truncated AP
        assert!(format.pts_equals_dts(&packet(&[0x60, 0x01, 0x00, 0x02, 0x40, 0x01])));
        assert!(!format.pts_equals_dts(&packet(&[
            0x60, 0x01, 0x00, 0x02, 0x02, 0x01, 0x00, 0x02, 0x02, 0x01
        ])));
        assert!(!format.pts_equals_dts(&packet(&[0x60, 0x01, 0x00, 0x09, 0x40])));

        // FU start of an IDR, FU continuation of an IDR, FU start of a trailing picture
        assert!(format.pts_equals_dts(&packet(&[0x62, 0x01, 0x93, 0xaa])));
        assert!(!format.pts_equals_dts(&packet(&[0x62, 0x01, 0x13, 0xaa])));
        assert!(!format.pts_equals_dts(&packet(&[0x62, 0x01, 0x81, 0xaa])));
    }

    #[test]
    fn test_other_formats_always_qualify() {
        let format = Format::Vp8(Vp8Format::new(96));
        assert!(format.pts_equals_dts(&packet(&[])));
    }
}
