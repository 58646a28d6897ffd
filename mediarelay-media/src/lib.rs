//! # mediarelay media
//!
//! Stream normalization for mediarelay. Every track gets a processor chosen by
//! its format; the processor repacks codec payloads where needed and makes
//! sure the outgoing RTP packets carry timestamps consistent with the
//! presentation times computed by the core crate.

#![warn(clippy::all)]

pub mod codecs;
pub mod config;
pub mod error;
pub mod format;
pub mod processor;
pub mod track;
pub mod unit;

// Re-export main types
pub use codecs::PacketSequencer;
pub use config::{ProcessorConfig, DEFAULT_UDP_MAX_PAYLOAD_SIZE};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use format::{
    Format, GenericFormat, H264Format, H265Format, OpusFormat, Vp8Format, OPUS_CLOCK_RATE,
    VIDEO_CLOCK_RATE,
};
pub use processor::{new_processor, set_timestamp, GenericProcessor, Processor};
#[cfg(feature = "h264")]
pub use processor::H264Processor;
#[cfg(feature = "h265")]
pub use processor::H265Processor;
#[cfg(feature = "opus")]
pub use processor::OpusProcessor;
#[cfg(feature = "vp8")]
pub use processor::Vp8Processor;
pub use track::{MediaTrack, TrackStats};
pub use unit::{Payload, Unit};
