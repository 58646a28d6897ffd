//! # mediarelay
//!
//! Timestamp synchronization and stream normalization for real-time media
//! relays.
//!
//! Tracks of a stream arrive independently, each with its own RTP clock. The
//! relay maps all of them onto one presentation clock, anchored when the first
//! track delivers a usable sample, and hands every unit to a codec-specific
//! processor that keeps outgoing RTP timestamps consistent with it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mediarelay::{Format, H264Format, OpusFormat, RelayConfig, RelaySession};
//!
//! # fn main() -> mediarelay::Result<()> {
//! let config = RelayConfig::from_json(r#"{"debug_logging": true}"#)?;
//! mediarelay::init_logging(&config)?;
//!
//! let mut session = RelaySession::new(
//!     config,
//!     vec![
//!         Format::H264(H264Format::new(96)),
//!         Format::Opus(OpusFormat::new(111)),
//!     ],
//! )?;
//!
//! # let datagram = bytes::Bytes::new();
//! let video = &mut session.tracks_mut()[0];
//! if let Some(unit) = video.write_rtp_bytes(datagram, chrono::Utc::now())? {
//!     println!("presentation time {:?}", unit.pts);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use mediarelay_core::{
    duration_to_ticks, ticks_to_duration, Clock, GlobalTimeDecoder, ManualClock, RelayError,
    RelayResult, RtpHeader, RtpPacket, SystemClock, TimestampDecoder, TrackHandle,
};

pub use mediarelay_media::{
    new_processor, set_timestamp, ErrorCategory, Format, GenericFormat, H264Format, H265Format,
    MediaError, MediaResult, MediaTrack, OpusFormat, Payload, Processor, ProcessorConfig,
    TrackStats, Unit, Vp8Format,
};

// Public API modules
pub mod config;
pub mod error;
pub mod logging;
pub mod session;

// Re-export main API types
pub use config::RelayConfig;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use session::RelaySession;
