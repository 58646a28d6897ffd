//! # mediarelay core
//!
//! RTP wire format and the session-wide presentation clock for mediarelay.
//! This crate turns the raw, wrapping 32-bit timestamps of independently
//! arriving tracks into presentation times that share one origin.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod rtp;
pub mod rtptime;
pub mod time_decoder;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{RelayError, RelayResult};
pub use rtp::{RtpExtension, RtpHeader, RtpPacket, MAX_CSRC_COUNT, RTP_HEADER_SIZE, RTP_VERSION};
pub use rtptime::{duration_to_ticks, ticks_to_duration, TimestampDecoder};
pub use time_decoder::{GlobalTimeDecoder, TrackHandle};
