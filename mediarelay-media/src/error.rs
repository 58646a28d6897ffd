//! Media processing error types and handling
//!
//! This module defines the errors raised while normalizing media units,
//! providing clear error messages and context for the owning track.

use mediarelay_core::RelayError;
use thiserror::Error;

/// Main error type for media processing operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// RTP wire format error
    #[error("RTP error: {source}")]
    Rtp {
        #[from]
        source: RelayError,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Payload is structurally invalid for the codec
    #[error("Malformed {codec} payload: {reason}")]
    MalformedPayload {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// RTP packet larger than the maximum UDP payload
    #[error("payload size ({size}) is greater than maximum allowed ({max})")]
    PayloadTooBig {
        /// Marshalled packet size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Reassembled frame exceeds the codec limit
    #[error("{codec} frame size ({size}) is greater than maximum allowed ({max})")]
    FrameTooBig {
        /// Codec name
        codec: String,
        /// Frame size in bytes
        size: usize,
        /// Maximum frame size
        max: usize,
    },

    /// Access unit holds too many NAL units
    #[error("NAL unit count ({count}) exceeds maximum allowed ({max})")]
    TooManyNalUnits {
        /// Number of NAL units
        count: usize,
        /// Maximum number of NAL units
        max: usize,
    },

    /// Unit does not carry the payload kind this processor handles
    #[error("Invalid unit: expected {expected}, got {actual}")]
    InvalidUnit {
        /// Expected payload kind
        expected: String,
        /// Actual payload kind
        actual: String,
    },

    /// Packetization failed
    #[error("Encoding failed: {codec} - {reason}")]
    EncodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Shorthand for [`MediaError::MalformedPayload`]
    pub fn malformed(codec: &str, reason: impl Into<String>) -> Self {
        MediaError::MalformedPayload {
            codec: codec.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if dropping the offending unit is enough to carry on
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::Rtp { .. } => true,
            MediaError::MalformedPayload { .. } => true,
            MediaError::PayloadTooBig { .. } => true,
            MediaError::FrameTooBig { .. } => true,
            MediaError::TooManyNalUnits { .. } => true,
            MediaError::EncodingFailed { .. } => true,
            MediaError::InvalidConfiguration { .. } => false,
            MediaError::InvalidUnit { .. } => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Rtp { .. } => ErrorCategory::Transport,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::MalformedPayload { .. } => ErrorCategory::Codec,
            MediaError::PayloadTooBig { .. } => ErrorCategory::Data,
            MediaError::FrameTooBig { .. } => ErrorCategory::Data,
            MediaError::TooManyNalUnits { .. } => ErrorCategory::Data,
            MediaError::InvalidUnit { .. } => ErrorCategory::Format,
            MediaError::EncodingFailed { .. } => ErrorCategory::Codec,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport packet errors
    Transport,
    /// Configuration and parameter errors
    Configuration,
    /// Codec bitstream errors
    Codec,
    /// Format and unit kind mismatches
    Format,
    /// Size and limit violations
    Data,
}
