//! Error types for mediarelay core

use thiserror::Error;

/// Main error type for RTP wire format operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Buffer ended before a complete field could be read
    #[error("Buffer too small: required {required} bytes, available {available}")]
    BufferTooSmall {
        /// Number of bytes needed
        required: usize,
        /// Number of bytes left in the buffer
        available: usize,
    },

    /// Unsupported RTP version
    #[error("Unsupported RTP version: {version}")]
    UnsupportedVersion {
        /// Version found in the header
        version: u8,
    },

    /// Structurally invalid packet
    #[error("Invalid packet: {reason}")]
    InvalidPacket {
        /// Reason the packet was rejected
        reason: String,
    },
}

impl RelayError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            RelayError::BufferTooSmall { .. } => "BUFFER_TOO_SMALL".to_string(),
            RelayError::UnsupportedVersion { .. } => "UNSUPPORTED_VERSION".to_string(),
            RelayError::InvalidPacket { .. } => "INVALID_PACKET".to_string(),
        }
    }
}

/// Result type alias for core operations
pub type RelayResult<T> = Result<T, RelayError>;
