//! Error types of the facade crate

use mediarelay_media::MediaError;
use thiserror::Error;

/// Errors raised while setting up a relay session
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be parsed
    #[error("Invalid configuration: {reason}")]
    Config {
        /// Failure reason
        reason: String,
    },

    /// Logging could not be initialized
    #[error("Logging initialization failed: {reason}")]
    Logging {
        /// Failure reason
        reason: String,
    },

    /// Track setup or processing failed
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Result type alias for facade operations
pub type Result<T> = std::result::Result<T, Error>;
