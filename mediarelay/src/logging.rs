//! Logging setup

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the filter derived from `config`. Fails if
/// a global subscriber is already installed.
pub fn init_logging(config: &RelayConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.default_log_filter()))
        .map_err(|e| Error::Logging {
            reason: e.to_string(),
        })?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::Logging {
            reason: e.to_string(),
        })?;

    tracing::info!("Logging initialized");
    Ok(())
}
