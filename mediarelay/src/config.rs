//! Configuration types and defaults

use crate::error::{Error, Result};
use mediarelay_media::ProcessorConfig;
use serde::{Deserialize, Serialize};

/// Global relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Enable debug logging
    pub debug_logging: bool,
    /// Log filter directives, e.g. `mediarelay_media=trace`
    pub log_filter: Option<String>,
    /// Settings shared by all track processors
    pub processor: ProcessorConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            debug_logging: false,
            log_filter: None,
            processor: ProcessorConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config {
            reason: e.to_string(),
        })?;
        config.processor.validate()?;
        Ok(config)
    }

    /// Filter directives used when `RUST_LOG` is not set
    pub fn default_log_filter(&self) -> String {
        if let Some(filter) = &self.log_filter {
            return filter.clone();
        }
        if self.debug_logging {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    }
}
