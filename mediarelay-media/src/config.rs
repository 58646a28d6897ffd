//! Processor configuration

use crate::error::{MediaError, MediaResult};
use mediarelay_core::RTP_HEADER_SIZE;
use serde::{Deserialize, Serialize};

/// Maximum UDP payload that avoids IP fragmentation on a 1500-byte MTU
pub const DEFAULT_UDP_MAX_PAYLOAD_SIZE: usize = 1472;

/// Settings shared by every processor of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Largest marshalled RTP packet a processor may forward or emit
    pub udp_max_payload_size: usize,
    /// Generate RTP packets for units that arrive without them.
    ///
    /// Sources that already deliver RTP leave this off; packets are then only
    /// regenerated when an incoming packet exceeds the size limit.
    pub generate_rtp_packets: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            udp_max_payload_size: DEFAULT_UDP_MAX_PAYLOAD_SIZE,
            generate_rtp_packets: false,
        }
    }
}

impl ProcessorConfig {
    /// Check that packets of this size can carry any payload at all
    pub fn validate(&self) -> MediaResult<()> {
        // Header plus the two-byte FU-A prefix and at least one payload byte
        if self.udp_max_payload_size <= RTP_HEADER_SIZE + 2 {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "udp_max_payload_size ({}) must be greater than {}",
                    self.udp_max_payload_size,
                    RTP_HEADER_SIZE + 2
                ),
            });
        }
        Ok(())
    }

    /// Room left for codec payload once the fixed RTP header is written
    pub fn max_rtp_payload_size(&self) -> usize {
        self.udp_max_payload_size - RTP_HEADER_SIZE
    }
}
