//! Relay sessions
//!
//! A [`RelaySession`] groups the tracks of one incoming stream. All of its
//! tracks share a single [`GlobalTimeDecoder`], so their presentation times
//! start from the same origin.

use crate::config::RelayConfig;
use crate::error::Result;
use mediarelay_core::{Clock, GlobalTimeDecoder, SystemClock};
use mediarelay_media::{Format, MediaTrack};
use std::sync::Arc;

/// Tracks of one stream and their shared presentation clock
#[derive(Debug)]
pub struct RelaySession {
    config: RelayConfig,
    decoder: Arc<GlobalTimeDecoder>,
    tracks: Vec<MediaTrack>,
}

impl RelaySession {
    /// Create a session with one track per format
    pub fn new(config: RelayConfig, formats: impl IntoIterator<Item = Format>) -> Result<Self> {
        Self::with_clock(config, formats, Arc::new(SystemClock))
    }

    /// Create a session whose presentation clock reads time from `clock`
    pub fn with_clock(
        config: RelayConfig,
        formats: impl IntoIterator<Item = Format>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let decoder = Arc::new(GlobalTimeDecoder::with_clock(clock));
        let tracks = formats
            .into_iter()
            .map(|format| MediaTrack::new(format, &config.processor, decoder.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::info!(
            "Session created with {} tracks: {}",
            tracks.len(),
            tracks
                .iter()
                .map(|t| t.format().codec())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            config,
            decoder,
            tracks,
        })
    }

    /// Session configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Presentation clock shared by the tracks
    pub fn decoder(&self) -> &Arc<GlobalTimeDecoder> {
        &self.decoder
    }

    /// Tracks, in the order of their formats
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Mutable access to the tracks
    pub fn tracks_mut(&mut self) -> &mut [MediaTrack] {
        &mut self.tracks
    }

    /// Track at `index`
    pub fn track_mut(&mut self, index: usize) -> Option<&mut MediaTrack> {
        self.tracks.get_mut(index)
    }

    /// Tell every track whether readers that need decoded payloads are attached
    pub fn set_has_non_rtsp_readers(&mut self, value: bool) {
        for track in &mut self.tracks {
            track.set_has_non_rtsp_readers(value);
        }
    }

    /// Split the session into its tracks, e.g. to drive each from its own task
    pub fn into_tracks(self) -> Vec<MediaTrack> {
        self.tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediarelay_media::{GenericFormat, H264Format};

    #[test]
    fn test_tracks_share_decoder() {
        let formats = vec![
            Format::H264(H264Format::new(96)),
            Format::Generic(GenericFormat::new(0, None).unwrap()),
        ];
        let mut session = RelaySession::new(RelayConfig::default(), formats).unwrap();

        assert_eq!(session.tracks().len(), 2);
        assert_ne!(session.tracks()[0].handle(), session.tracks()[1].handle());
        assert_eq!(Arc::strong_count(session.decoder()), 3);

        session.set_has_non_rtsp_readers(true);
        assert!(session.track_mut(1).unwrap().has_non_rtsp_readers());
        assert!(session.track_mut(2).is_none());
    }

    #[test]
    fn test_invalid_processor_config() {
        let mut config = RelayConfig::default();
        config.processor.udp_max_payload_size = 0;
        let result = RelaySession::new(config, vec![Format::H264(H264Format::new(96))]);
        assert!(result.is_err());
    }
}
