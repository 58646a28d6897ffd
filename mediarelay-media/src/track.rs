//! Media tracks
//!
//! A [`MediaTrack`] owns the processor of one track and feeds it with
//! presentation times taken from the session's [`GlobalTimeDecoder`].

use crate::config::ProcessorConfig;
use crate::error::MediaResult;
use crate::format::Format;
use crate::processor::{new_processor, Processor};
use crate::unit::Unit;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use mediarelay_core::{GlobalTimeDecoder, RtpPacket, TrackHandle};
use std::sync::Arc;

/// Per-track counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackStats {
    /// RTP packets handed to the track
    pub packets_received: u64,
    /// Packets dropped because the track had no presentation time yet
    pub packets_waiting_for_sync: u64,
    /// Units that went through the processor
    pub units_processed: u64,
    /// Units rejected by the processor
    pub units_discarded: u64,
}

/// One track of a stream
#[derive(Debug)]
pub struct MediaTrack {
    handle: TrackHandle,
    format: Format,
    processor: Box<dyn Processor>,
    decoder: Arc<GlobalTimeDecoder>,
    has_non_rtsp_readers: bool,
    stats: TrackStats,
}

impl MediaTrack {
    /// Create a track timed by `decoder`
    pub fn new(
        format: Format,
        config: &ProcessorConfig,
        decoder: Arc<GlobalTimeDecoder>,
    ) -> MediaResult<Self> {
        let processor = new_processor(config, &format)?;
        Ok(Self {
            handle: TrackHandle::new(),
            format,
            processor,
            decoder,
            has_non_rtsp_readers: false,
            stats: TrackStats::default(),
        })
    }

    /// Identity of the track in the time decoder
    pub fn handle(&self) -> &TrackHandle {
        &self.handle
    }

    /// Format of the track
    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Counters
    pub fn stats(&self) -> TrackStats {
        self.stats
    }

    /// Whether readers that need decoded payloads are attached
    pub fn has_non_rtsp_readers(&self) -> bool {
        self.has_non_rtsp_readers
    }

    /// Tell the track whether readers that need decoded payloads are attached
    pub fn set_has_non_rtsp_readers(&mut self, value: bool) {
        self.has_non_rtsp_readers = value;
    }

    /// Process a received RTP packet.
    ///
    /// Returns `Ok(None)` until the track has received a packet that can
    /// anchor it on the session clock.
    pub fn write_rtp_packet(
        &mut self,
        packet: RtpPacket,
        ntp: DateTime<Utc>,
    ) -> MediaResult<Option<Unit>> {
        self.stats.packets_received += 1;

        let pts_equals_dts = self.format.pts_equals_dts(&packet);
        let Some(pts) = self.decoder.decode(
            &self.handle,
            self.format.clock_rate(),
            pts_equals_dts,
            &packet,
        ) else {
            self.stats.packets_waiting_for_sync += 1;
            return Ok(None);
        };

        let unit = self.processor.unit_for_rtp_packet(packet, ntp, pts);
        self.process(unit).map(Some)
    }

    /// Parse and process a received RTP datagram
    pub fn write_rtp_bytes(&mut self, data: Bytes, ntp: DateTime<Utc>) -> MediaResult<Option<Unit>> {
        let packet = match RtpPacket::unmarshal(data) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.packets_received += 1;
                self.stats.units_discarded += 1;
                tracing::warn!("{} track {}: {}", self.format.codec(), self.handle.label(), err);
                return Err(err.into());
            }
        };
        self.write_rtp_packet(packet, ntp)
    }

    /// Process a unit that did not arrive over RTP
    pub fn write_unit(&mut self, unit: Unit) -> MediaResult<Unit> {
        self.process(unit)
    }

    fn process(&mut self, mut unit: Unit) -> MediaResult<Unit> {
        match self.processor.process(&mut unit, self.has_non_rtsp_readers) {
            Ok(()) => {
                self.stats.units_processed += 1;
                Ok(unit)
            }
            Err(err) => {
                self.stats.units_discarded += 1;
                tracing::warn!(
                    "{} track {}: discarding unit: {}",
                    self.format.codec(),
                    self.handle.label(),
                    err
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{GenericFormat, H264Format, H265Format};
    use crate::unit::Payload;
    use mediarelay_core::{ManualClock, RtpHeader};
    use std::time::Duration;

    fn packet(seq: u16, timestamp: u32, payload: &'static [u8]) -> RtpPacket {
        let mut header = RtpHeader::new(96, seq, timestamp, 0x0102_0304);
        header.marker = true;
        RtpPacket::new(header, Bytes::from_static(payload))
    }

    #[test]
    fn test_waits_for_random_access_point() {
        let decoder = Arc::new(GlobalTimeDecoder::new());
        let mut track = MediaTrack::new(
            Format::H264(H264Format::new(96)),
            &ProcessorConfig::default(),
            decoder.clone(),
        )
        .unwrap();

        let unit = track.write_rtp_packet(packet(1, 1000, &[0x41, 0x9a]), Utc::now()).unwrap();
        assert!(unit.is_none());
        assert_eq!(decoder.track_count(), 0);

        let unit = track.write_rtp_packet(packet(2, 4000, &[0x65, 0x88]), Utc::now()).unwrap();
        assert!(unit.is_some());

        let unit = track
            .write_rtp_packet(packet(3, 4000 + 9000, &[0x41, 0x9a]), Utc::now())
            .unwrap()
            .unwrap();
        let start = decoder.start_pts(track.handle()).unwrap();
        assert_eq!(unit.pts, start + Duration::from_millis(100));

        let stats = track.stats();
        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.packets_waiting_for_sync, 1);
        assert_eq!(stats.units_processed, 2);
    }

    #[test]
    fn test_h265_waits_for_irap_picture() {
        let decoder = Arc::new(GlobalTimeDecoder::new());
        let mut track = MediaTrack::new(
            Format::H265(H265Format::new(96)),
            &ProcessorConfig::default(),
            decoder.clone(),
        )
        .unwrap();

        // Trailing picture, possibly a B-frame
        let unit = track.write_rtp_packet(packet(1, 1000, &[0x02, 0x01, 0xd0]), Utc::now()).unwrap();
        assert!(unit.is_none());
        assert_eq!(decoder.track_count(), 0);

        // CRA picture
        let unit = track.write_rtp_packet(packet(2, 4000, &[0x2a, 0x01, 0xaf]), Utc::now()).unwrap();
        assert!(unit.is_some());
        assert_eq!(track.stats().packets_waiting_for_sync, 1);
    }

    #[test]
    fn test_second_track_starts_later() {
        let clock = Arc::new(ManualClock::new());
        let decoder = Arc::new(GlobalTimeDecoder::with_clock(clock.clone()));
        let format = Format::Generic(GenericFormat::new(0, None).unwrap());
        let config = ProcessorConfig::default();

        let mut first = MediaTrack::new(format.clone(), &config, decoder.clone()).unwrap();
        let mut second = MediaTrack::new(format, &config, decoder).unwrap();

        let a = first.write_rtp_packet(packet(1, 0, &[0]), Utc::now()).unwrap().unwrap();
        clock.advance(Duration::from_millis(200));
        let b = second.write_rtp_packet(packet(1, 5555, &[0]), Utc::now()).unwrap().unwrap();

        assert_eq!(a.pts, Duration::ZERO);
        assert_eq!(b.pts, Duration::from_millis(200));
    }

    #[test]
    fn test_discarded_units_are_counted() {
        let decoder = Arc::new(GlobalTimeDecoder::new());
        let mut track = MediaTrack::new(
            Format::Generic(GenericFormat::new(0, None).unwrap()),
            &ProcessorConfig::default(),
            decoder,
        )
        .unwrap();

        assert!(track.write_rtp_bytes(Bytes::from_static(&[0x80, 0x00]), Utc::now()).is_err());

        let wrong = Unit::new(Utc::now(), Duration::ZERO, Payload::Vp8(Bytes::new()));
        assert!(track.write_unit(wrong).is_err());
        assert_eq!(track.stats().units_discarded, 2);
    }
}
