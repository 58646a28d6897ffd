//! Cross-track presentation clock
//!
//! A [`GlobalTimeDecoder`] is shared by every track of one stream session. It
//! converts each track's RTP timestamps into presentation times measured from
//! a single anchor: the instant at which the first track of the session
//! delivered its first usable sample. Tracks that start later are offset by
//! the wall-clock distance between their own first sample and that anchor, so
//! presentation times of different tracks can be compared directly.

use crate::clock::{Clock, SystemClock};
use crate::rtp::RtpPacket;
use crate::rtptime::{offset_by_ticks, TimestampDecoder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Opaque identity of a track.
///
/// Handles compare by identity, not by value: clones of a handle refer to the
/// same track, while two handles obtained from separate [`TrackHandle::new`]
/// calls are always different tracks. State keyed by a handle lives as long as
/// the structure that stores it and keeps the handle alive, so an identity is
/// never recycled for another track.
#[derive(Clone)]
pub struct TrackHandle {
    inner: Arc<TrackToken>,
}

struct TrackToken {
    label: Uuid,
}

impl TrackHandle {
    /// Allocate a new track identity
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackToken {
                label: Uuid::new_v4(),
            }),
        }
    }

    /// Random label for log output; not part of the identity
    pub fn label(&self) -> Uuid {
        self.inner.label
    }
}

impl Default for TrackHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TrackHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TrackHandle {}

impl Hash for TrackHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.inner), state);
    }
}

impl fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackHandle({})", self.inner.label)
    }
}

#[derive(Debug)]
struct TrackTiming {
    start_pts: Duration,
    decoder: TimestampDecoder,
}

#[derive(Debug, Default)]
struct DecoderState {
    start_ntp: Option<Instant>,
    tracks: HashMap<TrackHandle, TrackTiming>,
}

/// Maps per-track RTP timestamps onto one session-wide presentation clock.
///
/// All state sits behind a single lock held for the whole [`decode`] call;
/// the critical section is a map lookup plus integer arithmetic.
///
/// [`decode`]: GlobalTimeDecoder::decode
#[derive(Debug)]
pub struct GlobalTimeDecoder {
    clock: Arc<dyn Clock>,
    state: Mutex<DecoderState>,
}

impl GlobalTimeDecoder {
    /// Create a decoder reading time from the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a decoder reading time from the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(DecoderState::default()),
        }
    }

    /// Compute the presentation time of `packet` on the session clock.
    ///
    /// Returns `None` when `track` has not been seen yet and this packet cannot
    /// serve as its baseline because its presentation time may differ from its
    /// decode time. Nothing is recorded in that case; callers keep offering
    /// packets until one qualifies.
    ///
    /// `clock_rate` is only read when the track is first seen.
    pub fn decode(
        &self,
        track: &TrackHandle,
        clock_rate: u32,
        pts_equals_dts: bool,
        packet: &RtpPacket,
    ) -> Option<Duration> {
        let mut state = self.state.lock();
        let DecoderState { start_ntp, tracks } = &mut *state;

        if let Some(timing) = tracks.get_mut(track) {
            let ticks = timing.decoder.decode(packet.header.timestamp);
            return Some(offset_by_ticks(
                timing.start_pts,
                ticks,
                timing.decoder.clock_rate(),
            ));
        }

        if !pts_equals_dts {
            return None;
        }

        let now = self.clock.now();
        let anchor = *start_ntp.get_or_insert_with(|| {
            tracing::debug!("Session clock anchored by track {}", track.label());
            now
        });
        let start_pts = now.saturating_duration_since(anchor);

        let mut decoder = TimestampDecoder::new(clock_rate);
        decoder.decode(packet.header.timestamp);

        tracing::debug!(
            "Track {} synchronized: clock rate {}, start PTS {:?}",
            track.label(),
            clock_rate,
            start_pts
        );
        tracks.insert(track.clone(), TrackTiming { start_pts, decoder });

        Some(start_pts)
    }

    /// Instant that anchors the session clock, once any track is synchronized
    pub fn anchor(&self) -> Option<Instant> {
        self.state.lock().start_ntp
    }

    /// Offset of a synchronized track from the anchor
    pub fn start_pts(&self, track: &TrackHandle) -> Option<Duration> {
        self.state
            .lock()
            .tracks
            .get(track)
            .map(|timing| timing.start_pts)
    }

    /// Number of synchronized tracks
    pub fn track_count(&self) -> usize {
        self.state.lock().tracks.len()
    }
}

impl Default for GlobalTimeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rtp::RtpHeader;
    use bytes::Bytes;

    fn packet(timestamp: u32) -> RtpPacket {
        RtpPacket::new(RtpHeader::new(96, 0, timestamp, 1), Bytes::new())
    }

    fn manual() -> (Arc<ManualClock>, GlobalTimeDecoder) {
        let clock = Arc::new(ManualClock::new());
        let decoder = GlobalTimeDecoder::with_clock(clock.clone());
        (clock, decoder)
    }

    #[test]
    fn test_track_handle_identity() {
        let a = TrackHandle::new();
        let b = TrackHandle::new();
        let a2 = a.clone();

        assert_eq!(a, a2);
        assert_ne!(a, b);

        let mut map = HashMap::new();
        map.insert(a.clone(), 1);
        map.insert(b.clone(), 2);
        map.insert(a2, 3);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&a], 3);
    }

    #[test]
    fn test_first_track_anchors_session() {
        let (clock, decoder) = manual();
        let track = TrackHandle::new();

        assert!(decoder.anchor().is_none());
        assert_eq!(
            decoder.decode(&track, 90_000, true, &packet(1_000_000)),
            Some(Duration::ZERO)
        );
        assert_eq!(decoder.anchor(), Some(clock.now()));

        clock.advance(Duration::from_secs(5));
        assert_eq!(
            decoder.decode(&track, 90_000, true, &packet(1_000_000 + 90_000)),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_not_ready_until_pts_equals_dts() {
        let (clock, decoder) = manual();
        let track = TrackHandle::new();

        assert_eq!(decoder.decode(&track, 90_000, false, &packet(500)), None);
        assert_eq!(decoder.track_count(), 0);
        assert!(decoder.anchor().is_none());
        assert!(decoder.start_pts(&track).is_none());

        clock.advance(Duration::from_millis(40));
        assert_eq!(
            decoder.decode(&track, 90_000, true, &packet(4_100)),
            Some(Duration::ZERO)
        );
        assert_eq!(decoder.track_count(), 1);

        // Once synchronized, the flag no longer matters
        assert_eq!(
            decoder.decode(&track, 90_000, false, &packet(4_100 + 3_600)),
            Some(Duration::from_millis(40))
        );
    }

    #[test]
    fn test_late_track_is_offset_from_anchor() {
        let (clock, decoder) = manual();
        let video = TrackHandle::new();
        let audio = TrackHandle::new();

        let video_start = decoder.decode(&video, 90_000, true, &packet(7_000)).unwrap();
        clock.advance(Duration::from_millis(200));
        let audio_start = decoder.decode(&audio, 48_000, true, &packet(123)).unwrap();

        assert_eq!(video_start, Duration::ZERO);
        assert_eq!(audio_start, Duration::from_millis(200));
        assert_eq!(decoder.start_pts(&audio), Some(audio_start));
        assert_eq!(
            decoder.decode(&audio, 48_000, true, &packet(123 + 960)),
            Some(Duration::from_millis(220))
        );
    }

    #[test]
    fn test_distinct_handles_are_independent() {
        let (clock, decoder) = manual();
        let a = TrackHandle::new();
        let b = TrackHandle::new();

        decoder.decode(&a, 90_000, true, &packet(0));
        clock.advance(Duration::from_millis(10));
        // Same timestamp, different track: gets its own baseline
        assert_eq!(
            decoder.decode(&b, 90_000, true, &packet(0)),
            Some(Duration::from_millis(10))
        );
        assert_eq!(decoder.track_count(), 2);
    }

    #[test]
    fn test_wraparound_is_continuous() {
        let (_clock, decoder) = manual();
        let track = TrackHandle::new();

        let mut ts = u32::MAX - 4_500;
        let mut last = decoder.decode(&track, 90_000, true, &packet(ts)).unwrap();
        for _ in 0..6 {
            ts = ts.wrapping_add(1_500);
            let pts = decoder.decode(&track, 90_000, true, &packet(ts)).unwrap();
            assert!(pts > last);
            last = pts;
        }
        assert_eq!(last, Duration::from_millis(100));
    }

    #[test]
    fn test_reordered_sample_before_baseline_saturates() {
        let (clock, decoder) = manual();
        let first = TrackHandle::new();
        let second = TrackHandle::new();

        decoder.decode(&first, 90_000, true, &packet(9_000));
        assert_eq!(
            decoder.decode(&first, 90_000, true, &packet(0)),
            Some(Duration::ZERO)
        );

        clock.advance(Duration::from_millis(500));
        decoder.decode(&second, 90_000, true, &packet(9_000));
        assert_eq!(
            decoder.decode(&second, 90_000, true, &packet(0)),
            Some(Duration::from_millis(400))
        );
    }
}
