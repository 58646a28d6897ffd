//! RTP timestamp arithmetic
//!
//! Conversion between media-clock ticks and durations, and a stateful decoder
//! that turns the wrapping 32-bit RTP timestamp into a continuous tick count.

use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Differences above this are treated as a backward jump, not a forward step
const NEGATIVE_THRESHOLD: u32 = u32::MAX / 2;

/// Scale a duration to media-clock ticks.
///
/// The duration is split into whole seconds and a sub-second remainder; the
/// seconds are multiplied by the clock rate first and the scaled remainder is
/// added afterwards. The seconds product wraps in 64 bits, which is exact
/// modulo 2^32, so truncating the result to an RTP timestamp never loses
/// information. The remainder term rounds down by less than one tick.
pub fn duration_to_ticks(value: Duration, clock_rate: u32) -> u64 {
    let secs = value.as_secs();
    let dec = value.subsec_nanos() as u64;
    let rate = clock_rate as u64;
    secs.wrapping_mul(rate)
        .wrapping_add(dec * rate / NANOS_PER_SEC)
}

/// Convert media-clock ticks to a duration, splitting into whole seconds first.
pub fn ticks_to_duration(ticks: u64, clock_rate: u32) -> Duration {
    debug_assert!(clock_rate > 0, "clock rate must be positive");
    let rate = clock_rate as u64;
    let secs = ticks / rate;
    let dec = ticks % rate;
    Duration::new(secs, (dec * NANOS_PER_SEC / rate) as u32)
}

/// Unwraps RTP timestamps of a single track.
///
/// The first decoded timestamp becomes the baseline. Every following timestamp
/// is compared with the previous one: a forward step of up to half the
/// counter range (wraparound included) advances the total, anything larger
/// is a backward jump by the complementary amount.
#[derive(Debug, Clone)]
pub struct TimestampDecoder {
    clock_rate: u32,
    prev: Option<u32>,
    overall: i64,
}

impl TimestampDecoder {
    /// Create a decoder for a media clock running at `clock_rate` Hz
    pub fn new(clock_rate: u32) -> Self {
        debug_assert!(clock_rate > 0, "clock rate must be positive");
        Self {
            clock_rate,
            prev: None,
            overall: 0,
        }
    }

    /// Clock rate the decoder was created with
    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Feed a raw timestamp and get the signed tick count since the baseline
    pub fn decode(&mut self, ts: u32) -> i64 {
        let Some(prev) = self.prev else {
            self.prev = Some(ts);
            return 0;
        };

        let diff = ts.wrapping_sub(prev);
        if diff > NEGATIVE_THRESHOLD {
            self.overall -= prev.wrapping_sub(ts) as i64;
        } else {
            self.overall += diff as i64;
        }
        self.prev = Some(ts);

        self.overall
    }

    /// Feed a raw timestamp and get the elapsed time since the baseline.
    ///
    /// Timestamps earlier than the baseline saturate at zero.
    pub fn decode_duration(&mut self, ts: u32) -> Duration {
        let ticks = self.decode(ts);
        ticks_to_duration(ticks.max(0) as u64, self.clock_rate)
    }
}

/// Shift `base` by a signed tick count, saturating at zero
pub fn offset_by_ticks(base: Duration, ticks: i64, clock_rate: u32) -> Duration {
    let delta = ticks_to_duration(ticks.unsigned_abs(), clock_rate);
    if ticks >= 0 {
        base.saturating_add(delta)
    } else {
        base.saturating_sub(delta)
    }
}
