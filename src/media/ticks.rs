//! 100-nanosecond time units
//!
//! Positions and durations cross every boundary as integer ticks, the unit
//! used by `Windows.Foundation.TimeSpan`, so no floating-point drift builds up
//! between the host and the decode engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of ticks in one second
pub const TICKS_PER_SECOND: i64 = 10_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticks(pub i64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    pub fn from_secs(secs: i64) -> Self {
        Ticks(secs.saturating_mul(TICKS_PER_SECOND))
    }

    pub fn from_millis(millis: i64) -> Self {
        Ticks(millis.saturating_mul(TICKS_PER_SECOND / 1000))
    }

    /// Saturates at `i64::MAX` ticks (about 29 000 years)
    pub fn from_duration(duration: Duration) -> Self {
        let ticks = duration.as_nanos() / 100;
        Ticks(i64::try_from(ticks).unwrap_or(i64::MAX))
    }

    /// Negative tick counts clamp to zero
    ///
    /// Unbounded sources report `i64::MAX` ticks, which is past what
    /// nanoseconds in a `u64` can hold; those saturate to `Duration::MAX`.
    pub fn as_duration(self) -> Duration {
        (self.0.max(0) as u64)
            .checked_mul(100)
            .map_or(Duration::MAX, Duration::from_nanos)
    }

    pub fn saturating_add(self, other: Ticks) -> Ticks {
        Ticks(self.0.saturating_add(other.0))
    }
}

impl From<Duration> for Ticks {
    fn from(duration: Duration) -> Self {
        Ticks::from_duration(duration)
    }
}
