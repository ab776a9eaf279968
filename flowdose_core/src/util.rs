//! Small time helpers shared by the engine loops.

use std::time::Duration;

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Duration as whole milliseconds, saturating at `u64::MAX`.
#[inline]
pub fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Seconds elapsed between two monotonic millisecond stamps, saturating at 0.
#[inline]
pub fn dt_seconds(from_ms: u64, to_ms: u64) -> f64 {
    to_ms.saturating_sub(from_ms) as f64 / MILLIS_PER_SEC as f64
}
