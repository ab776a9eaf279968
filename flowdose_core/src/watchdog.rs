//! Sampling-loop liveness supervision.
//!
//! The sampling loop feeds a heartbeat every iteration; the supervisor
//! checks the stall interval against a bounded limit and, on expiry, forces
//! every actuator off before the process is restarted. A control loop that
//! has gone quiet must never leave an actuator in an unknown active state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared last-serviced stamp (monotonic milliseconds).
#[derive(Debug, Clone, Default)]
pub struct Heartbeat(Arc<AtomicU64>);

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beat(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::Relaxed);
    }

    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.0.load(Ordering::Relaxed))
    }
}

/// Effective stall limit: the configured timeout floored at two sample
/// periods, so a single missed deadline can never trip the supervisor.
#[inline]
pub fn stall_limit_ms(configured_timeout_ms: u64, period_ms: u64) -> u64 {
    configured_timeout_ms
        .max(period_ms.saturating_mul(2))
        .max(1)
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    heartbeat: Heartbeat,
    limit_ms: u64,
}

impl Watchdog {
    pub fn new(heartbeat: Heartbeat, configured_timeout_ms: u64, period_ms: u64) -> Self {
        Self {
            heartbeat,
            limit_ms: stall_limit_ms(configured_timeout_ms, period_ms),
        }
    }

    pub fn limit_ms(&self) -> u64 {
        self.limit_ms
    }

    /// Stall interval when expired, None while healthy.
    pub fn expired(&self, now_ms: u64) -> Option<u64> {
        let stalled = self.heartbeat.stalled_for(now_ms);
        (stalled > self.limit_ms).then_some(stalled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_floors_at_two_periods() {
        assert_eq!(stall_limit_ms(5_000, 100), 5_000);
        assert_eq!(stall_limit_ms(50, 100), 200);
        assert_eq!(stall_limit_ms(0, 0), 1);
    }

    #[test]
    fn expires_only_past_the_limit() {
        let hb = Heartbeat::new();
        let dog = Watchdog::new(hb.clone(), 500, 100);
        hb.beat(1_000);
        assert_eq!(dog.expired(1_400), None);
        assert_eq!(dog.expired(1_500), None);
        assert_eq!(dog.expired(1_501), Some(501));
    }

    #[test]
    fn beating_resets_the_stall_interval() {
        let hb = Heartbeat::new();
        let dog = Watchdog::new(hb.clone(), 500, 100);
        hb.beat(0);
        assert!(dog.expired(501).is_some());
        hb.beat(501);
        assert_eq!(dog.expired(900), None);
    }
}
