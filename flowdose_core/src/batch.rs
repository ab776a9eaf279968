//! Batch lifecycle state machine and volume integrator.
//!
//! `BatchController` is the single authority over the dosing state. Nothing
//! outside this module mutates a field directly: the engine loops call the
//! transition methods under one mutex and observe the result through
//! [`BatchSnapshot`]. State transitions append [`BatchEvent`]s to an internal
//! queue drained by the engine, so the controller holds no reference to the
//! publisher or the store.
//!
//! States: **Idle** (relay off, target not reached), **Running** (relay on)
//! and **Completed** (target reached, relay off). A pause is Idle with a
//! non-zero accumulator; only the accumulator distinguishes it from a fresh
//! batch.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use flowdose_config::BatchCfg;

use crate::telemetry::CompletionReport;

/// Reasons a control command is refused. Refusals are pure no-ops; the
/// caller is informed through the resync broadcast, never a partial apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Targets and resets are locked out while dosing.
    RelayActive,
    /// A new target must exceed the volume already accumulated.
    TargetNotAboveVolume,
    /// Targets must be finite and positive.
    NonPositiveTarget,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RelayActive => write!(f, "system is running"),
            Self::TargetNotAboveVolume => write!(f, "target not above accumulated volume"),
            Self::NonPositiveTarget => write!(f, "target must be a positive number"),
        }
    }
}

/// Outcome of applying one control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    /// Already in the requested state (e.g. start while running).
    NoOp,
    Rejected(RejectReason),
}

/// Domain events appended by transitions and drained by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// Observable state changed; every consumer should get a fresh status.
    Resync,
    /// The accumulator crossed the target. Fires exactly once per batch.
    Completed(CompletionReport),
    /// The accumulator should be persisted now (manual stop or reset).
    SaveRequested(f64),
}

/// Read-only view for telemetry and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSnapshot {
    pub flow_lpm: f64,
    pub volume_l: f64,
    pub target_l: f64,
    pub elapsed_s: u64,
    pub target_reached: bool,
    pub relay_active: bool,
    pub valve_active: bool,
    pub pause_count: u32,
}

pub struct BatchController {
    new_batch_epsilon_l: f64,
    target_l: f64,
    volume_l: f64,
    flow_lpm: f64,
    relay_active: bool,
    valve_active: bool,
    target_reached: bool,
    /// Monotonic stamp of the last relay-on edge; Some iff relay_active.
    relay_since_ms: Option<u64>,
    /// Run time accrued over completed run spans of the current batch.
    accumulated_ms: u64,
    batch_start_wall: Option<DateTime<Utc>>,
    batch_start_ms: u64,
    pause_count: u32,
    events: VecDeque<BatchEvent>,
}

impl fmt::Debug for BatchController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchController")
            .field("volume_l", &self.volume_l)
            .field("target_l", &self.target_l)
            .field("relay_active", &self.relay_active)
            .field("target_reached", &self.target_reached)
            .field("pause_count", &self.pause_count)
            .finish()
    }
}

impl BatchController {
    /// Boot-time construction, seeded with the persisted accumulator.
    ///
    /// The seed is clamped into `[0, target]`; a seed at or above the target
    /// boots as Completed so the relay cannot re-engage past the goal.
    pub fn new(cfg: &BatchCfg, initial_volume_l: f64) -> Self {
        let target_l = cfg.default_target_l;
        let volume_l = if initial_volume_l.is_finite() {
            initial_volume_l.clamp(0.0, target_l)
        } else {
            0.0
        };
        Self {
            new_batch_epsilon_l: cfg.new_batch_epsilon_l,
            target_l,
            volume_l,
            flow_lpm: 0.0,
            relay_active: false,
            valve_active: false,
            target_reached: volume_l >= target_l,
            relay_since_ms: None,
            accumulated_ms: 0,
            batch_start_wall: None,
            batch_start_ms: 0,
            pause_count: 0,
            events: VecDeque::new(),
        }
    }

    // ── Transitions ─────────────────────────────────────────────────────

    /// Engage the relay. No-op while already Running. Starting out of
    /// Completed zeroes the accumulator first; a start with an (almost)
    /// empty accumulator begins a new batch and resets the pause counter
    /// and batch anchors.
    pub fn start(&mut self, now_ms: u64, now_utc: DateTime<Utc>) -> CommandOutcome {
        if self.relay_active {
            return CommandOutcome::NoOp;
        }
        let was_completed = self.target_reached;
        if was_completed {
            self.volume_l = 0.0;
            self.accumulated_ms = 0;
            self.target_reached = false;
        }
        if self.volume_l <= self.new_batch_epsilon_l || was_completed {
            self.pause_count = 0;
            self.batch_start_wall = Some(now_utc);
            self.batch_start_ms = now_ms;
            tracing::info!(target_l = self.target_l, "batch started");
        } else {
            tracing::info!(volume_l = self.volume_l, "batch resumed");
        }
        self.relay_active = true;
        self.relay_since_ms = Some(now_ms);
        self.push(BatchEvent::Resync);
        self.check_invariants();
        CommandOutcome::Applied
    }

    /// Disengage the relay (pause). No-op while Idle or Completed.
    pub fn stop(&mut self, now_ms: u64) -> CommandOutcome {
        if !self.relay_active {
            return CommandOutcome::NoOp;
        }
        self.finalize_run_span(now_ms);
        self.pause_count = self.pause_count.saturating_add(1);
        self.relay_active = false;
        tracing::info!(
            volume_l = self.volume_l,
            pause_count = self.pause_count,
            "batch paused"
        );
        self.push(BatchEvent::SaveRequested(self.volume_l));
        self.push(BatchEvent::Resync);
        self.check_invariants();
        CommandOutcome::Applied
    }

    pub fn toggle_relay(&mut self, now_ms: u64, now_utc: DateTime<Utc>) -> CommandOutcome {
        if self.relay_active {
            self.stop(now_ms)
        } else {
            self.start(now_ms, now_utc)
        }
    }

    /// The valve is independent of the batch lifecycle.
    pub fn toggle_valve(&mut self) -> CommandOutcome {
        self.valve_active = !self.valve_active;
        self.push(BatchEvent::Resync);
        CommandOutcome::Applied
    }

    /// One integration step, invoked every sampling period with the already
    /// filtered flow. Crossing the target clamps the accumulator, forces the
    /// relay off and emits the batch's single completion event.
    pub fn tick(&mut self, now_ms: u64, now_utc: DateTime<Utc>, dt_s: f64, flow_lpm: f64) {
        self.flow_lpm = if flow_lpm.is_finite() && flow_lpm > 0.0 {
            flow_lpm
        } else {
            0.0
        };
        if !self.relay_active || self.target_reached {
            return;
        }
        if dt_s.is_finite() && dt_s > 0.0 {
            self.volume_l += (self.flow_lpm / 60.0) * dt_s;
        }
        if self.volume_l >= self.target_l {
            self.volume_l = self.target_l;
            self.target_reached = true;
            self.relay_active = false;
            self.finalize_run_span(now_ms);
            let report = CompletionReport::new(
                self.batch_start_wall.unwrap_or(now_utc),
                now_utc,
                now_ms.saturating_sub(self.batch_start_ms),
                self.pause_count,
                self.volume_l,
                self.target_l,
            );
            tracing::info!(volume_l = self.volume_l, "target reached; relay forced off");
            self.push(BatchEvent::Completed(report));
            self.push(BatchEvent::Resync);
        }
        self.check_invariants();
    }

    /// Change the batch goal. Locked out while Running; the new goal must
    /// exceed whatever has already accumulated.
    pub fn set_target(&mut self, target_l: f64) -> CommandOutcome {
        if self.relay_active {
            return CommandOutcome::Rejected(RejectReason::RelayActive);
        }
        if !(target_l.is_finite() && target_l > 0.0) {
            return CommandOutcome::Rejected(RejectReason::NonPositiveTarget);
        }
        if target_l <= self.volume_l {
            return CommandOutcome::Rejected(RejectReason::TargetNotAboveVolume);
        }
        self.target_l = target_l;
        self.target_reached = false;
        tracing::info!(target_l, "target updated");
        self.push(BatchEvent::Resync);
        self.check_invariants();
        CommandOutcome::Applied
    }

    /// Zero the accumulator and run time. Locked out while Running. The
    /// pause counter is left for `start()` to reset, which it will: a zeroed
    /// accumulator makes the next start a new batch.
    pub fn reset(&mut self) -> CommandOutcome {
        if self.relay_active {
            return CommandOutcome::Rejected(RejectReason::RelayActive);
        }
        self.volume_l = 0.0;
        self.accumulated_ms = 0;
        self.target_reached = false;
        tracing::info!("batch reset");
        self.push(BatchEvent::SaveRequested(0.0));
        self.push(BatchEvent::Resync);
        self.check_invariants();
        CommandOutcome::Applied
    }

    /// Queue a resync without a state change (rejected/unparseable command).
    pub fn request_resync(&mut self) {
        self.push(BatchEvent::Resync);
    }

    // ── Observation ─────────────────────────────────────────────────────

    pub fn drain_events(&mut self) -> Vec<BatchEvent> {
        self.events.drain(..).collect()
    }

    /// Run time including the live span while the relay is engaged.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        let mut total = self.accumulated_ms;
        if self.relay_active
            && let Some(since) = self.relay_since_ms
        {
            total = total.saturating_add(now_ms.saturating_sub(since));
        }
        total
    }

    pub fn snapshot(&self, now_ms: u64) -> BatchSnapshot {
        BatchSnapshot {
            flow_lpm: self.flow_lpm,
            volume_l: self.volume_l,
            target_l: self.target_l,
            elapsed_s: self.elapsed_ms(now_ms) / crate::util::MILLIS_PER_SEC,
            target_reached: self.target_reached,
            relay_active: self.relay_active,
            valve_active: self.valve_active,
            pause_count: self.pause_count,
        }
    }

    pub fn volume_l(&self) -> f64 {
        self.volume_l
    }
    pub fn target_l(&self) -> f64 {
        self.target_l
    }
    pub fn flow_lpm(&self) -> f64 {
        self.flow_lpm
    }
    pub fn relay_active(&self) -> bool {
        self.relay_active
    }
    pub fn valve_active(&self) -> bool {
        self.valve_active
    }
    pub fn target_reached(&self) -> bool {
        self.target_reached
    }
    pub fn pause_count(&self) -> u32 {
        self.pause_count
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn finalize_run_span(&mut self, now_ms: u64) {
        if let Some(since) = self.relay_since_ms.take() {
            self.accumulated_ms = self
                .accumulated_ms
                .saturating_add(now_ms.saturating_sub(since));
        }
    }

    fn push(&mut self, ev: BatchEvent) {
        self.events.push_back(ev);
    }

    #[inline]
    fn check_invariants(&self) {
        debug_assert!(
            self.volume_l >= 0.0 && self.volume_l <= self.target_l,
            "accumulator out of [0, target]: {} / {}",
            self.volume_l,
            self.target_l
        );
        debug_assert!(
            !(self.relay_active && self.target_reached),
            "relay engaged past completion"
        );
        debug_assert_eq!(self.relay_active, self.relay_since_ms.is_some());
    }
}
