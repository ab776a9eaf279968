//! Flow-signal conditioning: span calibration and recursive noise filtering.
//!
//! A raw ADC reading is first mapped linearly from the calibrated low/high
//! thresholds onto L/min and clamped at zero (reverse flow is physically
//! invalid and must never propagate), then smoothed by a one-dimensional
//! recursive filter before the integrator sees it.

use flowdose_config::{FilterCfg, SensorCfg};

/// One-dimensional recursive (Kalman-style) estimator.
///
/// Deterministic and O(1) per update; parameters are fixed at construction.
/// The estimate converges monotonically toward a constant input.
#[derive(Debug, Clone, Copy)]
pub struct FlowFilter {
    q: f64,
    r: f64,
    p: f64,
    x: f64,
}

impl FlowFilter {
    pub fn new(cfg: &FilterCfg) -> Self {
        Self {
            q: cfg.process_noise,
            r: cfg.measurement_noise,
            p: cfg.initial_covariance,
            x: 0.0,
        }
    }

    /// Fold one measurement into the estimate and return the new estimate.
    pub fn update(&mut self, measurement: f64) -> f64 {
        self.p += self.q;
        let k = self.p / (self.p + self.r);
        self.x += k * (measurement - self.x);
        self.p = (1.0 - k) * self.p;
        self.x
    }

    /// Current estimate without folding in a new measurement.
    pub fn estimate(&self) -> f64 {
        self.x
    }
}

impl Default for FlowFilter {
    fn default() -> Self {
        Self::new(&FilterCfg::default())
    }
}

/// Linear span calibration from raw ADC counts to L/min.
#[derive(Debug, Clone, Copy)]
pub struct SensorSpan {
    low_counts: i32,
    counts_span: f64,
    full_scale_lpm: f64,
}

impl SensorSpan {
    pub fn new(cfg: &SensorCfg) -> Self {
        Self {
            low_counts: cfg.adc_low_counts,
            counts_span: f64::from(cfg.adc_high_counts.saturating_sub(cfg.adc_low_counts).max(1)),
            full_scale_lpm: cfg.full_scale_lpm,
        }
    }

    /// Map raw counts to L/min, clamped at zero.
    pub fn to_lpm(&self, raw: i32) -> f64 {
        let delta = f64::from(raw) - f64::from(self.low_counts);
        let lpm = delta * self.full_scale_lpm / self.counts_span;
        if lpm > 0.0 { lpm } else { 0.0 }
    }
}

impl Default for SensorSpan {
    fn default() -> Self {
        Self::new(&SensorCfg::default())
    }
}
