//! Telemetry documents and the best-effort publisher.
//!
//! Field names follow the deployed wire protocol, so existing dashboard
//! consumers keep working unmodified. Publishing is fire-and-forget: a
//! failed sink is logged and the next periodic cycle naturally re-attempts.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::batch::BatchSnapshot;

/// Periodic status document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    /// Filtered flow rate, L/min.
    pub flow: f64,
    /// Accumulated volume of the current batch, liters.
    pub vol: f64,
    /// Batch target, liters.
    pub target: f64,
    /// Whole seconds of run time, including the live span while active.
    pub elapsed: u64,
    #[serde(rename = "targetReached")]
    pub target_reached: bool,
    /// Process uptime, whole seconds.
    pub uptime: u64,
    pub relay: bool,
    pub valve: bool,
}

impl StatusFrame {
    pub fn from_snapshot(snap: &BatchSnapshot, uptime_s: u64) -> Self {
        Self {
            kind: "status",
            flow: snap.flow_lpm,
            vol: snap.volume_l,
            target: snap.target_l,
            elapsed: snap.elapsed_s,
            target_reached: snap.target_reached,
            uptime: uptime_s,
            relay: snap.relay_active,
            valve: snap.valve_active,
        }
    }
}

/// One-shot batch-completion document, emitted exactly once per batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionReport {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "batchStart")]
    pub batch_start: String,
    #[serde(rename = "batchEnd")]
    pub batch_end: String,
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: u64,
    #[serde(rename = "pauseCount")]
    pub pause_count: u32,
    #[serde(rename = "finalVolume")]
    pub final_volume: f64,
    pub target: f64,
}

impl CompletionReport {
    pub fn new(
        batch_start: DateTime<Utc>,
        batch_end: DateTime<Utc>,
        duration_ms: u64,
        pause_count: u32,
        final_volume_l: f64,
        target_l: f64,
    ) -> Self {
        Self {
            kind: "batchComplete",
            batch_start: batch_start.to_rfc3339_opts(SecondsFormat::Secs, true),
            batch_end: batch_end.to_rfc3339_opts(SecondsFormat::Secs, true),
            duration_seconds: duration_ms / crate::util::MILLIS_PER_SEC,
            pause_count,
            final_volume: final_volume_l,
            target: target_l,
        }
    }
}

/// Outbound transport seam. Implementations must not block the caller for
/// longer than a local socket write; reconnect logic lives inside the
/// transport, never here.
pub trait TelemetrySink: Send {
    fn name(&self) -> &'static str;
    fn publish(&mut self, payload: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Fans documents out to every configured sink, best-effort.
pub struct TelemetryPublisher {
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl TelemetryPublisher {
    pub fn new(sinks: Vec<Box<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn publish_status(&mut self, frame: &StatusFrame) {
        self.publish_doc(frame);
    }

    pub fn publish_completion(&mut self, report: &CompletionReport) {
        self.publish_doc(report);
    }

    fn publish_doc<T: Serialize>(&mut self, doc: &T) {
        let payload = match serde_json::to_string(doc) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "telemetry document failed to serialize");
                return;
            }
        };
        for sink in &mut self.sinks {
            if let Err(e) = sink.publish(&payload) {
                tracing::warn!(sink = sink.name(), error = %e, "publish failed; next cycle retries");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{FailingSink, RecordingSink};
    use chrono::TimeZone;

    fn snapshot() -> BatchSnapshot {
        BatchSnapshot {
            flow_lpm: 12.5,
            volume_l: 3.25,
            target_l: 10.0,
            elapsed_s: 42,
            target_reached: false,
            relay_active: true,
            valve_active: false,
            pause_count: 1,
        }
    }

    #[test]
    fn status_frame_uses_wire_keys() {
        let frame = StatusFrame::from_snapshot(&snapshot(), 99);
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["flow"], 12.5);
        assert_eq!(json["vol"], 3.25);
        assert_eq!(json["target"], 10.0);
        assert_eq!(json["elapsed"], 42);
        assert_eq!(json["targetReached"], false);
        assert_eq!(json["uptime"], 99);
        assert_eq!(json["relay"], true);
        assert_eq!(json["valve"], false);
    }

    #[test]
    fn completion_report_uses_wire_keys_and_iso_times() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 1, 8, 16, 40).unwrap();
        let report = CompletionReport::new(start, end, 1_000_000, 2, 1000.0, 1000.0);
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();
        assert_eq!(json["type"], "batchComplete");
        assert_eq!(json["batchStart"], "2025-03-01T08:00:00Z");
        assert_eq!(json["batchEnd"], "2025-03-01T08:16:40Z");
        assert_eq!(json["durationSeconds"], 1000);
        assert_eq!(json["pauseCount"], 2);
        assert_eq!(json["finalVolume"], 1000.0);
        assert_eq!(json["target"], 1000.0);
    }

    #[test]
    fn failed_sink_does_not_stop_the_others() {
        let recorder = RecordingSink::new("recorder");
        let captured = recorder.handle();
        let mut publisher =
            TelemetryPublisher::new(vec![Box::new(FailingSink), Box::new(recorder)]);
        publisher.publish_status(&StatusFrame::from_snapshot(&snapshot(), 1));
        let messages = captured.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("\"type\":\"status\""));
    }
}
