#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core batch-dosing logic (hardware-agnostic).
//!
//! This crate provides the hardware-independent dosing engine. All hardware
//! interactions go through the `flowdose_traits::FlowSensor` and
//! `flowdose_traits::Actuator` traits; transports hang off the
//! `telemetry::TelemetrySink` seam.
//!
//! ## Architecture
//!
//! - **Conditioning**: span calibration + recursive noise filter (`filter`)
//! - **Lifecycle**: batch state machine and volume integrator (`batch`)
//! - **Control**: closed command grammar with safety gates (`command`)
//! - **Telemetry**: periodic status and one-shot completion documents
//!   (`telemetry`)
//! - **Persistence**: crash-safe accumulator backup (`persist`)
//! - **Supervision**: sampling-loop liveness watchdog (`watchdog`)
//! - **Scheduling**: the two-loop engine tying it together (`engine`)
//!
//! The controller is the single authority over the shared state; both engine
//! loops reach it through one mutex and observe it only via snapshots.

pub mod batch;
pub mod command;
pub mod engine;
pub mod error;
pub mod filter;
pub mod mocks;
pub mod persist;
pub mod telemetry;
pub mod util;
pub mod watchdog;

pub use batch::{BatchController, BatchEvent, BatchSnapshot, CommandOutcome, RejectReason};
pub use command::{Command, CommandParseError, CommandProcessor};
pub use engine::{Engine, EngineCfg, Outputs};
pub use error::{EngineError, Result};
pub use filter::{FlowFilter, SensorSpan};
pub use persist::{StoreError, TomlVolumeStore, VolumeStore};
pub use telemetry::{CompletionReport, StatusFrame, TelemetryPublisher, TelemetrySink};
pub use watchdog::{Heartbeat, Watchdog};
