#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Transport adapters for the dosing engine.
//!
//! Each transport plays two roles: it implements the core's `TelemetrySink`
//! seam for outbound documents and feeds inbound command text into the
//! engine's command queue. Reconnect policy lives entirely in here — the
//! engine never waits on a link.

pub mod broadcast;
pub mod mqtt;

pub use broadcast::BroadcastHub;
pub use mqtt::MqttLink;
