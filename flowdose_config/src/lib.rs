#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and validation for the batch-dosing controller.
//!
//! All sections are optional in the TOML and fall back to field defaults
//! matching the shipped calibration; `Config::validate` rejects values a
//! deployment must never run with.
use serde::Deserialize;

/// Analog sensor span calibration: raw ADC counts mapped linearly onto
/// engineering units (L/min).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SensorCfg {
    /// Raw counts at zero flow.
    pub adc_low_counts: i32,
    /// Raw counts at full-scale flow.
    pub adc_high_counts: i32,
    /// Flow rate represented by `adc_high_counts`, in L/min.
    pub full_scale_lpm: f64,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            adc_low_counts: 744,
            adc_high_counts: 3720,
            full_scale_lpm: 100.0,
        }
    }
}

/// Recursive flow-filter noise parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FilterCfg {
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub initial_covariance: f64,
}

impl Default for FilterCfg {
    fn default() -> Self {
        Self {
            process_noise: 0.01,
            measurement_noise: 0.1,
            initial_covariance: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BatchCfg {
    /// Target volume applied at boot before any `setTarget` command.
    pub default_target_l: f64,
    /// Below this residual volume a starting batch counts as new.
    pub new_batch_epsilon_l: f64,
}

impl Default for BatchCfg {
    fn default() -> Self {
        Self {
            default_target_l: 1000.0,
            new_batch_epsilon_l: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SamplingCfg {
    /// Fixed sampling-loop period in milliseconds.
    pub period_ms: u64,
    /// Liveness watchdog timeout; expiry forces actuators off and aborts.
    pub watchdog_timeout_ms: u64,
}

impl Default for SamplingCfg {
    fn default() -> Self {
        Self {
            period_ms: 100,
            watchdog_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TelemetryCfg {
    /// Status document cadence in milliseconds (200..=2000 across deployments).
    pub period_ms: u64,
}

impl Default for TelemetryCfg {
    fn default() -> Self {
        Self { period_ms: 250 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceCfg {
    /// Path of the volume backup record.
    pub path: String,
    /// Save cadence while the relay is active, in milliseconds.
    pub period_ms: u64,
}

impl Default for PersistenceCfg {
    fn default() -> Self {
        Self {
            path: "var/flowdose_lastvol.toml".to_string(),
            period_ms: 30_000,
        }
    }
}

/// GPIO pin numbers; also accepted as actuator aliases in the command
/// grammar (`toggle:13` == `toggle:relay`).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Pins {
    pub relay: u8,
    pub valve: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            relay: 13,
            valve: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttCfg {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub publish_topic: String,
    pub command_topic: String,
    /// Fixed reconnect backoff after a broker error, in milliseconds.
    pub reconnect_backoff_ms: u64,
    pub keep_alive_s: u64,
}

impl Default for MqttCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "flowdose".to_string(),
            publish_topic: "flowdose/telemetry".to_string(),
            command_topic: "flowdose/cmd".to_string(),
            reconnect_backoff_ms: 2_000,
            keep_alive_s: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastCfg {
    pub enabled: bool,
    /// Listen address for the line-JSON broadcast hub.
    pub bind: String,
}

impl Default for BroadcastCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8081".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Path to a JSON-lines log file; console-only when absent.
    pub file: Option<String>,
    /// "error" | "warn" | "info" | "debug" | "trace"
    pub level: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sensor: SensorCfg,
    pub filter: FilterCfg,
    pub batch: BatchCfg,
    pub sampling: SamplingCfg,
    pub telemetry: TelemetryCfg,
    pub persistence: PersistenceCfg,
    pub pins: Pins,
    pub mqtt: MqttCfg,
    pub broadcast: BroadcastCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_path(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {:?}: {}", path, e))?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Sensor
        if self.sensor.adc_high_counts <= self.sensor.adc_low_counts {
            eyre::bail!("sensor.adc_high_counts must be > sensor.adc_low_counts");
        }
        if !(self.sensor.full_scale_lpm.is_finite() && self.sensor.full_scale_lpm > 0.0) {
            eyre::bail!("sensor.full_scale_lpm must be a positive number");
        }

        // Filter
        if !(self.filter.process_noise.is_finite() && self.filter.process_noise > 0.0) {
            eyre::bail!("filter.process_noise must be > 0");
        }
        if !(self.filter.measurement_noise.is_finite() && self.filter.measurement_noise > 0.0) {
            eyre::bail!("filter.measurement_noise must be > 0");
        }
        if !(self.filter.initial_covariance.is_finite() && self.filter.initial_covariance > 0.0) {
            eyre::bail!("filter.initial_covariance must be > 0");
        }

        // Batch
        if !(self.batch.default_target_l.is_finite() && self.batch.default_target_l > 0.0) {
            eyre::bail!("batch.default_target_l must be > 0");
        }
        if !(self.batch.new_batch_epsilon_l.is_finite() && self.batch.new_batch_epsilon_l >= 0.0) {
            eyre::bail!("batch.new_batch_epsilon_l must be >= 0");
        }
        if self.batch.new_batch_epsilon_l > 1.0 {
            eyre::bail!("batch.new_batch_epsilon_l is unreasonably large (>1 L)");
        }

        // Sampling
        if !(1..=1_000).contains(&self.sampling.period_ms) {
            eyre::bail!("sampling.period_ms must be in [1, 1000]");
        }
        if self.sampling.watchdog_timeout_ms < self.sampling.period_ms.saturating_mul(2) {
            eyre::bail!("sampling.watchdog_timeout_ms must span at least two sample periods");
        }

        // Telemetry
        if !(200..=2_000).contains(&self.telemetry.period_ms) {
            eyre::bail!("telemetry.period_ms must be in [200, 2000]");
        }

        // Persistence
        if self.persistence.path.trim().is_empty() {
            eyre::bail!("persistence.path must not be empty");
        }
        if self.persistence.period_ms < 1_000 {
            eyre::bail!("persistence.period_ms must be >= 1000 (flash/disk wear)");
        }

        // MQTT
        if self.mqtt.enabled {
            if self.mqtt.host.trim().is_empty() {
                eyre::bail!("mqtt.host must not be empty when mqtt.enabled");
            }
            if self.mqtt.publish_topic.trim().is_empty()
                || self.mqtt.command_topic.trim().is_empty()
            {
                eyre::bail!("mqtt topics must not be empty when mqtt.enabled");
            }
            if self.mqtt.reconnect_backoff_ms == 0 {
                eyre::bail!("mqtt.reconnect_backoff_ms must be >= 1");
            }
        }

        // Broadcast
        if self.broadcast.enabled && self.broadcast.bind.parse::<std::net::SocketAddr>().is_err() {
            eyre::bail!(
                "broadcast.bind must be a socket address, got {:?}",
                self.broadcast.bind
            );
        }

        // Pins
        if self.pins.relay == self.pins.valve {
            eyre::bail!("pins.relay and pins.valve must differ");
        }

        Ok(())
    }
}
