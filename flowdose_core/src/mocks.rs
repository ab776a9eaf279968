//! Test and helper doubles shared by unit and integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowdose_traits::{Actuator, FlowSensor};

use crate::persist::{StoreError, VolumeStore};
use crate::telemetry::TelemetrySink;

/// Sensor returning a fixed raw count forever.
pub struct ConstSensor(pub i32);

impl FlowSensor for ConstSensor {
    fn read(&mut self) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.0)
    }
}

/// Sensor that wedges for `delay` on every read; stalls the sampling loop.
pub struct BlockingSensor(pub Duration);

impl FlowSensor for BlockingSensor {
    fn read(&mut self) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        std::thread::sleep(self.0);
        Ok(0)
    }
}

/// Sensor that always errors; the sampling loop must skip and carry on.
pub struct FailingSensor;

impl FlowSensor for FailingSensor {
    fn read(&mut self) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("adc unavailable")))
    }
}

/// Actuator recording its state behind a shareable flag.
pub struct FlagActuator {
    state: Arc<AtomicBool>,
}

impl FlagActuator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Observer handle for asserting on the driven state.
    pub fn handle(&self) -> Arc<AtomicBool> {
        self.state.clone()
    }
}

impl Default for FlagActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl Actuator for FlagActuator {
    fn set_active(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.state.store(on, Ordering::Relaxed);
        Ok(())
    }
}

/// Telemetry sink capturing every payload.
pub struct RecordingSink {
    name: &'static str,
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<String>>> {
        self.messages.clone()
    }
}

impl TelemetrySink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    fn publish(&mut self, payload: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(payload.to_string());
        }
        Ok(())
    }
}

/// Sink that always fails; exercises the best-effort publish path.
pub struct FailingSink;

impl TelemetrySink for FailingSink {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn publish(&mut self, _payload: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("link down")))
    }
}

/// In-memory store recording every save.
pub struct MemoryStore {
    initial: f64,
    saved: Arc<Mutex<Vec<f64>>>,
}

impl MemoryStore {
    pub fn new(initial: f64) -> Self {
        Self {
            initial,
            saved: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn saved(&self) -> Arc<Mutex<Vec<f64>>> {
        self.saved.clone()
    }
}

impl VolumeStore for MemoryStore {
    fn load(&mut self) -> Result<f64, StoreError> {
        Ok(self.initial)
    }

    fn save(&mut self, volume_l: f64) -> Result<(), StoreError> {
        if let Ok(mut saved) = self.saved.lock() {
            saved.push(volume_l);
        }
        Ok(())
    }
}
