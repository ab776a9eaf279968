use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("sampling loop unresponsive for {stalled_ms} ms (limit {limit_ms} ms)")]
    Watchdog { stalled_ms: u64, limit_ms: u64 },
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
