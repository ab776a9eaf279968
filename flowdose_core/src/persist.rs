//! Crash-safe persistence of the volume accumulator.
//!
//! The record is a one-key TOML file (`lastVol`) written atomically:
//! temp file, fsync, rename. Saves are best-effort from the engine's point
//! of view — a failure is logged and the next scheduled cycle retries.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record: {0}")]
    Malformed(String),
}

pub trait VolumeStore: Send {
    /// Read the persisted accumulator; 0.0 when no record exists.
    fn load(&mut self) -> Result<f64, StoreError>;
    fn save(&mut self, volume_l: f64) -> Result<(), StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct VolumeRecord {
    #[serde(rename = "lastVol")]
    last_vol: f64,
}

/// File-backed store used in production.
#[derive(Debug, Clone)]
pub struct TomlVolumeStore {
    path: PathBuf,
}

impl TomlVolumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl VolumeStore for TomlVolumeStore {
    fn load(&mut self) -> Result<f64, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0.0),
            Err(e) => return Err(e.into()),
        };
        let record: VolumeRecord =
            toml::from_str(&text).map_err(|e| StoreError::Malformed(e.to_string()))?;
        if record.last_vol.is_finite() {
            Ok(record.last_vol.max(0.0))
        } else {
            Err(StoreError::Malformed("non-finite lastVol".to_string()))
        }
    }

    fn save(&mut self, volume_l: f64) -> Result<(), StoreError> {
        let record = VolumeRecord {
            last_vol: volume_l,
        };
        let text =
            toml::to_string(&record).map_err(|e| StoreError::Malformed(e.to_string()))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&self.path, text.as_bytes())?;
        tracing::debug!(path = ?self.path, volume_l, "volume backed up");
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_record_loads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TomlVolumeStore::new(dir.path().join("lastvol.toml"));
        assert_eq!(store.load().unwrap(), 0.0);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TomlVolumeStore::new(dir.path().join("lastvol.toml"));
        store.save(5.0).unwrap();
        assert!((store.load().unwrap() - 5.0).abs() < 1e-12);
        // Overwrites are atomic replacements, not appends.
        store.save(7.25).unwrap();
        assert!((store.load().unwrap() - 7.25).abs() < 1e-12);
    }

    #[test]
    fn record_uses_the_wire_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lastvol.toml");
        let mut store = TomlVolumeStore::new(&path);
        store.save(12.5).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("lastVol"), "unexpected record: {text}");
    }

    #[test]
    fn missing_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("var/nested/lastvol.toml");
        let mut store = TomlVolumeStore::new(&path);
        store.save(1.0).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn garbage_record_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lastvol.toml");
        std::fs::write(&path, "not = \"a volume\"\n").unwrap();
        let mut store = TomlVolumeStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn negative_persisted_volume_clamps_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lastvol.toml");
        std::fs::write(&path, "lastVol = -3.0\n").unwrap();
        let mut store = TomlVolumeStore::new(&path);
        assert_eq!(store.load().unwrap(), 0.0);
    }
}
