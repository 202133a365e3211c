//! Persistent key-value storage.
//!
//! The device keeps a handful of values (calibration baseline, its
//! timestamp, the selected heater profile) in a namespaced key-value store
//! that survives restarts. [`JsonFileStore`] backs a namespace with one JSON
//! file; [`MemoryStore`] keeps everything in memory.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key for the clean-air baseline resistance (f32 ohms).
pub const KEY_BASELINE: &str = "baseline";

/// Key for the last successful calibration (wall-clock epoch ms).
pub const KEY_LAST_CALIBRATION: &str = "last_cal";

/// Key for the selected heater profile index.
pub const KEY_HEATER_PROFILE: &str = "heater_prof";

/// Storage errors.
#[derive(Debug)]
pub enum StorageError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::IoError(e) => write!(f, "Storage IO error: {e}"),
            StorageError::ParseError(e) => write!(f, "Storage parse error: {e}"),
            StorageError::SerializeError(e) => write!(f, "Storage serialize error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// A namespaced key-value store.
pub trait KvStore: Send {
    fn get(&self, key: &str) -> Option<Value>;

    fn put(&mut self, key: &str, value: Value) -> Result<(), StorageError>;

    fn get_f32(&self, key: &str) -> Option<f32> {
        self.get(key)?.as_f64().map(|v| v as f32)
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key)?.as_u64()
    }

    fn put_f32(&mut self, key: &str, value: f32) -> Result<(), StorageError> {
        self.put(key, Value::from(value as f64))
    }

    fn put_u64(&mut self, key: &str, value: u64) -> Result<(), StorageError> {
        self.put(key, Value::from(value))
    }
}

/// One namespace persisted as `<dir>/<namespace>.json`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl JsonFileStore {
    /// Open a namespace, loading existing values if the file exists.
    pub fn open(dir: &Path, namespace: &str) -> Result<Self, StorageError> {
        let path = dir.join(format!("{namespace}.json"));

        let entries = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| StorageError::IoError(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| StorageError::ParseError(e.to_string()))?
        } else {
            Map::new()
        };

        debug!("Opened store {:?} with {} keys", path, entries.len());
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::IoError(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| StorageError::SerializeError(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| StorageError::IoError(e.to_string()))
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }
}

/// Volatile store, for tests and hosts without a data directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}
