//! Configuration for the Bio Sentinel agent.

use crate::channel::{ChannelSettings, Endpoint};
use crate::sensor::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Device id value that asks for a hostname-derived id.
pub const AUTO_DEVICE_ID: &str = "auto";

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier reported in every reading and completion event
    pub device_id: String,

    /// Version reported in device status
    pub firmware_version: String,

    /// Telemetry server
    pub server: ServerConfig,

    /// Readings kept in history; also the sample cap of a calibration or capture
    pub history_capacity: usize,

    /// Interval between sensor polls, and between readings sent while monitoring
    #[serde(with = "duration_serde")]
    pub sensor_read_interval: Duration,

    /// Interval between periodic device status events
    #[serde(with = "duration_serde")]
    pub status_report_interval: Duration,

    /// Interval between keep-alives while connected
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// First reconnection delay
    #[serde(with = "duration_serde")]
    pub reconnect_initial_delay: Duration,

    /// Longest reconnection delay
    #[serde(with = "duration_serde")]
    pub reconnect_max_delay: Duration,

    /// Capture length when a request gives none
    #[serde(with = "duration_serde")]
    pub default_capture_duration: Duration,

    /// Calibration length when a request gives none
    #[serde(with = "duration_serde")]
    pub default_calibration_duration: Duration,

    /// Path for persisted calibration and settings
    pub data_path: PathBuf,

    /// Key-value namespace inside `data_path`
    pub storage_namespace: String,

    /// Pause between scheduler ticks
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bio-sentinel");

        Self {
            device_id: "xbs-esp32-001".to_string(),
            firmware_version: crate::VERSION.to_string(),
            server: ServerConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            sensor_read_interval: Duration::from_secs(1),
            status_report_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            default_capture_duration: Duration::from_secs(30),
            default_calibration_duration: Duration::from_secs(60),
            data_path: data_dir,
            storage_namespace: "biosent".to_string(),
            tick_interval: Duration::from_millis(10),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bio-sentinel")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// The configured device id, or one derived from the hostname when it is
    /// empty or `"auto"`.
    pub fn resolved_device_id(&self) -> String {
        if !self.device_id.is_empty() && self.device_id != AUTO_DEVICE_ID {
            return self.device_id.clone();
        }
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        format!("xbs-{}-{}", hostname, &uuid::Uuid::new_v4().to_string()[..8])
    }

    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            heartbeat_interval_ms: self.heartbeat_interval.as_millis() as u64,
            reconnect_initial_delay_ms: self.reconnect_initial_delay.as_millis() as u64,
            reconnect_max_delay_ms: self.reconnect_max_delay.as_millis() as u64,
        }
    }
}

/// Telemetry server address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            path: "/ws/bio-sentinel".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration, as whole milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
