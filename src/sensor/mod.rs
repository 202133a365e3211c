//! Sensor access for the electronic nose.
//!
//! This module contains:
//! - The driver boundary to the gas sensor chip
//! - Reading scoring and periodic polling
//! - The fixed-capacity reading history

pub mod driver;
pub mod history;
pub mod reader;
pub mod types;

// Re-export commonly used types
pub use driver::{
    DriverError, RawMeasurement, ScriptHandle, ScriptedDriver, SensorDriver, SimulatedDriver,
};
pub use history::{HistoryBuffer, DEFAULT_HISTORY_CAPACITY};
pub use reader::{SensorReader, DEFAULT_BASELINE_GAS};
pub use types::{HeaterProfile, Reading, DEFAULT_HEATER_PROFILE, HEATER_PROFILES};
