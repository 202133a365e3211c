//! Boundary to the gas sensor chip driver.
//!
//! Register-level access to the sensor lives behind [`SensorDriver`]. The
//! crate ships a [`SimulatedDriver`] for hosts without hardware and a
//! [`ScriptedDriver`] that replays a fixed sequence of measurements.

use crate::sensor::types::HeaterProfile;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Raw values as reported by the sensor chip.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawMeasurement {
    /// Gas resistance in ohms
    pub gas_resistance: f32,
    /// Temperature in °C
    pub temperature: f32,
    /// Relative humidity in %
    pub humidity: f32,
    /// Pressure in hPa
    pub pressure: f32,
}

impl RawMeasurement {
    pub fn new(gas_resistance: f32, temperature: f32, humidity: f32, pressure: f32) -> Self {
        Self {
            gas_resistance,
            temperature,
            humidity,
            pressure,
        }
    }

    /// A measurement where every channel is zero carries no information.
    pub fn is_zero(&self) -> bool {
        *self == RawMeasurement::default()
    }
}

/// Errors reported by a sensor driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverError {
    /// The chip did not answer on the bus
    NotFound,
    /// Starting a measurement cycle failed
    BeginFailed,
    /// Completing a measurement cycle failed
    ReadFailed(String),
    /// No further measurements are available
    NoData,
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::NotFound => write!(f, "Sensor not found"),
            DriverError::BeginFailed => write!(f, "Failed to begin reading"),
            DriverError::ReadFailed(e) => write!(f, "Failed to complete reading: {e}"),
            DriverError::NoData => write!(f, "No measurement available"),
        }
    }
}

impl std::error::Error for DriverError {}

/// A gas/temperature/humidity/pressure sensor.
pub trait SensorDriver: Send {
    /// Probe and configure the chip.
    fn init(&mut self) -> Result<(), DriverError>;

    /// Apply a heater preset for subsequent measurements.
    fn set_heater(&mut self, profile: &HeaterProfile) -> Result<(), DriverError>;

    /// Perform one synchronous measurement cycle.
    fn measure(&mut self) -> Result<RawMeasurement, DriverError>;
}

/// Smooth synthetic signal for running without hardware.
///
/// Gas resistance drifts slowly around a clean-air level and dips when the
/// heater runs hotter, temperature and humidity follow slow waves.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    clean_air_resistance: f32,
    heater_temperature: u16,
    cycle: u64,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::with_clean_air(120_000.0)
    }

    pub fn with_clean_air(clean_air_resistance: f32) -> Self {
        Self {
            clean_air_resistance,
            heater_temperature: 320,
            cycle: 0,
        }
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for SimulatedDriver {
    fn init(&mut self) -> Result<(), DriverError> {
        self.cycle = 0;
        Ok(())
    }

    fn set_heater(&mut self, profile: &HeaterProfile) -> Result<(), DriverError> {
        self.heater_temperature = profile.temperature_c;
        Ok(())
    }

    fn measure(&mut self) -> Result<RawMeasurement, DriverError> {
        use std::f32::consts::PI;

        self.cycle += 1;
        let t = self.cycle as f32;

        // Hotter plates read lower resistance
        let heater_factor = 1.0 - (self.heater_temperature as f32 - 320.0) / 1000.0;
        let drift = 0.03 * ((t / 120.0) * 2.0 * PI).sin();
        let ripple = 0.005 * ((t / 7.0) * 2.0 * PI).sin();
        let gas = self.clean_air_resistance * heater_factor * (1.0 + drift + ripple);

        let temperature = 22.0 + 1.5 * ((t / 600.0) * 2.0 * PI).sin();
        let humidity = 41.0 + 4.0 * ((t / 900.0) * 2.0 * PI).cos();
        let pressure = 1013.25 + 0.8 * ((t / 1800.0) * 2.0 * PI).sin();

        Ok(RawMeasurement::new(gas, temperature, humidity, pressure))
    }
}

type Script = VecDeque<Result<RawMeasurement, DriverError>>;

/// Replays queued measurements and failures in order.
///
/// Once the queue is empty the last successful measurement repeats; before
/// any success an empty queue reports [`DriverError::NoData`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedDriver {
    script: Arc<Mutex<Script>>,
    last: Option<RawMeasurement>,
    heater: Option<HeaterProfile>,
}

/// Cloneable handle for feeding a [`ScriptedDriver`] after it has been
/// moved into a reader.
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver that always reports the same measurement.
    pub fn constant(measurement: RawMeasurement) -> Self {
        let driver = Self::new();
        driver.handle().push(measurement);
        driver
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            script: Arc::clone(&self.script),
        }
    }

    /// Heater profile most recently applied.
    pub fn heater(&self) -> Option<&HeaterProfile> {
        self.heater.as_ref()
    }
}

impl ScriptHandle {
    pub fn push(&self, measurement: RawMeasurement) {
        lock(&self.script).push_back(Ok(measurement));
    }

    pub fn push_failure(&self, error: DriverError) {
        lock(&self.script).push_back(Err(error));
    }

    pub fn pending(&self) -> usize {
        lock(&self.script).len()
    }
}

fn lock(script: &Mutex<Script>) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SensorDriver for ScriptedDriver {
    fn init(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_heater(&mut self, profile: &HeaterProfile) -> Result<(), DriverError> {
        self.heater = Some(*profile);
        Ok(())
    }

    fn measure(&mut self) -> Result<RawMeasurement, DriverError> {
        match lock(&self.script).pop_front() {
            Some(Ok(measurement)) => {
                self.last = Some(measurement);
                Ok(measurement)
            }
            Some(Err(e)) => Err(e),
            None => self.last.ok_or(DriverError::NoData),
        }
    }
}
