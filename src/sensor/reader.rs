//! Periodic sensor polling and air-quality scoring.
//!
//! Each successful poll turns a [`RawMeasurement`] into a [`Reading`] with
//! derived quality metrics and appends it to the [`HistoryBuffer`]. The
//! CO2- and VOC-equivalents are heuristic estimates derived from the gas
//! resistance ratio, not calibrated measurements.

use crate::sensor::driver::{DriverError, RawMeasurement, SensorDriver};
use crate::sensor::history::HistoryBuffer;
use crate::sensor::types::{HeaterProfile, Reading, DEFAULT_HEATER_PROFILE, HEATER_PROFILES};
use tracing::{debug, info, warn};

/// Clean-air gas resistance assumed until a calibration is loaded.
pub const DEFAULT_BASELINE_GAS: f32 = 100_000.0;

/// Humidity band (in %RH) scored as ideal.
const OPTIMAL_HUMIDITY: (f32, f32) = (38.0, 42.0);

/// Weight of the gas score in the composite index.
const GAS_WEIGHT: f32 = 0.75;

/// Weight of the humidity score in the composite index.
const HUMIDITY_WEIGHT: f32 = 0.25;

const CO2_RANGE: (f32, f32) = (400.0, 5000.0);
const VOC_RANGE: (f32, f32) = (0.0, 25.0);

/// Polls the sensor driver and scores its measurements.
pub struct SensorReader {
    driver: Box<dyn SensorDriver>,
    history: HistoryBuffer,
    current: Reading,
    baseline_gas: f32,
    heater_index: usize,
    healthy: bool,
    read_interval_ms: u64,
    last_read: Option<u64>,
}

impl SensorReader {
    /// Create a reader with a history of `capacity` readings, polling at
    /// most once every `read_interval_ms` from [`update`](Self::update).
    pub fn new(driver: Box<dyn SensorDriver>, capacity: usize, read_interval_ms: u64) -> Self {
        Self {
            driver,
            history: HistoryBuffer::new(capacity),
            current: Reading::default(),
            baseline_gas: DEFAULT_BASELINE_GAS,
            heater_index: DEFAULT_HEATER_PROFILE,
            healthy: false,
            read_interval_ms,
            last_read: None,
        }
    }

    /// Initialise the driver, apply the heater profile and take a first reading.
    pub fn begin(&mut self, now_ms: u64) -> Result<(), DriverError> {
        info!("Initializing gas sensor");
        if let Err(e) = self.driver.init() {
            self.healthy = false;
            return Err(e);
        }

        let profile = self.heater_profile();
        self.driver.set_heater(profile)?;
        info!(
            profile = profile.name,
            temperature_c = profile.temperature_c,
            duration_ms = profile.duration_ms,
            "Sensor initialized"
        );

        self.last_read = Some(now_ms);
        // A failed first read leaves the reader unhealthy but usable
        let _ = self.poll(now_ms);
        Ok(())
    }

    /// Poll if the read interval has elapsed. Returns true when a poll ran.
    pub fn update(&mut self, now_ms: u64) -> bool {
        let due = self
            .last_read
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.read_interval_ms);
        if !due {
            return false;
        }

        let _ = self.poll(now_ms);
        self.last_read = Some(now_ms);
        true
    }

    /// Take one measurement now.
    ///
    /// On failure the reader turns unhealthy and the last good reading is
    /// kept. On success the new reading is scored and appended to history.
    pub fn poll(&mut self, now_ms: u64) -> Result<Reading, DriverError> {
        let measurement = match self.driver.measure() {
            Ok(m) if m.is_zero() => Err(DriverError::ReadFailed("zero result".to_string())),
            other => other,
        };

        let measurement = match measurement {
            Ok(m) => m,
            Err(e) => {
                if self.healthy {
                    warn!("Sensor read failed: {e}");
                } else {
                    debug!("Sensor still failing: {e}");
                }
                self.healthy = false;
                return Err(e);
            }
        };

        self.healthy = true;
        let reading = self.score(&measurement, now_ms);
        self.current = reading;
        self.history.push(reading);
        debug!(
            gas = reading.gas_resistance,
            iaq = reading.air_quality_score,
            "Sensor reading"
        );
        Ok(reading)
    }

    fn score(&self, m: &RawMeasurement, now_ms: u64) -> Reading {
        let gas_score = gas_quality(m.gas_resistance, self.baseline_gas);
        let humidity_score = humidity_quality(m.humidity);

        Reading {
            gas_resistance: m.gas_resistance,
            temperature: m.temperature,
            humidity: m.humidity,
            pressure: m.pressure,
            air_quality_score: air_quality_index(gas_score, humidity_score),
            air_quality_confidence: confidence_tier(self.history.len()),
            co2_equivalent: co2_equivalent(m.gas_resistance, self.baseline_gas),
            voc_equivalent: voc_equivalent(m.gas_resistance, self.baseline_gas),
            heater_stable: m.gas_resistance > 0.0,
            timestamp: now_ms,
        }
    }

    /// Outcome of the most recent poll only.
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Last good reading (zeroed before the first success).
    pub fn current_reading(&self) -> Reading {
        self.current
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn baseline_gas(&self) -> f32 {
        self.baseline_gas
    }

    pub fn set_baseline_gas(&mut self, baseline: f32) {
        self.baseline_gas = baseline;
        info!("Baseline gas set to {baseline:.0} ohms");
    }

    pub fn heater_profile_index(&self) -> usize {
        self.heater_index
    }

    pub fn heater_profile(&self) -> &'static HeaterProfile {
        &HEATER_PROFILES[self.heater_index]
    }

    /// Select a heater preset by table index; invalid indices are ignored.
    pub fn set_heater_profile(&mut self, index: usize) -> Option<&'static HeaterProfile> {
        let profile = HeaterProfile::by_index(index)?;
        self.heater_index = index;
        match self.driver.set_heater(profile) {
            Ok(()) => info!("Heater profile changed to {}", profile.name),
            Err(e) => warn!("Heater profile {} not applied: {e}", profile.name),
        }
        Some(profile)
    }
}

/// Gas score 0-100: resistance relative to the clean-air baseline.
pub fn gas_quality(gas_resistance: f32, baseline: f32) -> f32 {
    if gas_resistance >= baseline {
        100.0
    } else if gas_resistance <= 0.0 || baseline <= 0.0 {
        0.0
    } else {
        (gas_resistance / baseline * 100.0).clamp(0.0, 100.0)
    }
}

/// Humidity score 0-100: full marks inside the optimal band, falling off
/// linearly with distance from the nearest band edge.
pub fn humidity_quality(humidity: f32) -> f32 {
    let (low, high) = OPTIMAL_HUMIDITY;
    let score = if humidity < low {
        humidity / low * 100.0
    } else if humidity > high {
        100.0 - (humidity - high) / (100.0 - high) * 100.0
    } else {
        100.0
    };
    score.clamp(0.0, 100.0)
}

/// Composite index 0-500 where higher means worse air.
pub fn air_quality_index(gas_score: f32, humidity_score: f32) -> u16 {
    let quality = (gas_score * GAS_WEIGHT + humidity_score * HUMIDITY_WEIGHT).clamp(0.0, 500.0);
    let index = (500.0 - quality * 5.0) as i32;
    index.clamp(0, 500) as u16
}

/// Confidence tier from history occupancy, modelling sensor burn-in.
pub fn confidence_tier(occupancy: usize) -> u8 {
    match occupancy {
        n if n >= 30 => 3,
        n if n >= 15 => 2,
        n if n >= 5 => 1,
        _ => 0,
    }
}

/// Heuristic CO2-equivalent in ppm.
pub fn co2_equivalent(gas_resistance: f32, baseline: f32) -> f32 {
    let (low, high) = CO2_RANGE;
    let co2 = if gas_resistance < baseline && baseline > 0.0 {
        low + (1.0 - gas_resistance / baseline) * (high - low)
    } else {
        low
    };
    co2.clamp(low, high)
}

/// Heuristic VOC-equivalent in ppm.
pub fn voc_equivalent(gas_resistance: f32, baseline: f32) -> f32 {
    let (low, high) = VOC_RANGE;
    let voc = if gas_resistance < baseline && baseline > 0.0 {
        (1.0 - gas_resistance / baseline) * high
    } else {
        low
    };
    voc.clamp(low, high)
}
