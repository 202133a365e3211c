//! Baseline calibration.
//!
//! A calibration samples gas resistance in clean air for a fixed duration,
//! checks that the readings are stable, and persists their mean as the new
//! clean-air baseline. The baseline is handed to the [`SensorReader`] right
//! away so the next readings are scored against it.

use crate::clock::Clock;
use crate::core::bounded::ErrorMessage;
use crate::core::features::summarize;
use crate::core::windowing::{RunState, SampleWindow};
use crate::sensor::{SensorReader, DEFAULT_BASELINE_GAS};
use crate::storage::{KvStore, KEY_BASELINE, KEY_LAST_CALIBRATION};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Fewest samples a calibration accepts.
pub const MIN_CALIBRATION_SAMPLES: usize = 10;

/// Highest coefficient of variation accepted as stable.
pub const MAX_COEFFICIENT_OF_VARIATION: f32 = 0.20;

pub const ERROR_INSUFFICIENT_SAMPLES: &str = "Insufficient samples for calibration";
pub const ERROR_TOO_VARIABLE: &str = "Readings too variable - ensure clean air environment";
pub const ERROR_STOPPED: &str = "Calibration stopped by user";

/// Outcome of the most recent calibration run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationResult {
    pub success: bool,
    /// Mean gas resistance; also reported for failed stability checks
    pub baseline_gas: f32,
    pub duration_ms: u32,
    pub error: ErrorMessage,
}

/// Runs timed calibrations and owns the persisted baseline.
#[derive(Debug)]
pub struct CalibrationEngine {
    capacity: usize,
    state: RunState,
    window: Option<SampleWindow>,
    samples: Vec<f32>,
    result: CalibrationResult,
    stored_baseline: f32,
    last_calibration: u64,
}

impl CalibrationEngine {
    /// Create an engine collecting at most `capacity` samples per run.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: RunState::Idle,
            window: None,
            samples: Vec::with_capacity(capacity),
            result: CalibrationResult::default(),
            stored_baseline: DEFAULT_BASELINE_GAS,
            last_calibration: 0,
        }
    }

    /// Load the persisted baseline and apply it to the reader.
    ///
    /// Missing or non-positive stored values fall back to the default.
    pub fn load(&mut self, store: &dyn KvStore, reader: &mut SensorReader) {
        self.stored_baseline = store
            .get_f32(KEY_BASELINE)
            .filter(|b| *b > 0.0)
            .unwrap_or(DEFAULT_BASELINE_GAS);
        self.last_calibration = store.get_u64(KEY_LAST_CALIBRATION).unwrap_or(0);

        reader.set_baseline_gas(self.stored_baseline);
        info!(
            baseline = self.stored_baseline,
            last_calibration = self.last_calibration,
            "Loaded calibration"
        );
    }

    /// Begin a run. Ignored while a run is already in progress.
    pub fn start(&mut self, now_ms: u64, duration_seconds: u32) -> bool {
        if self.is_running() {
            warn!("Calibration already running, start ignored");
            return false;
        }

        let duration_ms = duration_seconds as u64 * 1000;
        self.window = Some(SampleWindow::new(now_ms, duration_ms, self.capacity));
        self.samples.clear();
        self.result = CalibrationResult::default();
        self.state = RunState::Running;

        info!("Calibration started, duration: {duration_seconds}s");
        info!("Please ensure sensor is in clean air");
        true
    }

    /// Abandon a running calibration without computing statistics.
    pub fn stop(&mut self, now_ms: u64) {
        if !self.is_running() {
            return;
        }

        info!("Calibration stopped by request");
        self.result = CalibrationResult {
            success: false,
            baseline_gas: 0.0,
            duration_ms: self.elapsed_ms(now_ms),
            error: ErrorMessage::truncated(ERROR_STOPPED),
        };
        self.state = RunState::Failed;
    }

    /// Advance a running calibration by one scheduler pass.
    pub fn tick(&mut self, clock: &dyn Clock, reader: &mut SensorReader, store: &mut dyn KvStore) {
        if !self.is_running() {
            return;
        }
        let now = clock.now_ms();

        let Some(window) = self.window.as_mut() else {
            return;
        };

        if window.is_complete(now) {
            self.finish(clock, reader, store);
            return;
        }

        if window.sample_due(now) && self.samples.len() < self.capacity {
            window.mark_sampled(now);
            let reading = reader.current_reading();
            if reading.is_unavailable() {
                debug!("No reading available for calibration sample");
                return;
            }
            self.samples.push(reading.gas_resistance);
            debug!(
                "Calibration sample {}/{}: gas={:.0} ohms",
                self.samples.len(),
                self.capacity,
                reading.gas_resistance
            );
        }
    }

    fn finish(&mut self, clock: &dyn Clock, reader: &mut SensorReader, store: &mut dyn KvStore) {
        let duration_ms = self.elapsed_ms(clock.now_ms());
        info!("Calibration complete: {} samples collected", self.samples.len());

        if self.samples.len() < MIN_CALIBRATION_SAMPLES {
            self.fail(0.0, duration_ms, ERROR_INSUFFICIENT_SAMPLES);
            return;
        }

        let stats = summarize(&self.samples);
        let cv = stats.coefficient_of_variation();
        if cv > MAX_COEFFICIENT_OF_VARIATION {
            self.fail(stats.mean, duration_ms, ERROR_TOO_VARIABLE);
            return;
        }

        self.result = CalibrationResult {
            success: true,
            baseline_gas: stats.mean,
            duration_ms,
            error: ErrorMessage::new(),
        };
        self.state = RunState::Succeeded;

        self.save_baseline(stats.mean, clock.wall_ms(), store);
        reader.set_baseline_gas(stats.mean);
        info!(
            "Calibration succeeded, baseline: {:.0} ohms (CV: {:.2}%)",
            stats.mean,
            cv * 100.0
        );
    }

    fn fail(&mut self, baseline_gas: f32, duration_ms: u32, message: &str) {
        warn!("Calibration failed: {message}");
        self.result = CalibrationResult {
            success: false,
            baseline_gas,
            duration_ms,
            error: ErrorMessage::truncated(message),
        };
        self.state = RunState::Failed;
    }

    fn save_baseline(&mut self, baseline: f32, wall_ms: u64, store: &mut dyn KvStore) {
        self.stored_baseline = baseline;
        self.last_calibration = wall_ms;

        let saved = store
            .put_f32(KEY_BASELINE, baseline)
            .and_then(|_| store.put_u64(KEY_LAST_CALIBRATION, wall_ms));
        match saved {
            Ok(()) => info!("Baseline saved: {baseline:.0} ohms"),
            Err(e) => error!("Baseline not persisted: {e}"),
        }
    }

    fn elapsed_ms(&self, now_ms: u64) -> u32 {
        self.window
            .as_ref()
            .map_or(0, |w| w.elapsed_ms(now_ms).min(u32::MAX as u64) as u32)
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Return a finished run to idle once its result has been reported.
    pub fn acknowledge(&mut self) {
        if self.state.is_terminal() {
            self.state = RunState::Idle;
        }
    }

    /// Percentage of the current run elapsed, 0 when not running.
    pub fn progress(&self, now_ms: u64) -> f32 {
        match (&self.window, self.is_running()) {
            (Some(window), true) => window.progress(now_ms),
            _ => 0.0,
        }
    }

    pub fn result(&self) -> &CalibrationResult {
        &self.result
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn stored_baseline(&self) -> f32 {
        self.stored_baseline
    }

    /// Wall-clock epoch ms of the last successful calibration, 0 if never.
    pub fn last_calibration(&self) -> u64 {
        self.last_calibration
    }
}
