//! Timed odour captures.
//!
//! A capture samples gas, temperature and humidity for a fixed duration and
//! condenses the run into response figures and a feature vector. Lower gas
//! resistance means a stronger response, so the "peak" of a run is its
//! minimum resistance.

use crate::core::bounded::{CaptureId, ErrorMessage, Label, ProfileName};
use crate::core::features::feature_vector;
use crate::core::windowing::{RunState, SampleWindow};
use crate::sensor::SensorReader;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Fewest samples for a capture to count as successful.
pub const MIN_CAPTURE_SAMPLES: usize = 10;

pub const DEFAULT_CAPTURE_ID: &str = "capture";
pub const DEFAULT_CAPTURE_PROFILE: &str = "high_sensitivity";

pub const ERROR_INSUFFICIENT_SAMPLES: &str = "Insufficient samples collected";
pub const ERROR_STOPPED: &str = "Capture stopped by user";

/// Outcome of the most recent capture run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureResult {
    pub capture_id: CaptureId,
    pub label: Label,
    pub duration_ms: u32,
    pub sample_count: usize,
    pub gas_readings: Vec<f32>,
    pub temperature_readings: Vec<f32>,
    pub humidity_readings: Vec<f32>,
    /// First gas sample of the run
    pub baseline_gas: f32,
    /// Lowest gas sample of the run
    pub peak_gas: f32,
    /// `peak_gas - baseline_gas`
    pub delta_gas: f32,
    pub feature_vector: Vec<f32>,
    pub heater_profile: ProfileName,
    pub success: bool,
    pub error: ErrorMessage,
}

/// Parameters of a capture request.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub capture_id: String,
    pub duration_ms: u64,
    pub label: String,
    pub heater_profile: String,
}

/// Runs timed captures over three sensor channels.
#[derive(Debug)]
pub struct CaptureEngine {
    capacity: usize,
    state: RunState,
    window: Option<SampleWindow>,
    capture_id: CaptureId,
    label: Label,
    heater_profile: ProfileName,
    gas: Vec<f32>,
    temperature: Vec<f32>,
    humidity: Vec<f32>,
    result: CaptureResult,
}

impl CaptureEngine {
    /// Create an engine collecting at most `capacity` samples per channel.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: RunState::Idle,
            window: None,
            capture_id: CaptureId::new(),
            label: Label::new(),
            heater_profile: ProfileName::new(),
            gas: Vec::with_capacity(capacity),
            temperature: Vec::with_capacity(capacity),
            humidity: Vec::with_capacity(capacity),
            result: CaptureResult::default(),
        }
    }

    /// Begin a run.
    ///
    /// A run already in progress is finalised first. Its result is returned
    /// here, since [`result`](Self::result) then belongs to the new run.
    pub fn start(&mut self, now_ms: u64, request: &CaptureRequest) -> Option<CaptureResult> {
        let previous = if self.is_running() {
            warn!("Capture {} still running, finalizing it first", self.capture_id);
            self.finish(now_ms);
            Some(std::mem::take(&mut self.result))
        } else {
            None
        };

        if self.capture_id.set(&request.capture_id) {
            warn!("Capture id truncated to {} bytes", self.capture_id.capacity());
        }
        self.label.set(&request.label);
        self.heater_profile.set(&request.heater_profile);

        self.window = Some(SampleWindow::new(now_ms, request.duration_ms, self.capacity));
        self.gas.clear();
        self.temperature.clear();
        self.humidity.clear();
        self.result = CaptureResult::default();
        self.state = RunState::Running;

        info!(
            "Capture started: {}, duration: {}ms",
            self.capture_id, request.duration_ms
        );
        previous
    }

    /// Abandon a running capture without computing features.
    pub fn stop(&mut self, now_ms: u64) {
        if !self.is_running() {
            return;
        }

        info!("Capture stopped by request");
        self.result = CaptureResult {
            capture_id: self.capture_id.clone(),
            label: self.label.clone(),
            duration_ms: self.elapsed_ms(now_ms),
            sample_count: self.gas.len(),
            heater_profile: self.heater_profile.clone(),
            success: false,
            error: ErrorMessage::truncated(ERROR_STOPPED),
            ..CaptureResult::default()
        };
        self.state = RunState::Failed;
    }

    /// Advance a running capture by one scheduler pass.
    pub fn tick(&mut self, now_ms: u64, reader: &SensorReader) {
        if !self.is_running() {
            return;
        }

        let Some(window) = self.window.as_mut() else {
            return;
        };

        if window.is_complete(now_ms) {
            self.finish(now_ms);
            return;
        }

        if !window.sample_due(now_ms) || self.gas.len() >= self.capacity {
            return;
        }
        window.mark_sampled(now_ms);

        let reading = reader.current_reading();
        if reading.is_unavailable() {
            debug!("No reading available for capture sample");
            return;
        }

        self.gas.push(reading.gas_resistance);
        self.temperature.push(reading.temperature);
        self.humidity.push(reading.humidity);
        debug!(
            "Capture sample {}/{}: gas={:.0}, temp={:.1}, hum={:.1}",
            self.gas.len(),
            self.capacity,
            reading.gas_resistance,
            reading.temperature,
            reading.humidity
        );
    }

    fn finish(&mut self, now_ms: u64) {
        let samples = self.gas.len();
        info!("Capture complete: {samples} samples collected");

        let baseline_gas = self.gas.first().copied().unwrap_or(0.0);
        let peak_gas = self.gas.iter().copied().reduce(f32::min).unwrap_or(0.0);
        let success = samples >= MIN_CAPTURE_SAMPLES;

        self.result = CaptureResult {
            capture_id: self.capture_id.clone(),
            label: self.label.clone(),
            duration_ms: self.elapsed_ms(now_ms),
            sample_count: samples,
            gas_readings: self.gas.clone(),
            temperature_readings: self.temperature.clone(),
            humidity_readings: self.humidity.clone(),
            baseline_gas,
            peak_gas,
            delta_gas: peak_gas - baseline_gas,
            feature_vector: feature_vector(&self.gas, &self.temperature, &self.humidity),
            heater_profile: self.heater_profile.clone(),
            success,
            error: if success {
                ErrorMessage::new()
            } else {
                ErrorMessage::truncated(ERROR_INSUFFICIENT_SAMPLES)
            },
        };

        if success {
            self.state = RunState::Succeeded;
            info!(
                "Capture {} done: baseline={:.0}, peak={:.0}, delta={:.0}",
                self.capture_id, baseline_gas, peak_gas, self.result.delta_gas
            );
        } else {
            self.state = RunState::Failed;
            warn!("Capture {} failed: {ERROR_INSUFFICIENT_SAMPLES}", self.capture_id);
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

    pub fn sample_count(&self) -> usize {
        self.gas.len()
    }

    pub fn result(&self) -> &CaptureResult {
        &self.result
    }
}
