//! Device mode state machine.
//!
//! The [`ModeController`] owns the sensor reader and both engines. Each tick
//! it applies queued server commands, advances whichever engine the current
//! mode runs, reports a finished run and returns to monitoring, and emits
//! periodic telemetry.
//!
//! Leaving `calibrating` or `capturing` for any reason other than the run
//! finishing stops that run as "stopped by user". Such runs are not
//! reported.

use crate::channel::protocol::{
    optional_error, CalibrationCompletePayload, CaptureCompletePayload, DeviceStatusPayload,
    ErrorPayload, SensorReadingPayload, DEFAULT_CALIBRATION_SECONDS, DEFAULT_CAPTURE_SECONDS,
};
use crate::channel::{Command, Event, EventBody, Severity, TelemetryChannel};
use crate::clock::Clock;
use crate::core::calibration::CalibrationEngine;
use crate::core::capture::{CaptureEngine, CaptureRequest};
use crate::core::mode::DeviceMode;
use crate::platform::Platform;
use crate::sensor::{DriverError, HeaterProfile, SensorReader};
use crate::storage::{KvStore, KEY_HEATER_PROFILE};
use tracing::{debug, error, info, warn};

pub const ERROR_SENSOR_READ_FAILED: &str = "SENSOR_READ_FAILED";
pub const ERROR_INVALID_MODE: &str = "INVALID_MODE";

/// What the scheduler should do after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The server asked for a restart; control should not return to the loop
    Restart { reason: String },
}

/// Controller identity and timing.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub device_id: String,
    pub firmware_version: String,
    pub history_capacity: usize,
    pub sensor_report_interval_ms: u64,
    pub status_report_interval_ms: u64,
    pub default_calibration_seconds: u32,
    pub default_capture_seconds: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            device_id: "xbs-esp32-001".to_string(),
            firmware_version: crate::VERSION.to_string(),
            history_capacity: crate::sensor::DEFAULT_HISTORY_CAPACITY,
            sensor_report_interval_ms: 1000,
            status_report_interval_ms: 30_000,
            default_calibration_seconds: DEFAULT_CALIBRATION_SECONDS,
            default_capture_seconds: DEFAULT_CAPTURE_SECONDS,
        }
    }
}

/// Per-call collaborators of the controller.
pub struct TickContext<'a> {
    pub clock: &'a dyn Clock,
    pub channel: &'a mut TelemetryChannel,
    pub platform: &'a dyn Platform,
}

pub struct ModeController {
    settings: ControllerSettings,
    mode: DeviceMode,
    reader: SensorReader,
    calibration: CalibrationEngine,
    capture: CaptureEngine,
    store: Box<dyn KvStore>,
    last_sensor_send: Option<u64>,
    last_status_send: u64,
    sensor_was_healthy: bool,
    /// The last `set_mode` named no known mode
    invalid_mode: bool,
}

impl ModeController {
    pub fn new(
        reader: SensorReader,
        store: Box<dyn KvStore>,
        settings: ControllerSettings,
    ) -> Self {
        let capacity = settings.history_capacity;
        Self {
            settings,
            mode: DeviceMode::Idle,
            reader,
            calibration: CalibrationEngine::new(capacity),
            capture: CaptureEngine::new(capacity),
            store,
            last_sensor_send: None,
            last_status_send: 0,
            sensor_was_healthy: false,
            invalid_mode: false,
        }
    }

    /// Bring up the sensor, restore persisted state and enter monitoring.
    pub fn begin(&mut self, clock: &dyn Clock) -> Result<(), DriverError> {
        let now = clock.now_ms();
        self.reader.begin(now)?;

        self.calibration.load(self.store.as_ref(), &mut self.reader);
        if let Some(index) = self.store.get_u64(KEY_HEATER_PROFILE) {
            if self.reader.set_heater_profile(index as usize).is_none() {
                warn!("Ignoring stored heater profile index {index}");
            }
        }

        self.sensor_was_healthy = self.reader.is_healthy();
        self.set_mode(DeviceMode::Monitoring, now);
        Ok(())
    }

    /// Poll the sensor if its read interval has elapsed.
    pub fn poll_sensor(&mut self, now_ms: u64) -> bool {
        self.reader.update(now_ms)
    }

    /// One controller pass: commands, sensor health, the active engine, then
    /// periodic telemetry.
    pub fn update(&mut self, ctx: &mut TickContext<'_>) -> TickOutcome {
        while let Some(command) = ctx.channel.next_command() {
            if let TickOutcome::Restart { reason } = self.handle_command(command, ctx) {
                return TickOutcome::Restart { reason };
            }
        }

        let now = ctx.clock.now_ms();
        self.check_sensor_health(ctx);

        match self.mode {
            DeviceMode::Monitoring => {
                let interval = self.settings.sensor_report_interval_ms;
                let due = self
                    .last_sensor_send
                    .map_or(true, |last| now.saturating_sub(last) >= interval);
                if due && ctx.channel.is_connected() {
                    let event = self.sensor_reading_event(now);
                    ctx.channel.publish(event);
                    self.last_sensor_send = Some(now);
                }
            }
            DeviceMode::Calibrating => {
                self.calibration
                    .tick(ctx.clock, &mut self.reader, self.store.as_mut());
                if !self.calibration.is_running() {
                    let event = self.calibration_complete_event(now);
                    ctx.channel.publish(event);
                    self.calibration.acknowledge();
                    self.set_mode(DeviceMode::Monitoring, now);
                }
            }
            DeviceMode::Capturing => {
                self.capture.tick(now, &self.reader);
                if !self.capture.is_running() {
                    let event = self.capture_complete_event(now);
                    ctx.channel.publish(event);
                    self.capture.acknowledge();
                    self.set_mode(DeviceMode::Monitoring, now);
                }
            }
            DeviceMode::Idle | DeviceMode::Error => {}
        }

        if now.saturating_sub(self.last_status_send) >= self.settings.status_report_interval_ms
            && ctx.channel.is_connected()
        {
            self.report_status(ctx);
        }

        TickOutcome::Continue
    }

    /// Apply one server command.
    pub fn handle_command(&mut self, command: Command, ctx: &mut TickContext<'_>) -> TickOutcome {
        let now = ctx.clock.now_ms();

        match command {
            Command::SetMode { mode } => match DeviceMode::from_name(&mode) {
                Some(mode) => {
                    self.invalid_mode = false;
                    self.set_mode(mode, now);
                }
                None => {
                    warn!("Unknown mode '{mode}', entering error mode");
                    let message = format!("Unknown mode: {mode}");
                    self.publish_error(ctx, ERROR_INVALID_MODE, &message, Severity::Error);
                    self.set_mode(DeviceMode::Error, now);
                    self.invalid_mode = true;
                }
            },
            Command::SetHeaterProfile { profile } => self.select_heater_profile(&profile),
            Command::StartCalibration { duration_seconds } => {
                let seconds = if duration_seconds == 0 {
                    self.settings.default_calibration_seconds
                } else {
                    duration_seconds
                };
                self.set_mode(DeviceMode::Calibrating, now);
                self.calibration.start(now, seconds);
            }
            Command::StartCapture {
                capture_id,
                duration_seconds,
                label,
                heater_profile,
            } => {
                let seconds = if duration_seconds == 0 {
                    self.settings.default_capture_seconds
                } else {
                    duration_seconds
                };
                let request = CaptureRequest {
                    capture_id,
                    duration_ms: seconds as u64 * 1000,
                    label,
                    heater_profile,
                };
                self.set_mode(DeviceMode::Capturing, now);
                if let Some(replaced) = self.capture.start(now, &request) {
                    warn!(
                        "Capture {} replaced before completion ({} samples), not reported",
                        replaced.capture_id, replaced.sample_count
                    );
                }
            }
            Command::Stop => self.set_mode(DeviceMode::Monitoring, now),
            Command::RequestStatus => self.report_status(ctx),
            Command::Restart { reason } => {
                info!("Restarting: {reason}");
                return TickOutcome::Restart { reason };
            }
        }

        TickOutcome::Continue
    }

    fn set_mode(&mut self, mode: DeviceMode, now_ms: u64) {
        if mode == self.mode {
            return;
        }

        // Runs interrupted by a mode change are stopped, not reported
        if self.mode == DeviceMode::Calibrating && self.calibration.is_running() {
            self.calibration.stop(now_ms);
            self.calibration.acknowledge();
        }
        if self.mode == DeviceMode::Capturing && self.capture.is_running() {
            self.capture.stop(now_ms);
            self.capture.acknowledge();
        }

        info!("Mode changed from {} to {}", self.mode, mode);
        self.mode = mode;
        if mode != DeviceMode::Error {
            self.invalid_mode = false;
        }
    }

    fn select_heater_profile(&mut self, name: &str) {
        let Some(index) = HeaterProfile::index_of(name) else {
            debug!("Ignoring unknown heater profile '{name}'");
            return;
        };

        self.reader.set_heater_profile(index);
        if let Err(e) = self.store.put_u64(KEY_HEATER_PROFILE, index as u64) {
            error!("Heater profile not persisted: {e}");
        }
    }

    fn check_sensor_health(&mut self, ctx: &mut TickContext<'_>) {
        let healthy = self.reader.is_healthy();
        if self.sensor_was_healthy && !healthy {
            self.publish_error(
                ctx,
                ERROR_SENSOR_READ_FAILED,
                "Sensor read failed",
                Severity::Warning,
            );
        }
        self.sensor_was_healthy = healthy;
    }

    fn publish_error(
        &self,
        ctx: &mut TickContext<'_>,
        code: &str,
        message: &str,
        severity: Severity,
    ) {
        let event = Event::new(
            ctx.clock.now_ms(),
            EventBody::Error(ErrorPayload::new(code, message, severity, true)),
        );
        ctx.channel.publish(event);
    }

    /// Send a device status event now.
    pub fn report_status(&mut self, ctx: &mut TickContext<'_>) {
        let now = ctx.clock.now_ms();
        let payload = self.status_payload(now, ctx.platform);
        let event = Event::new(now, EventBody::DeviceStatus(payload));
        ctx.channel.publish(event);
        self.last_status_send = now;
    }

    /// Fault codes currently in effect.
    pub fn faults(&self) -> Vec<String> {
        let mut faults = Vec::new();
        if !self.reader.is_healthy() {
            faults.push(ERROR_SENSOR_READ_FAILED.to_string());
        }
        if self.invalid_mode {
            faults.push(ERROR_INVALID_MODE.to_string());
        }
        faults
    }

    pub fn status_payload(&self, now_ms: u64, platform: &dyn Platform) -> DeviceStatusPayload {
        DeviceStatusPayload {
            mode: self.mode,
            uptime_ms: now_ms,
            wifi_rssi: platform.rssi(),
            sensor_healthy: self.reader.is_healthy(),
            last_calibration: self.calibration.last_calibration(),
            heater_profile: self.reader.heater_profile().name.to_string(),
            firmware_version: self.settings.firmware_version.clone(),
            free_heap: platform.free_memory(),
            errors: self.faults(),
        }
    }

    fn sensor_reading_event(&self, now_ms: u64) -> Event {
        let reading = self.reader.current_reading();
        let profile = self.reader.heater_profile();
        Event::new(
            now_ms,
            EventBody::SensorReading(SensorReadingPayload {
                device_id: self.settings.device_id.clone(),
                gas_resistance: reading.gas_resistance,
                temperature: reading.temperature,
                humidity: reading.humidity,
                pressure: reading.pressure,
                iaq_score: reading.air_quality_score,
                iaq_accuracy: reading.air_quality_confidence,
                co2_equivalent: reading.co2_equivalent,
                voc_equivalent: reading.voc_equivalent,
                heater_temp: profile.temperature_c,
                heater_duration: profile.duration_ms,
                mode: self.mode,
            }),
        )
    }

    fn calibration_complete_event(&self, now_ms: u64) -> Event {
        let result = self.calibration.result();
        Event::new(
            now_ms,
            EventBody::CalibrationComplete(CalibrationCompletePayload {
                device_id: self.settings.device_id.clone(),
                success: result.success,
                baseline_gas: result.baseline_gas,
                duration_ms: result.duration_ms,
                error: optional_error(result.error.as_str()),
            }),
        )
    }

    fn capture_complete_event(&self, now_ms: u64) -> Event {
        let result = self.capture.result();
        Event::new(
            now_ms,
            EventBody::CaptureComplete(CaptureCompletePayload {
                capture_id: result.capture_id.to_string(),
                device_id: self.settings.device_id.clone(),
                duration_ms: result.duration_ms,
                samples_count: result.sample_count,
                gas_readings: result.gas_readings.clone(),
                temperature_readings: result.temperature_readings.clone(),
                humidity_readings: result.humidity_readings.clone(),
                baseline_gas: result.baseline_gas,
                peak_gas: result.peak_gas,
                delta_gas: result.delta_gas,
                feature_vector: result.feature_vector.clone(),
                heater_profile: result.heater_profile.to_string(),
                success: result.success,
                error: optional_error(result.error.as_str()),
            }),
        )
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn reader(&self) -> &SensorReader {
        &self.reader
    }

    pub fn calibration(&self) -> &CalibrationEngine {
        &self.calibration
    }

    pub fn capture(&self) -> &CaptureEngine {
        &self.capture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelSettings, LoopbackHandle, LoopbackTransport};
    use crate::clock::ManualClock;
    use crate::core::windowing::RunState;
    use crate::platform::StaticPlatform;
    use crate::sensor::{RawMeasurement, ScriptedDriver};
    use crate::storage::MemoryStore;
    use serde_json::Value;

    struct Rig {
        clock: ManualClock,
        channel: TelemetryChannel,
        platform: StaticPlatform,
        server: LoopbackHandle,
        controller: ModeController,
    }

    impl Rig {
        fn new() -> Self {
            let driver =
                ScriptedDriver::constant(RawMeasurement::new(100_000.0, 22.0, 40.0, 1013.0));
            let reader = SensorReader::new(Box::new(driver), 60, 1000);
            let transport = LoopbackTransport::new();
            let server = transport.handle();
            let mut rig = Self {
                clock: ManualClock::new(),
                channel: TelemetryChannel::new(Box::new(transport), ChannelSettings::default()),
                platform: StaticPlatform::default(),
                server,
                controller: ModeController::new(
                    reader,
                    Box::new(MemoryStore::new()),
                    ControllerSettings::default(),
                ),
            };
            rig.controller.begin(&rig.clock).unwrap();
            rig.channel.begin(0);
            rig.channel.maintain(0);
            rig
        }

        fn command(&mut self, command: Command) -> TickOutcome {
            let mut ctx = TickContext {
                clock: &self.clock,
                channel: &mut self.channel,
                platform: &self.platform,
            };
            self.controller.handle_command(command, &mut ctx)
        }

        fn tick(&mut self) -> TickOutcome {
            let now = self.clock.now_ms();
            self.controller.poll_sensor(now);
            self.channel.maintain(now);
            let mut ctx = TickContext {
                clock: &self.clock,
                channel: &mut self.channel,
                platform: &self.platform,
            };
            self.controller.update(&mut ctx)
        }

        fn sent_types(&self) -> Vec<String> {
            self.server
                .take_sent()
                .iter()
                .map(|s| {
                    let v: Value = serde_json::from_str(s).unwrap();
                    v["type"].as_str().unwrap().to_string()
                })
                .collect()
        }
    }

    #[test]
    fn test_begins_in_monitoring() {
        let rig = Rig::new();
        assert_eq!(rig.controller.mode(), DeviceMode::Monitoring);
        assert!(rig.controller.reader().is_healthy());
    }

    #[test]
    fn test_start_capture_while_calibrating() {
        let mut rig = Rig::new();
        rig.command(Command::StartCalibration { duration_seconds: 60 });
        assert_eq!(rig.controller.mode(), DeviceMode::Calibrating);
        assert!(rig.controller.calibration().is_running());

        rig.command(Command::StartCapture {
            capture_id: "c1".to_string(),
            duration_seconds: 30,
            label: String::new(),
            heater_profile: "high_sensitivity".to_string(),
        });
        assert_eq!(rig.controller.mode(), DeviceMode::Capturing);
        assert!(rig.controller.capture().is_running());

        // The interrupted calibration is stopped and not reported
        assert!(!rig.controller.calibration().is_running());
        assert!(rig.controller.calibration().result().error.as_str().contains("stopped by user"));
        rig.server.take_sent();
        rig.clock.advance(10);
        rig.tick();
        assert!(!rig.sent_types().contains(&"calibration_complete".to_string()));
    }

    #[test]
    fn test_stop_returns_to_monitoring() {
        let mut rig = Rig::new();
        rig.command(Command::StartCalibration { duration_seconds: 60 });
        rig.clock.advance(1000);
        rig.command(Command::Stop);

        assert_eq!(rig.controller.mode(), DeviceMode::Monitoring);
        assert_eq!(rig.controller.calibration().state(), RunState::Idle);
        assert_eq!(rig.controller.calibration().result().duration_ms, 1000);
    }

    #[test]
    fn test_capture_completion_is_reported() {
        let mut rig = Rig::new();
        rig.command(Command::StartCapture {
            capture_id: "cap-42".to_string(),
            duration_seconds: 2,
            label: "test".to_string(),
            heater_profile: "rapid".to_string(),
        });

        for _ in 0..250 {
            rig.clock.advance(10);
            rig.tick();
        }

        assert_eq!(rig.controller.mode(), DeviceMode::Monitoring);
        let sent = rig.server.take_sent();
        let complete: Value = sent
            .iter()
            .map(|s| serde_json::from_str::<Value>(s).unwrap())
            .find(|v| v["type"] == "capture_complete")
            .unwrap();
        let payload = &complete["payload"];
        assert_eq!(payload["capture_id"], "cap-42");
        assert_eq!(payload["heater_profile"], "rapid");
        assert_eq!(payload["success"], true);
        assert!(payload.get("error").is_none());
        assert_eq!(payload["feature_vector"].as_array().unwrap().len(), 128);
        assert!(payload["samples_count"].as_u64().unwrap() >= 10);
    }

    #[test]
    fn test_invalid_mode_enters_error_and_reports() {
        let mut rig = Rig::new();
        rig.server.take_sent();
        rig.command(Command::SetMode {
            mode: "party".to_string(),
        });

        assert_eq!(rig.controller.mode(), DeviceMode::Error);
        assert_eq!(rig.controller.faults(), vec![ERROR_INVALID_MODE.to_string()]);
        let sent = rig.server.take_sent();
        let event: Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(event["type"], "error");
        assert_eq!(event["payload"]["error_code"], "INVALID_MODE");

        rig.command(Command::SetMode {
            mode: "idle".to_string(),
        });
        assert_eq!(rig.controller.mode(), DeviceMode::Idle);
        assert!(rig.controller.faults().is_empty());
    }

    #[test]
    fn test_requested_error_mode_is_not_a_fault() {
        let mut rig = Rig::new();
        rig.server.take_sent();
        rig.command(Command::SetMode {
            mode: "error".to_string(),
        });

        assert_eq!(rig.controller.mode(), DeviceMode::Error);
        assert!(rig.controller.faults().is_empty());
        assert!(rig.server.take_sent().is_empty());

        rig.command(Command::SetMode {
            mode: "bogus".to_string(),
        });
        assert_eq!(rig.controller.faults(), vec![ERROR_INVALID_MODE.to_string()]);
    }

    #[test]
    fn test_heater_profile_selection_is_persisted() {
        let mut rig = Rig::new();
        rig.command(Command::SetHeaterProfile {
            profile: "low_power".to_string(),
        });
        assert_eq!(rig.controller.reader().heater_profile().name, "low_power");
        assert_eq!(rig.controller.store.get_u64(KEY_HEATER_PROFILE), Some(0));

        rig.command(Command::SetHeaterProfile {
            profile: "volcano".to_string(),
        });
        assert_eq!(rig.controller.reader().heater_profile().name, "low_power");
    }

    #[test]
    fn test_periodic_telemetry() {
        let mut rig = Rig::new();
        rig.server.take_sent();

        for _ in 0..3000 {
            rig.clock.advance(10);
            rig.tick();
        }

        let types = rig.sent_types();
        let readings = types.iter().filter(|t| *t == "sensor_reading").count();
        let statuses = types.iter().filter(|t| *t == "device_status").count();
        assert!((29..=31).contains(&readings), "{readings} readings");
        assert_eq!(statuses, 1);
    }

    #[test]
    fn test_request_status_and_restart() {
        let mut rig = Rig::new();
        rig.server.take_sent();
        assert_eq!(rig.command(Command::RequestStatus), TickOutcome::Continue);

        let sent = rig.server.take_sent();
        let status: Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(status["type"], "device_status");
        assert_eq!(status["payload"]["mode"], "monitoring");
        assert_eq!(status["payload"]["wifi_rssi"], -55);
        assert_eq!(status["payload"]["heater_profile"], "high_sensitivity");
        assert_eq!(status["payload"]["errors"], serde_json::json!([]));

        assert_eq!(
            rig.command(Command::Restart {
                reason: "update".to_string()
            }),
            TickOutcome::Restart {
                reason: "update".to_string()
            }
        );
    }
}
