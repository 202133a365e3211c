//! Cooperative scheduler.
//!
//! One [`Agent::tick`] runs, in order: link maintenance, sensor poll,
//! channel maintenance, controller update. A reading polled in a tick is
//! therefore visible to the same tick's controller logic.

use crate::channel::{Command, TelemetryChannel, Transport};
use crate::clock::Clock;
use crate::config::Config;
use crate::core::controller::{ControllerSettings, ModeController, TickContext, TickOutcome};
use crate::platform::Platform;
use crate::sensor::{DriverError, SensorDriver, SensorReader};
use crate::storage::KvStore;
use crossbeam_channel::Sender;
use tracing::info;

/// Interval between resource log lines.
const RESOURCE_LOG_INTERVAL_MS: u64 = 60_000;

/// External collaborators of an agent.
pub struct Collaborators {
    pub driver: Box<dyn SensorDriver>,
    pub transport: Box<dyn Transport>,
    pub store: Box<dyn KvStore>,
    pub clock: Box<dyn Clock>,
    pub platform: Box<dyn Platform>,
}

pub struct Agent {
    clock: Box<dyn Clock>,
    platform: Box<dyn Platform>,
    channel: TelemetryChannel,
    controller: ModeController,
    last_resource_log: u64,
}

impl Agent {
    /// Wire the runtime from `config` and its collaborators.
    pub fn new(config: &Config, parts: Collaborators) -> Self {
        let read_interval_ms = config.sensor_read_interval.as_millis() as u64;
        let reader = SensorReader::new(parts.driver, config.history_capacity, read_interval_ms);
        let settings = ControllerSettings {
            device_id: config.device_id.clone(),
            firmware_version: config.firmware_version.clone(),
            history_capacity: config.history_capacity,
            sensor_report_interval_ms: read_interval_ms,
            status_report_interval_ms: config.status_report_interval.as_millis() as u64,
            default_calibration_seconds: config.default_calibration_duration.as_secs() as u32,
            default_capture_seconds: config.default_capture_duration.as_secs() as u32,
        };

        Self {
            clock: parts.clock,
            platform: parts.platform,
            channel: TelemetryChannel::new(parts.transport, config.channel_settings()),
            controller: ModeController::new(reader, parts.store, settings),
            last_resource_log: 0,
        }
    }

    /// Initialise the sensor and open the channel.
    pub fn begin(&mut self) -> Result<(), DriverError> {
        let now = self.clock.now_ms();
        self.platform.maintain(now);

        info!("Starting sensor");
        self.controller.begin(self.clock.as_ref())?;

        self.channel.begin(now);
        info!("Initialization complete");
        Ok(())
    }

    /// Run one scheduler pass.
    pub fn tick(&mut self) -> TickOutcome {
        let now = self.clock.now_ms();

        self.platform.maintain(now);
        self.controller.poll_sensor(now);
        if self.platform.link_up() {
            self.channel.maintain(now);
        }

        let mut ctx = TickContext {
            clock: self.clock.as_ref(),
            channel: &mut self.channel,
            platform: self.platform.as_ref(),
        };
        if ctx.channel.take_connected_edge() {
            info!("Channel connected, sending initial status");
            self.controller.report_status(&mut ctx);
        }
        let outcome = self.controller.update(&mut ctx);

        if now.saturating_sub(self.last_resource_log) >= RESOURCE_LOG_INTERVAL_MS {
            info!(
                free_memory = self.platform.free_memory(),
                rssi = self.platform.rssi(),
                "Resources"
            );
            self.last_resource_log = now;
        }

        outcome
    }

    /// Sender for injecting commands locally, as if from the server.
    pub fn command_sender(&self) -> Sender<Command> {
        self.channel.command_sender()
    }

    pub fn controller(&self) -> &ModeController {
        &self.controller
    }

    pub fn channel(&self) -> &TelemetryChannel {
        &self.channel
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}
