//! End-to-end tests of the agent against an in-memory server

use approx::assert_relative_eq;
use bio_sentinel_agent::agent::{Agent, Collaborators};
use bio_sentinel_agent::channel::{Command, LoopbackHandle, LoopbackTransport};
use bio_sentinel_agent::clock::{Clock, ManualClock};
use bio_sentinel_agent::config::Config;
use bio_sentinel_agent::core::{DeviceMode, TickOutcome};
use bio_sentinel_agent::platform::StaticPlatform;
use bio_sentinel_agent::sensor::{DriverError, RawMeasurement, ScriptHandle, ScriptedDriver};
use bio_sentinel_agent::storage::MemoryStore;
use serde_json::Value;

const EPOCH_MS: u64 = 1_700_000_000_000;
const STEP_MS: u64 = 10;

struct Bench {
    clock: ManualClock,
    server: LoopbackHandle,
    script: ScriptHandle,
    agent: Agent,
}

impl Bench {
    fn new(transport: LoopbackTransport) -> Self {
        let clock = ManualClock::starting_at(0, EPOCH_MS);
        let driver = ScriptedDriver::constant(RawMeasurement::new(100_000.0, 22.0, 40.0, 1013.0));
        let script = driver.handle();
        let server = transport.handle();

        let mut agent = Agent::new(
            &Config::default(),
            Collaborators {
                driver: Box::new(driver),
                transport: Box::new(transport),
                store: Box::new(MemoryStore::new()),
                clock: Box::new(clock.clone()),
                platform: Box::new(StaticPlatform::default()),
            },
        );
        agent.begin().expect("scripted sensor starts");

        Self {
            clock,
            server,
            script,
            agent,
        }
    }

    /// Tick in small steps for `ms`, stopping early on a restart.
    fn run_for(&mut self, ms: u64) -> TickOutcome {
        let end = self.clock.now_ms() + ms;
        while self.clock.now_ms() < end {
            self.clock.advance(STEP_MS);
            let outcome = self.agent.tick();
            if outcome != TickOutcome::Continue {
                return outcome;
            }
        }
        TickOutcome::Continue
    }

    fn events(&self) -> Vec<Value> {
        self.server
            .take_sent()
            .iter()
            .map(|s| serde_json::from_str(s).expect("device sends JSON"))
            .collect()
    }
}

fn of_type<'a>(events: &'a [Value], kind: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["type"] == kind).collect()
}

#[test]
fn test_status_sent_on_connect() {
    let mut bench = Bench::new(LoopbackTransport::new());
    assert_eq!(bench.agent.tick(), TickOutcome::Continue);

    let events = bench.events();
    assert_eq!(events[0]["type"], "device_status");
    assert_eq!(events[0]["payload"]["mode"], "monitoring");
    assert_eq!(events[0]["payload"]["sensor_healthy"], true);
    assert_eq!(events[1]["type"], "sensor_reading");
    assert_eq!(events[1]["payload"]["device_id"], "xbs-esp32-001");
    assert_eq!(events[1]["payload"]["heater_temp"], 320);
}

#[test]
fn test_calibration_over_the_wire() {
    let mut bench = Bench::new(LoopbackTransport::new());
    bench.run_for(100);
    bench.server.take_sent();

    bench
        .server
        .inject(r#"{"type":"start_calibration","payload":{"duration_seconds":1}}"#);
    bench.run_for(STEP_MS);
    assert_eq!(bench.agent.controller().mode(), DeviceMode::Calibrating);

    bench.run_for(1200);
    let events = bench.events();
    let complete = of_type(&events, "calibration_complete");
    assert_eq!(complete.len(), 1);

    let payload = &complete[0]["payload"];
    assert_eq!(payload["success"], true);
    assert_eq!(payload["device_id"], "xbs-esp32-001");
    assert_relative_eq!(payload["baseline_gas"].as_f64().unwrap(), 100_000.0, epsilon = 0.5);
    assert!(payload["duration_ms"].as_u64().unwrap() >= 1000);
    assert!(payload.get("error").is_none());

    let controller = bench.agent.controller();
    assert_eq!(controller.mode(), DeviceMode::Monitoring);
    assert_relative_eq!(controller.reader().baseline_gas(), 100_000.0);
    assert!(controller.calibration().last_calibration() > EPOCH_MS);
}

#[test]
fn test_capture_preempts_calibration() {
    let mut bench = Bench::new(LoopbackTransport::new());
    bench.run_for(100);

    bench.server.inject(r#"{"type":"start_calibration"}"#);
    bench.run_for(STEP_MS);
    bench.server.inject(
        r#"{"type":"start_capture","payload":{"capture_id":"rose-1","duration_seconds":1,"label":"rose"}}"#,
    );
    bench.run_for(STEP_MS);
    assert_eq!(bench.agent.controller().mode(), DeviceMode::Capturing);

    bench.run_for(1500);
    let events = bench.events();
    assert!(of_type(&events, "calibration_complete").is_empty());

    let capture = of_type(&events, "capture_complete");
    assert_eq!(capture.len(), 1);
    let payload = &capture[0]["payload"];
    assert_eq!(payload["capture_id"], "rose-1");
    assert_eq!(payload["heater_profile"], "high_sensitivity");
    assert_eq!(payload["success"], true);
    assert_eq!(payload["delta_gas"], 0.0);
    assert_eq!(payload["feature_vector"].as_array().unwrap().len(), 128);
    assert_eq!(bench.agent.controller().mode(), DeviceMode::Monitoring);
}

#[test]
fn test_reconnect_backoff() {
    let mut bench = Bench::new(LoopbackTransport::refusing());
    assert_eq!(bench.server.connect_attempts(), 1);

    // Retries at 1s, 3s, 7s and 15s after startup
    bench.run_for(990);
    assert_eq!(bench.server.connect_attempts(), 1);
    bench.run_for(STEP_MS);
    assert_eq!(bench.server.connect_attempts(), 2);
    bench.run_for(14_000);
    assert_eq!(bench.server.connect_attempts(), 5);
    assert_eq!(bench.agent.channel().status().reconnect_attempt, 4);
    assert_eq!(bench.agent.channel().status().next_reconnect_delay_ms, 16_000);

    bench.server.set_accepting(true);
    bench.run_for(16_000 + 2 * STEP_MS);
    assert!(bench.server.is_connected());
    assert!(bench.agent.channel().is_connected());
    assert_eq!(bench.agent.channel().status().reconnect_attempt, 0);

    let events = bench.events();
    assert_eq!(events[0]["type"], "device_status");
}

#[test]
fn test_completion_held_until_reconnected() {
    let mut bench = Bench::new(LoopbackTransport::new());
    bench.run_for(100);

    bench.server.set_accepting(false);
    bench.server.disconnect();
    bench.run_for(STEP_MS);
    assert!(!bench.agent.channel().is_connected());
    bench.server.take_sent();

    bench
        .agent
        .command_sender()
        .send(Command::StartCapture {
            capture_id: "offline".to_string(),
            duration_seconds: 1,
            label: String::new(),
            heater_profile: "standard".to_string(),
        })
        .unwrap();
    bench.run_for(1200);
    assert_eq!(bench.agent.controller().mode(), DeviceMode::Monitoring);
    assert_eq!(bench.agent.channel().outbox_len(), 1);
    assert!(bench.server.sent().is_empty());

    bench.server.set_accepting(true);
    bench.run_for(5000);
    assert_eq!(bench.agent.channel().outbox_len(), 0);

    let events = bench.events();
    let capture = of_type(&events, "capture_complete");
    assert_eq!(capture.len(), 1);
    assert_eq!(capture[0]["payload"]["capture_id"], "offline");
    assert_eq!(capture[0]["payload"]["heater_profile"], "standard");
}

#[test]
fn test_sensor_failure_reported_once() {
    let mut bench = Bench::new(LoopbackTransport::new());
    bench.run_for(100);
    bench.server.take_sent();

    bench
        .script
        .push_failure(DriverError::ReadFailed("bus timeout".to_string()));
    bench.run_for(1000);
    assert!(!bench.agent.controller().reader().is_healthy());

    let events = bench.events();
    let errors = of_type(&events, "error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["payload"]["error_code"], "SENSOR_READ_FAILED");
    assert_eq!(errors[0]["payload"]["recoverable"], true);

    // The driver repeats its last measurement after the failure
    bench.run_for(1000);
    assert!(bench.agent.controller().reader().is_healthy());
    assert!(of_type(&bench.events(), "error").is_empty());
}

#[test]
fn test_bad_messages_are_ignored() {
    let mut bench = Bench::new(LoopbackTransport::new());
    bench.run_for(100);

    bench.server.inject("not json");
    bench.server.inject("[1, 2, 3]");
    bench.server.inject(r#"{"payload":{}}"#);
    bench.server.inject(r#"{"type":"self_destruct"}"#);
    assert_eq!(bench.run_for(100), TickOutcome::Continue);
    assert_eq!(bench.agent.controller().mode(), DeviceMode::Monitoring);
}

#[test]
fn test_restart_command() {
    let mut bench = Bench::new(LoopbackTransport::new());
    bench.run_for(100);

    bench.server.inject(r#"{"type":"restart"}"#);
    assert_eq!(
        bench.run_for(100),
        TickOutcome::Restart {
            reason: "Requested by server".to_string()
        }
    );
}

#[test]
fn test_null_fields_take_defaults() {
    let mut bench = Bench::new(LoopbackTransport::new());
    bench.run_for(100);

    bench
        .server
        .inject(r#"{"type":"start_capture","payload":{"capture_id":"c1","label":null}}"#);
    bench.run_for(STEP_MS);
    assert_eq!(bench.agent.controller().mode(), DeviceMode::Capturing);
    assert!(bench.agent.controller().capture().is_running());
}
