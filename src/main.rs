//! Bio Sentinel agent CLI
//!
//! Runs the electronic-nose runtime against a simulated sensor and a TCP
//! telemetry server.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bio_sentinel_agent::{
    agent::{Agent, Collaborators},
    channel::TcpTransport,
    clock::{Clock, SystemClock},
    config::Config,
    core::{CalibrationEngine, TickOutcome},
    platform::HostPlatform,
    sensor::{
        HeaterProfile, SensorReader, SimulatedDriver, DEFAULT_HEATER_PROFILE, HEATER_PROFILES,
    },
    storage::{JsonFileStore, KvStore, KEY_BASELINE, KEY_HEATER_PROFILE, KEY_LAST_CALIBRATION},
    VERSION,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Pause before re-executing on a restart command.
const RESTART_DELAY: Duration = Duration::from_secs(1);

const PROGRESS_REPORT_INTERVAL_MS: u64 = 5_000;

#[derive(Parser)]
#[command(name = "bio-sentinel")]
#[command(author = "X Bio")]
#[command(version = VERSION)]
#[command(about = "Electronic nose runtime and telemetry agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted
    Run {
        /// Telemetry server host
        #[arg(long)]
        host: Option<String>,

        /// Telemetry server port
        #[arg(long)]
        port: Option<u16>,

        /// Device identifier ("auto" derives one from the hostname)
        #[arg(long)]
        device_id: Option<String>,

        /// Use the simulated sensor (the only driver on this host)
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        simulate: bool,
    },

    /// Show persisted calibration and settings
    Status,

    /// Show configuration
    Config,

    /// Run a calibration against the simulated sensor and persist the result
    Calibrate {
        /// Calibration length in seconds
        #[arg(long)]
        duration: Option<u32>,
    },

    /// List heater profiles
    Profiles,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            host,
            port,
            device_id,
            simulate,
        } => cmd_run(host, port, device_id, simulate),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        Commands::Calibrate { duration } => cmd_calibrate(duration),
        Commands::Profiles => {
            cmd_profiles();
            Ok(())
        }
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Using default configuration: {e}");
            Config::default()
        }
    }
}

fn open_store(config: &Config) -> Result<JsonFileStore> {
    config
        .ensure_directories()
        .context("Could not create data directory")?;
    JsonFileStore::open(&config.data_path, &config.storage_namespace)
        .context("Could not open persistent store")
}

fn cmd_run(
    host: Option<String>,
    port: Option<u16>,
    device_id: Option<String>,
    simulate: bool,
) -> Result<()> {
    let mut config = load_config();
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(device_id) = device_id {
        config.device_id = device_id;
    }
    config.device_id = config.resolved_device_id();
    if !simulate {
        bail!("No hardware sensor driver is available on this host; run with --simulate");
    }

    info!("Bio Sentinel v{VERSION}");
    info!("Device ID: {}", config.device_id);
    info!("Server: {}", config.server.endpoint());

    let store = open_store(&config)?;
    let transport = TcpTransport::new(config.server.endpoint())?;
    let mut agent = Agent::new(
        &config,
        Collaborators {
            driver: Box::new(SimulatedDriver::new()),
            transport: Box::new(transport),
            store: Box::new(store),
            clock: Box::new(SystemClock::new()),
            platform: Box::new(HostPlatform::new()),
        },
    );
    agent.begin().context("Sensor initialization failed")?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        if let TickOutcome::Restart { reason } = agent.tick() {
            info!("Restart requested: {reason}");
            drop(agent);
            thread::sleep(RESTART_DELAY);
            return restart();
        }
        thread::sleep(config.tick_interval);
    }

    info!("Shutting down");
    Ok(())
}

/// Replace this process with a fresh copy of itself.
#[cfg(unix)]
fn restart() -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("Could not locate executable")?;
    let err = std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(err).context("Restart failed")
}

#[cfg(not(unix))]
fn restart() -> Result<()> {
    let exe = std::env::current_exe().context("Could not locate executable")?;
    std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .spawn()
        .context("Restart failed")?;
    std::process::exit(0);
}

fn cmd_status() -> Result<()> {
    let config = load_config();
    let store = open_store(&config)?;

    println!("Bio Sentinel Status");
    println!("===================");
    println!();
    println!("Device ID: {}", config.device_id);
    println!("Server: {}", config.server.endpoint());
    println!("Store: {:?}", store.path());
    println!();

    match store.get_f32(KEY_BASELINE) {
        Some(baseline) => println!("Baseline gas: {baseline:.0} ohms"),
        None => println!("Baseline gas: not calibrated"),
    }
    match store
        .get_u64(KEY_LAST_CALIBRATION)
        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms as i64))
    {
        Some(at) => println!("Last calibration: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last calibration: never"),
    }
    let profile = store
        .get_u64(KEY_HEATER_PROFILE)
        .and_then(|i| HeaterProfile::by_index(i as usize))
        .or_else(|| HeaterProfile::by_index(DEFAULT_HEATER_PROFILE))
        .map_or("unknown", |p| p.name);
    println!("Heater profile: {profile}");
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_calibrate(duration: Option<u32>) -> Result<()> {
    let config = load_config();
    let mut store = open_store(&config)?;
    let seconds = duration.unwrap_or(config.default_calibration_duration.as_secs() as u32);
    if seconds == 0 {
        bail!("Calibration duration must be at least one second");
    }

    let clock = SystemClock::new();
    let read_interval_ms = config.sensor_read_interval.as_millis() as u64;
    let mut reader = SensorReader::new(
        Box::new(SimulatedDriver::new()),
        config.history_capacity,
        read_interval_ms,
    );
    reader.begin(clock.now_ms())?;

    let mut engine = CalibrationEngine::new(config.history_capacity);
    engine.load(&store, &mut reader);
    engine.start(clock.now_ms(), seconds);
    println!("Calibrating for {seconds}s, keep the sensor in clean air...");

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let mut last_report = 0;
    while engine.is_running() {
        let now = clock.now_ms();
        if !running.load(Ordering::SeqCst) {
            engine.stop(now);
            break;
        }
        reader.update(now);
        engine.tick(&clock, &mut reader, &mut store);
        if now.saturating_sub(last_report) >= PROGRESS_REPORT_INTERVAL_MS {
            println!("  {:.0}% ({} samples)", engine.progress(now), engine.sample_count());
            last_report = now;
        }
        thread::sleep(config.tick_interval);
    }

    let result = engine.result();
    if result.success {
        println!("Calibration succeeded");
        println!("  Baseline: {:.0} ohms", result.baseline_gas);
        println!("  Samples: {}", engine.sample_count());
        println!("  Saved to {:?}", store.path());
    } else {
        error!("Calibration failed: {}", result.error);
        println!("Calibration failed: {}", result.error);
    }
    Ok(())
}

fn cmd_profiles() {
    println!("Heater Profiles");
    println!("===============");
    for (i, profile) in HEATER_PROFILES.iter().enumerate() {
        let marker = if i == DEFAULT_HEATER_PROFILE {
            " (default)"
        } else {
            ""
        };
        println!(
            "  {:<17} {}°C for {}ms{}",
            profile.name, profile.temperature_c, profile.duration_ms, marker
        );
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
