//! Bio Sentinel Agent - on-device runtime for an electronic nose.
//!
//! This library samples a gas/temperature/humidity/pressure sensor, keeps a
//! rolling history, calibrates a clean-air baseline, records timed scent
//! captures with a fingerprint feature vector, and exchanges JSON events and
//! commands with a telemetry server.
//!
//! # Guarantees
//!
//! - **Bounded memory**: history, capture buffers and text fields have fixed capacities
//! - **No panics on bad input**: malformed commands are logged and dropped
//! - **Completion events survive short outages**: they are queued while disconnected
//! - **Persistent calibration**: the baseline and heater choice survive restarts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Bio Sentinel Agent                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Sensor    │──▶│    Mode     │──▶│  Telemetry  │       │
//! │  │   Reader    │   │ Controller  │◀──│   Channel   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                      │         │                            │
//! │                      ▼         ▼                            │
//! │             ┌─────────────┐ ┌─────────────┐                 │
//! │             │ Calibration │ │   Capture   │                 │
//! │             │   Engine    │ │   Engine    │                 │
//! │             └─────────────┘ └─────────────┘                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bio_sentinel_agent::agent::{Agent, Collaborators};
//! use bio_sentinel_agent::channel::TcpTransport;
//! use bio_sentinel_agent::clock::SystemClock;
//! use bio_sentinel_agent::platform::HostPlatform;
//! use bio_sentinel_agent::sensor::SimulatedDriver;
//! use bio_sentinel_agent::storage::MemoryStore;
//! use bio_sentinel_agent::Config;
//!
//! let config = Config::default();
//! let transport = TcpTransport::new(config.server.endpoint()).expect("runtime");
//! let mut agent = Agent::new(
//!     &config,
//!     Collaborators {
//!         driver: Box::new(SimulatedDriver::new()),
//!         transport: Box::new(transport),
//!         store: Box::new(MemoryStore::new()),
//!         clock: Box::new(SystemClock::new()),
//!         platform: Box::new(HostPlatform::new()),
//!     },
//! );
//! agent.begin().expect("sensor");
//! loop {
//!     agent.tick();
//!     std::thread::sleep(config.tick_interval);
//! }
//! ```

pub mod agent;
pub mod channel;
pub mod clock;
pub mod config;
pub mod core;
pub mod platform;
pub mod sensor;
pub mod storage;

// Re-export key types at crate root for convenience
pub use agent::{Agent, Collaborators};
pub use channel::{Command, Event, TelemetryChannel};
pub use config::{Config, ServerConfig};
pub use core::{DeviceMode, ModeController, TickOutcome};
pub use sensor::{Reading, SensorReader};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
