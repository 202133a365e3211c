//! Core runtime logic.
//!
//! This module contains:
//! - Bounded text fields for device-side records
//! - Sample windows shared by calibration and capture
//! - Statistics and the fingerprint feature vector
//! - The calibration and capture engines
//! - The mode controller that ties them to the telemetry channel

pub mod bounded;
pub mod calibration;
pub mod capture;
pub mod controller;
pub mod features;
pub mod mode;
pub mod windowing;

// Re-export commonly used types
pub use bounded::{BoundedString, CaptureId, ErrorMessage, Label, ProfileName};
pub use calibration::{CalibrationEngine, CalibrationResult};
pub use capture::{CaptureEngine, CaptureRequest, CaptureResult};
pub use controller::{ControllerSettings, ModeController, TickContext, TickOutcome};
pub use features::{feature_vector, summarize, SummaryStats, FEATURE_VECTOR_SIZE};
pub use mode::DeviceMode;
pub use windowing::{RunState, SampleWindow};
