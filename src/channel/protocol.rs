//! JSON message protocol between the device and the server.
//!
//! Inbound commands: `{"type": <string>, "payload": {...}}`, payload
//! optional. Outbound events: `{"type": <string>, "timestamp": <ms>,
//! "payload": {...}}` with a fixed field set per type.

use crate::core::bounded::ErrorMessage;
use crate::core::mode::DeviceMode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_CALIBRATION_SECONDS: u32 = 60;
pub const DEFAULT_CAPTURE_SECONDS: u32 = 30;
pub const DEFAULT_RESTART_REASON: &str = "Requested by server";

/// Protocol errors. None of them affect the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Not a JSON object
    Malformed(String),
    /// No string `type` field
    MissingType,
    /// `type` names no known command
    UnknownType(String),
    /// Payload fields missing or of the wrong type
    InvalidPayload { kind: String, message: String },
    /// An outbound event could not be encoded
    Encode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Malformed(e) => write!(f, "Malformed message: {e}"),
            ProtocolError::MissingType => write!(f, "Message missing 'type' field"),
            ProtocolError::UnknownType(t) => write!(f, "Unknown command: {t}"),
            ProtocolError::InvalidPayload { kind, message } => {
                write!(f, "Invalid payload for {kind}: {message}")
            }
            ProtocolError::Encode(e) => write!(f, "Failed to encode event: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// A command from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetMode {
        mode: String,
    },
    SetHeaterProfile {
        profile: String,
    },
    StartCalibration {
        duration_seconds: u32,
    },
    StartCapture {
        capture_id: String,
        duration_seconds: u32,
        label: String,
        heater_profile: String,
    },
    Stop,
    RequestStatus,
    Restart {
        reason: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetMode { .. } => "set_mode",
            Command::SetHeaterProfile { .. } => "set_heater_profile",
            Command::StartCalibration { .. } => "start_calibration",
            Command::StartCapture { .. } => "start_capture",
            Command::Stop => "stop",
            Command::RequestStatus => "request_status",
            Command::Restart { .. } => "restart",
        }
    }
}

#[derive(Deserialize)]
struct SetModePayload {
    mode: String,
}

#[derive(Deserialize)]
struct SetHeaterProfilePayload {
    profile: String,
}

#[derive(Deserialize)]
struct StartCalibrationPayload {
    #[serde(default = "default_calibration_seconds")]
    duration_seconds: u32,
}

#[derive(Deserialize)]
struct StartCapturePayload {
    #[serde(default = "default_capture_id")]
    capture_id: String,
    #[serde(default = "default_capture_seconds")]
    duration_seconds: u32,
    #[serde(default)]
    label: String,
    #[serde(default = "default_capture_profile")]
    heater_profile: String,
}

#[derive(Deserialize)]
struct RestartPayload {
    #[serde(default = "default_restart_reason")]
    reason: String,
}

fn default_calibration_seconds() -> u32 {
    DEFAULT_CALIBRATION_SECONDS
}

fn default_capture_seconds() -> u32 {
    DEFAULT_CAPTURE_SECONDS
}

fn default_capture_id() -> String {
    crate::core::capture::DEFAULT_CAPTURE_ID.to_string()
}

fn default_capture_profile() -> String {
    crate::core::capture::DEFAULT_CAPTURE_PROFILE.to_string()
}

fn default_restart_reason() -> String {
    DEFAULT_RESTART_REASON.to_string()
}

fn payload<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, ProtocolError> {
    // A missing or null payload reads as an empty object, a null field as absent
    let payload = match payload {
        Value::Null => Value::Object(Default::default()),
        Value::Object(mut fields) => {
            fields.retain(|_, v| !v.is_null());
            Value::Object(fields)
        }
        other => other,
    };
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

/// Parse one inbound text frame.
pub fn parse_command(text: &str) -> Result<Command, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let Value::Object(mut envelope) = value else {
        return Err(ProtocolError::Malformed("expected a JSON object".to_string()));
    };

    let kind = match envelope.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(ProtocolError::MissingType),
    };
    let body = envelope.remove("payload").unwrap_or(Value::Null);

    let command = match kind.as_str() {
        "set_mode" => {
            let p: SetModePayload = payload(&kind, body)?;
            Command::SetMode { mode: p.mode }
        }
        "set_heater_profile" => {
            let p: SetHeaterProfilePayload = payload(&kind, body)?;
            Command::SetHeaterProfile { profile: p.profile }
        }
        "start_calibration" => {
            let p: StartCalibrationPayload = payload(&kind, body)?;
            Command::StartCalibration {
                duration_seconds: p.duration_seconds,
            }
        }
        "start_capture" => {
            let p: StartCapturePayload = payload(&kind, body)?;
            Command::StartCapture {
                capture_id: p.capture_id,
                duration_seconds: p.duration_seconds,
                label: p.label,
                heater_profile: p.heater_profile,
            }
        }
        "stop" => Command::Stop,
        "request_status" => Command::RequestStatus,
        "restart" => {
            let p: RestartPayload = payload(&kind, body)?;
            Command::Restart { reason: p.reason }
        }
        _ => return Err(ProtocolError::UnknownType(kind)),
    };

    Ok(command)
}

/// An outbound event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Device uptime in ms
    pub timestamp: u64,
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    pub fn new(timestamp: u64, body: EventBody) -> Self {
        Self { timestamp, body }
    }

    pub fn kind(&self) -> &'static str {
        match self.body {
            EventBody::SensorReading(_) => "sensor_reading",
            EventBody::DeviceStatus(_) => "device_status",
            EventBody::CaptureComplete(_) => "capture_complete",
            EventBody::CalibrationComplete(_) => "calibration_complete",
            EventBody::Error(_) => "error",
        }
    }

    /// Completion events must survive a dropped connection.
    pub fn is_completion(&self) -> bool {
        matches!(
            self.body,
            EventBody::CaptureComplete(_) | EventBody::CalibrationComplete(_)
        )
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventBody {
    SensorReading(SensorReadingPayload),
    DeviceStatus(DeviceStatusPayload),
    CaptureComplete(CaptureCompletePayload),
    CalibrationComplete(CalibrationCompletePayload),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorReadingPayload {
    pub device_id: String,
    pub gas_resistance: f32,
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub iaq_score: u16,
    pub iaq_accuracy: u8,
    pub co2_equivalent: f32,
    pub voc_equivalent: f32,
    pub heater_temp: u16,
    pub heater_duration: u16,
    pub mode: DeviceMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusPayload {
    pub mode: DeviceMode,
    pub uptime_ms: u64,
    pub wifi_rssi: i32,
    pub sensor_healthy: bool,
    /// Epoch ms of the last successful calibration, 0 if never
    pub last_calibration: u64,
    pub heater_profile: String,
    pub firmware_version: String,
    pub free_heap: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureCompletePayload {
    pub capture_id: String,
    pub device_id: String,
    pub duration_ms: u32,
    pub samples_count: usize,
    pub gas_readings: Vec<f32>,
    pub temperature_readings: Vec<f32>,
    pub humidity_readings: Vec<f32>,
    pub baseline_gas: f32,
    pub peak_gas: f32,
    pub delta_gas: f32,
    pub feature_vector: Vec<f32>,
    pub heater_profile: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationCompletePayload {
    pub device_id: String,
    pub success: bool,
    pub baseline_gas: f32,
    pub duration_ms: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub error_code: String,
    pub message: String,
    pub severity: Severity,
    pub recoverable: bool,
}

impl ErrorPayload {
    /// Build an error payload, truncating the message to the error capacity.
    pub fn new(error_code: &str, message: &str, severity: Severity, recoverable: bool) -> Self {
        Self {
            error_code: error_code.to_string(),
            message: ErrorMessage::truncated(message).to_string(),
            severity,
            recoverable,
        }
    }
}

/// An empty message reads as absent.
pub fn optional_error(message: &str) -> Option<String> {
    (!message.is_empty()).then(|| message.to_string())
}
