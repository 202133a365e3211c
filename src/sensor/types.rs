//! Reading and heater-profile types shared by the sensing pipeline.

use serde::{Deserialize, Serialize};

/// One processed measurement from the gas sensor.
///
/// Readings are immutable once produced. An all-zero reading is the
/// "unavailable" sentinel handed out by [`HistoryBuffer::get`](super::HistoryBuffer::get)
/// for out-of-range indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Gas resistance in ohms
    pub gas_resistance: f32,
    /// Temperature in °C
    pub temperature: f32,
    /// Relative humidity in %
    pub humidity: f32,
    /// Barometric pressure in hPa
    pub pressure: f32,
    /// Composite air-quality index, 0 (best) to 500 (worst)
    pub air_quality_score: u16,
    /// Confidence tier 0-3, grows with sensor burn-in
    pub air_quality_confidence: u8,
    /// Heuristic CO2-equivalent in ppm (400-5000)
    pub co2_equivalent: f32,
    /// Heuristic VOC-equivalent in ppm (0-25)
    pub voc_equivalent: f32,
    /// Whether the heater produced a usable gas measurement
    pub heater_stable: bool,
    /// Monotonic milliseconds since boot
    pub timestamp: u64,
}

impl Reading {
    /// True for the zeroed sentinel returned when no reading exists.
    pub fn is_unavailable(&self) -> bool {
        *self == Reading::default()
    }
}

/// A named heater temperature/duration preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaterProfile {
    pub name: &'static str,
    /// Target heater plate temperature in °C
    pub temperature_c: u16,
    /// Heating duration per measurement cycle in ms
    pub duration_ms: u16,
}

/// The fixed table of supported heater presets.
pub const HEATER_PROFILES: [HeaterProfile; 4] = [
    HeaterProfile {
        name: "low_power",
        temperature_c: 200,
        duration_ms: 100,
    },
    HeaterProfile {
        name: "standard",
        temperature_c: 280,
        duration_ms: 120,
    },
    HeaterProfile {
        name: "high_sensitivity",
        temperature_c: 320,
        duration_ms: 150,
    },
    HeaterProfile {
        name: "rapid",
        temperature_c: 350,
        duration_ms: 80,
    },
];

/// Index into [`HEATER_PROFILES`] used until a profile is selected.
pub const DEFAULT_HEATER_PROFILE: usize = 2;

impl HeaterProfile {
    /// Find a profile's table index by name.
    pub fn index_of(name: &str) -> Option<usize> {
        HEATER_PROFILES.iter().position(|p| p.name == name)
    }

    /// Get a profile by table index.
    pub fn by_index(index: usize) -> Option<&'static HeaterProfile> {
        HEATER_PROFILES.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_lookup() {
        assert_eq!(HeaterProfile::index_of("low_power"), Some(0));
        assert_eq!(HeaterProfile::index_of("rapid"), Some(3));
        assert_eq!(HeaterProfile::index_of("turbo"), None);

        let default = HeaterProfile::by_index(DEFAULT_HEATER_PROFILE).unwrap();
        assert_eq!(default.name, "high_sensitivity");
        assert_eq!(default.temperature_c, 320);
        assert!(HeaterProfile::by_index(4).is_none());
    }

    #[test]
    fn test_default_reading_is_unavailable() {
        assert!(Reading::default().is_unavailable());
        let reading = Reading {
            gas_resistance: 1.0,
            ..Reading::default()
        };
        assert!(!reading.is_unavailable());
    }
}
