//! Device operating modes.

use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceMode {
    #[default]
    Idle,
    Monitoring,
    Calibrating,
    Capturing,
    Error,
}

/// The one mapping between modes and their wire names.
const MODE_NAMES: [(DeviceMode, &str); 5] = [
    (DeviceMode::Idle, "idle"),
    (DeviceMode::Monitoring, "monitoring"),
    (DeviceMode::Calibrating, "calibrating"),
    (DeviceMode::Capturing, "capturing"),
    (DeviceMode::Error, "error"),
];

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        MODE_NAMES
            .iter()
            .find(|(mode, _)| mode == self)
            .map_or("error", |(_, name)| name)
    }

    /// Look up a mode by wire name.
    pub fn from_name(name: &str) -> Option<DeviceMode> {
        MODE_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(mode, _)| *mode)
    }

    pub fn all() -> impl Iterator<Item = DeviceMode> {
        MODE_NAMES.iter().map(|(mode, _)| *mode)
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeviceMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
