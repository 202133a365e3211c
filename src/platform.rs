//! Boundary to the host platform.
//!
//! On the device this is the Wi-Fi link manager and the chip's memory
//! statistics. The scheduler only needs to keep the link maintained, know
//! whether it is up, and report signal strength and free memory.

pub trait Platform: Send {
    /// Keep the network link up; called at the start of every tick.
    fn maintain(&mut self, now_ms: u64);

    fn link_up(&self) -> bool;

    /// Received signal strength in dBm, 0 when unknown.
    fn rssi(&self) -> i32;

    /// Free memory in bytes, 0 when unknown.
    fn free_memory(&self) -> u64;
}

/// A host whose network is managed by the operating system.
#[derive(Debug, Clone, Default)]
pub struct HostPlatform;

impl HostPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for HostPlatform {
    fn maintain(&mut self, _now_ms: u64) {}

    fn link_up(&self) -> bool {
        true
    }

    fn rssi(&self) -> i32 {
        0
    }

    fn free_memory(&self) -> u64 {
        available_memory().unwrap_or(0)
    }
}

#[cfg(target_os = "linux")]
fn available_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(not(target_os = "linux"))]
fn available_memory() -> Option<u64> {
    None
}

/// Platform with a switchable link, for tests.
#[derive(Debug, Clone)]
pub struct StaticPlatform {
    pub link_up: bool,
    pub rssi: i32,
    pub free_memory: u64,
}

impl Default for StaticPlatform {
    fn default() -> Self {
        Self {
            link_up: true,
            rssi: -55,
            free_memory: 200_000,
        }
    }
}

impl Platform for StaticPlatform {
    fn maintain(&mut self, _now_ms: u64) {}

    fn link_up(&self) -> bool {
        self.link_up
    }

    fn rssi(&self) -> i32 {
        self.rssi
    }

    fn free_memory(&self) -> u64 {
        self.free_memory
    }
}
