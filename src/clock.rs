//! Time sources for the scheduler.
//!
//! All intervals in the runtime are elapsed-since-last-event comparisons
//! against [`Clock::now_ms`]. Wall-clock time is only used for values that
//! must stay meaningful across restarts, such as the calibration timestamp.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub trait Clock: Send {
    /// Monotonic milliseconds since the clock was created.
    fn now_ms(&self) -> u64;

    /// Milliseconds since the Unix epoch.
    fn wall_ms(&self) -> u64;
}

/// Real time: monotonic uptime plus the system wall clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn wall_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Hand-advanced clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    epoch_ms: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at `now_ms` with wall time `epoch_ms + now_ms`.
    pub fn starting_at(now_ms: u64, epoch_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now_ms)),
            epoch_ms,
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn wall_ms(&self) -> u64 {
        self.epoch_ms + self.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::starting_at(100, 1_700_000_000_000);
        let other = clock.clone();

        clock.advance(50);
        assert_eq!(other.now_ms(), 150);
        assert_eq!(other.wall_ms(), 1_700_000_000_150);

        other.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(clock.wall_ms() > 1_600_000_000_000);
    }
}
