//! Timed sampling windows shared by the calibration and capture engines.
//!
//! A run lasts a fixed duration and takes at most `capacity` samples,
//! spaced `duration / capacity` apart. Time is passed in explicitly so the
//! engines stay deterministic under test.

use serde::Serialize;

/// Lifecycle of a timed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

/// Timing of one sampling run.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    start_ms: u64,
    duration_ms: u64,
    interval_ms: u64,
    last_sample_ms: Option<u64>,
}

impl SampleWindow {
    /// Open a window at `start_ms` lasting `duration_ms`, spacing samples so
    /// that `capacity` of them span the whole duration.
    pub fn new(start_ms: u64, duration_ms: u64, capacity: usize) -> Self {
        Self {
            start_ms,
            duration_ms,
            interval_ms: duration_ms / capacity.max(1) as u64,
            last_sample_ms: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_ms)
    }

    /// The run has reached its duration.
    pub fn is_complete(&self, now_ms: u64) -> bool {
        self.elapsed_ms(now_ms) >= self.duration_ms
    }

    /// At least one sample interval has passed since the last sample.
    /// The first sample is due immediately.
    pub fn sample_due(&self, now_ms: u64) -> bool {
        self.last_sample_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.interval_ms)
    }

    pub fn mark_sampled(&mut self, now_ms: u64) {
        self.last_sample_ms = Some(now_ms);
    }

    /// Percentage of the duration elapsed, capped at 100.
    pub fn progress(&self, now_ms: u64) -> f32 {
        if self.duration_ms == 0 {
            return 100.0;
        }
        (self.elapsed_ms(now_ms) as f32 / self.duration_ms as f32 * 100.0).min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_interval_from_capacity() {
        let window = SampleWindow::new(1000, 30_000, 60);
        assert_eq!(window.interval_ms(), 500);
        assert_eq!(window.duration_ms(), 30_000);

        let degenerate = SampleWindow::new(0, 1000, 0);
        assert_eq!(degenerate.interval_ms(), 1000);
    }

    #[test]
    fn test_window_completion() {
        let window = SampleWindow::new(1000, 10_000, 10);
        assert!(!window.is_complete(1000));
        assert!(!window.is_complete(10_999));
        assert!(window.is_complete(11_000));
        // Clock readings before the start never underflow
        assert_eq!(window.elapsed_ms(500), 0);
    }

    #[test]
    fn test_sample_spacing() {
        let mut window = SampleWindow::new(0, 10_000, 10);
        assert!(window.sample_due(0));
        window.mark_sampled(0);

        assert!(!window.sample_due(999));
        assert!(window.sample_due(1000));
        window.mark_sampled(1000);
        assert!(!window.sample_due(1500));
    }

    #[test]
    fn test_progress() {
        let window = SampleWindow::new(0, 2000, 10);
        assert_eq!(window.progress(0), 0.0);
        assert_eq!(window.progress(500), 25.0);
        assert_eq!(window.progress(5000), 100.0);

        assert_eq!(SampleWindow::new(0, 0, 10).progress(0), 100.0);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Succeeded.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }
}
