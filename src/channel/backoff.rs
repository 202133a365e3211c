//! Reconnection backoff.
//!
//! After each attempt the wait doubles, up to `initial * 2^5`, and never
//! exceeds the configured maximum. A successful connection resets both the
//! attempt counter and the delay.

/// Highest exponent applied to the initial delay.
const MAX_EXPONENT: u32 = 5;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    attempts: u32,
    delay_ms: u64,
    last_attempt_ms: Option<u64>,
}

impl Backoff {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_ms,
            max_ms,
            attempts: 0,
            delay_ms: initial_ms,
            last_attempt_ms: None,
        }
    }

    /// Record the connection attempt made at startup. The first retry waits
    /// the initial delay and does not count as an attempt.
    pub fn start(&mut self, now_ms: u64) {
        self.last_attempt_ms = Some(now_ms);
    }

    /// The current delay has passed since the last attempt.
    pub fn ready(&self, now_ms: u64) -> bool {
        self.last_attempt_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.delay_ms)
    }

    /// Count an attempt at `now_ms` and grow the delay.
    pub fn record_attempt(&mut self, now_ms: u64) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_ms = Some(now_ms);
        let factor = 1u64 << self.attempts.min(MAX_EXPONENT);
        self.delay_ms = self.initial_ms.saturating_mul(factor).min(self.max_ms);
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay_ms = self.initial_ms;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wait required after the last attempt before the next one.
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Waits between successive failed attempts, starting from startup.
    fn waits(backoff: &mut Backoff, count: usize) -> Vec<u64> {
        let mut now = 0;
        backoff.start(now);
        let mut waits = Vec::new();
        for _ in 0..count {
            let wait = backoff.delay_ms();
            assert!(!backoff.ready(now + wait - 1));
            assert!(backoff.ready(now + wait));
            now += wait;
            backoff.record_attempt(now);
            waits.push(wait);
        }
        waits
    }

    #[test]
    fn test_delays_double_up_to_exponent_limit() {
        let mut backoff = Backoff::new(1000, 600_000);
        assert_eq!(
            waits(&mut backoff, 8),
            vec![1000, 2000, 4000, 8000, 16_000, 32_000, 32_000, 32_000]
        );
    }

    #[test]
    fn test_delays_capped_at_maximum() {
        let mut backoff = Backoff::new(1000, 30_000);
        assert_eq!(
            waits(&mut backoff, 7),
            vec![1000, 2000, 4000, 8000, 16_000, 30_000, 30_000]
        );
        assert_eq!(backoff.attempts(), 7);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = Backoff::new(1000, 30_000);
        waits(&mut backoff, 4);
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.delay_ms(), 1000);

        backoff.record_attempt(100_000);
        assert_eq!(backoff.delay_ms(), 2000);
    }

    #[test]
    fn test_ready_before_any_attempt() {
        let backoff = Backoff::new(1000, 30_000);
        assert!(backoff.ready(0));
    }
}
