//! Fixed-capacity ring store of recent readings.

use crate::sensor::types::Reading;
use std::collections::VecDeque;

/// Default number of readings retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 60;

/// Holds the `capacity` most recent readings in chronological order.
///
/// Pushing onto a full buffer evicts the oldest reading.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest when full.
    pub fn push(&mut self, reading: Reading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    /// The `index`-th oldest reading currently held.
    ///
    /// Out-of-range indices yield the zeroed sentinel reading rather than
    /// an error; check [`Reading::is_unavailable`] when that matters.
    pub fn get(&self, index: usize) -> Reading {
        self.readings.get(index).copied().unwrap_or_default()
    }

    /// Most recently pushed reading, if any.
    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// Gas resistance of every held reading, oldest first.
    pub fn gas_series(&self) -> Vec<f32> {
        self.iter().map(|r| r.gas_resistance).collect()
    }

    /// Temperature of every held reading, oldest first.
    pub fn temperature_series(&self) -> Vec<f32> {
        self.iter().map(|r| r.temperature).collect()
    }

    /// Humidity of every held reading, oldest first.
    pub fn humidity_series(&self) -> Vec<f32> {
        self.iter().map(|r| r.humidity).collect()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(n: u64) -> Reading {
        Reading {
            gas_resistance: n as f32 * 10.0,
            timestamp: n,
            ..Reading::default()
        }
    }

    #[test]
    fn test_partial_fill_keeps_insertion_order() {
        let mut buffer = HistoryBuffer::new(5);
        for n in 1..=3 {
            buffer.push(reading(n));
        }

        assert_eq!(buffer.len(), 3);
        for i in 0..3 {
            assert_eq!(buffer.get(i).timestamp, i as u64 + 1);
        }
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut buffer = HistoryBuffer::new(4);
        // capacity + 3 insertions, indices 0..7
        for n in 0..7 {
            buffer.push(reading(n));
        }

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.get(0).timestamp, 3);
        assert_eq!(buffer.get(3).timestamp, 6);
        assert_eq!(buffer.latest().map(|r| r.timestamp), Some(6));
    }

    #[test]
    fn test_out_of_range_returns_sentinel() {
        let mut buffer = HistoryBuffer::new(2);
        assert!(buffer.get(0).is_unavailable());

        buffer.push(reading(1));
        assert!(!buffer.get(0).is_unavailable());
        assert!(buffer.get(1).is_unavailable());
        assert!(buffer.get(100).is_unavailable());
    }

    #[test]
    fn test_series_extraction() {
        let mut buffer = HistoryBuffer::new(3);
        for n in 1..=4 {
            buffer.push(reading(n));
        }
        assert_eq!(buffer.gas_series(), vec![20.0, 30.0, 40.0]);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 3);
    }
}
