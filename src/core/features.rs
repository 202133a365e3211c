//! Feature computation from capture windows.
//!
//! A completed capture is summarised as a fixed 128-point vector for
//! off-device classification. The transform is deterministic and not
//! learned: segment boundaries, divisors and the resampling index formula
//! must stay exactly as below for vectors to remain comparable.
//!
//! | Range      | Content                                              |
//! |------------|------------------------------------------------------|
//! | `0..32`    | gas resampled to 32 points, / gas max               |
//! | `32..48`   | temperature resampled to 16 points, / temp max      |
//! | `48..56`   | humidity resampled to 8 points, / humidity max      |
//! | `56..88`   | reserved (zero)                                      |
//! | `88..92`   | gas mean, std dev, min, max, / gas max              |
//! | `92..96`   | temperature mean, std dev, min, max, / 100          |
//! | `96..100`  | humidity mean, std dev, min, max, / 100             |
//! | `100`      | gas slope (last - first) / n, / gas max             |
//! | `101..112` | reserved (zero)                                      |
//! | `112..128` | first 16 gas first-differences, / gas max           |
//!
//! The whole vector is then L2-normalised unless its magnitude is below
//! [`MIN_NORM`].

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Length of every feature vector.
pub const FEATURE_VECTOR_SIZE: usize = 128;

/// Magnitude below which the vector is left unnormalised.
pub const MIN_NORM: f32 = 1e-4;

const GAS_POINTS: usize = 32;
const TEMPERATURE_POINTS: usize = 16;
const HUMIDITY_POINTS: usize = 8;
const DERIVATIVE_POINTS: usize = 16;

const TEMPERATURE_OFFSET: usize = 32;
const HUMIDITY_OFFSET: usize = 48;
const GAS_STATS_OFFSET: usize = 88;
const TEMPERATURE_STATS_OFFSET: usize = 92;
const HUMIDITY_STATS_OFFSET: usize = 96;
const SLOPE_INDEX: usize = 100;
const DERIVATIVE_OFFSET: usize = 112;

/// Fixed scale for temperature (°C) and humidity (%) statistics.
const ENVIRONMENT_SCALE: f32 = 100.0;

/// Population summary statistics of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub mean: f32,
    /// Population standard deviation
    pub std_dev: f32,
    pub min: f32,
    pub max: f32,
}

impl SummaryStats {
    fn scaled(&self, divisor: f32) -> [f32; 4] {
        [
            self.mean / divisor,
            self.std_dev / divisor,
            self.min / divisor,
            self.max / divisor,
        ]
    }

    /// Standard deviation over mean, 0 when the mean is 0.
    pub fn coefficient_of_variation(&self) -> f32 {
        if self.mean == 0.0 {
            0.0
        } else {
            self.std_dev / self.mean
        }
    }
}

/// Summarise a channel. All fields are zero for an empty slice.
pub fn summarize(values: &[f32]) -> SummaryStats {
    if values.is_empty() {
        return SummaryStats::default();
    }

    let data: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    SummaryStats {
        mean: Statistics::mean(&data) as f32,
        std_dev: Statistics::population_std_dev(&data) as f32,
        min: Statistics::min(&data) as f32,
        max: Statistics::max(&data) as f32,
    }
}

/// Source indices used to decimate `sample_count` samples to `points`.
///
/// Yields `i * sample_count / points` for each of the first
/// `min(sample_count, points)` target positions.
pub fn resample_indices(sample_count: usize, points: usize) -> impl Iterator<Item = usize> {
    (0..sample_count.min(points)).map(move |i| i * sample_count / points)
}

/// Channel maximum used as a divisor, never below 1.0.
fn channel_max(values: &[f32]) -> f32 {
    values.iter().copied().fold(1.0_f32, f32::max)
}

fn write_resampled(vector: &mut [f32], offset: usize, values: &[f32], points: usize, max: f32) {
    for (slot, source) in resample_indices(values.len(), points).enumerate() {
        vector[offset + slot] = values[source] / max;
    }
}

/// Build the feature vector from three parallel channels.
///
/// The channels are expected to have equal length; the gas channel length
/// is taken as the sample count.
pub fn feature_vector(gas: &[f32], temperature: &[f32], humidity: &[f32]) -> Vec<f32> {
    let mut vector = vec![0.0_f32; FEATURE_VECTOR_SIZE];
    let samples = gas.len();

    let max_gas = channel_max(gas);
    let max_temperature = channel_max(temperature);
    let max_humidity = channel_max(humidity);

    write_resampled(&mut vector, 0, gas, GAS_POINTS, max_gas);
    write_resampled(
        &mut vector,
        TEMPERATURE_OFFSET,
        temperature,
        TEMPERATURE_POINTS,
        max_temperature,
    );
    write_resampled(
        &mut vector,
        HUMIDITY_OFFSET,
        humidity,
        HUMIDITY_POINTS,
        max_humidity,
    );

    vector[GAS_STATS_OFFSET..GAS_STATS_OFFSET + 4].copy_from_slice(&summarize(gas).scaled(max_gas));
    vector[TEMPERATURE_STATS_OFFSET..TEMPERATURE_STATS_OFFSET + 4]
        .copy_from_slice(&summarize(temperature).scaled(ENVIRONMENT_SCALE));
    vector[HUMIDITY_STATS_OFFSET..HUMIDITY_STATS_OFFSET + 4]
        .copy_from_slice(&summarize(humidity).scaled(ENVIRONMENT_SCALE));

    if samples > 1 {
        let slope = (gas[samples - 1] - gas[0]) / samples as f32;
        vector[SLOPE_INDEX] = slope / max_gas;
    }

    for (i, pair) in gas.windows(2).take(DERIVATIVE_POINTS).enumerate() {
        vector[DERIVATIVE_OFFSET + i] = (pair[1] - pair[0]) / max_gas;
    }

    normalize(&mut vector);
    vector
}

/// L2-normalise in place unless the magnitude is below [`MIN_NORM`].
pub fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude > MIN_NORM {
        for v in vector.iter_mut() {
            *v /= magnitude;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn norm(vector: &[f32]) -> f32 {
        vector.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    fn ramp(n: usize, start: f32, step: f32) -> Vec<f32> {
        (0..n).map(|i| start + step * i as f32).collect()
    }

    #[test]
    fn test_summarize() {
        let stats = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_relative_eq!(stats.mean, 5.0);
        assert_relative_eq!(stats.std_dev, 2.0);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert_relative_eq!(stats.coefficient_of_variation(), 0.4);

        assert_eq!(summarize(&[]), SummaryStats::default());
    }

    #[test]
    fn test_resample_indices_for_thirty_samples() {
        let indices: Vec<usize> = resample_indices(30, 32).collect();
        assert_eq!(indices.len(), 30);
        for (i, &source) in indices.iter().enumerate() {
            assert_eq!(source, i * 30 / 32);
        }
        assert_eq!(indices[29], 27);
    }

    #[test]
    fn test_resample_indices_for_long_runs() {
        let indices: Vec<usize> = resample_indices(60, 16).collect();
        assert_eq!(indices.len(), 16);
        assert_eq!(indices[0], 0);
        assert_eq!(indices[1], 3);
        assert_eq!(indices[15], 56);
    }

    #[test]
    fn test_vector_is_unit_norm() {
        for n in [2usize, 10, 30, 60] {
            let gas = ramp(n, 90_000.0, -500.0);
            let temperature = ramp(n, 22.0, 0.05);
            let humidity = ramp(n, 40.0, 0.1);

            let vector = feature_vector(&gas, &temperature, &humidity);
            assert_eq!(vector.len(), FEATURE_VECTOR_SIZE);
            assert!((norm(&vector) - 1.0).abs() < 1e-3, "n = {n}");
        }
    }

    #[test]
    fn test_reserved_segments_are_zero() {
        let n = 40;
        let vector = feature_vector(
            &ramp(n, 1000.0, 10.0),
            &ramp(n, 20.0, 0.1),
            &ramp(n, 50.0, 0.1),
        );

        assert!(vector[56..88].iter().all(|&v| v == 0.0));
        assert!(vector[101..112].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_segment_values_before_normalisation() {
        let gas = vec![100.0, 50.0, 100.0, 50.0];
        let temperature = vec![20.0; 4];
        let humidity = vec![40.0; 4];
        let vector = feature_vector(&gas, &temperature, &humidity);

        // Recover the raw vector scale from a known entry: gas[0] / max = 1
        let scale = vector[0];
        let raw: Vec<f32> = vector.iter().map(|v| v / scale).collect();

        // Four samples decimate to source index 0 for every slot
        for slot in 0..4 {
            assert_relative_eq!(raw[slot], 1.0, epsilon = 1e-5);
        }
        assert_eq!(raw[4], 0.0);
        assert_relative_eq!(raw[32], 1.0, epsilon = 1e-5);
        assert_relative_eq!(raw[48], 1.0, epsilon = 1e-5);
        assert_relative_eq!(raw[88], 0.75, epsilon = 1e-5);
        assert_relative_eq!(raw[89], 0.25, epsilon = 1e-5);
        assert_relative_eq!(raw[92], 0.2, epsilon = 1e-5);
        assert_relative_eq!(raw[96], 0.4, epsilon = 1e-5);
        assert_relative_eq!(raw[100], -12.5 / 100.0, epsilon = 1e-5);
        assert_relative_eq!(raw[112], -0.5, epsilon = 1e-5);
        assert_relative_eq!(raw[113], 0.5, epsilon = 1e-5);
        assert_relative_eq!(raw[114], -0.5, epsilon = 1e-5);
        assert_eq!(raw[115], 0.0);
    }

    #[test]
    fn test_empty_channels_stay_zero() {
        let vector = feature_vector(&[], &[], &[]);
        assert_eq!(vector.len(), FEATURE_VECTOR_SIZE);
        assert!(vector.iter().all(|&v| v == 0.0));
    }
}
