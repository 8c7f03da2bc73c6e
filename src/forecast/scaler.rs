//! Min-max normalization paired with each trained network

use serde::{Deserialize, Serialize};

/// Affine map of the training range onto [0, 1].
///
/// A constant series has no range; it is treated as having a unit range so
/// every value normalizes to `0.0` and nothing divides by zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: f64,
    range: f64,
}

impl MinMaxScaler {
    /// Fit to the observed minimum and maximum of `series`.
    pub fn fit(series: &[f64]) -> Self {
        let (min, max) = series
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        if !min.is_finite() || !max.is_finite() {
            return Self {
                min: 0.0,
                range: 1.0,
            };
        }

        let range = max - min;
        Self {
            min,
            range: if range > 0.0 { range } else { 1.0 },
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn normalize(&self, value: f64) -> f64 {
        (value - self.min) / self.range
    }

    pub fn denormalize(&self, value: f64) -> f64 {
        value * self.range + self.min
    }

    pub fn normalize_all(&self, series: &[f64]) -> Vec<f64> {
        series.iter().map(|&v| self.normalize(v)).collect()
    }

    pub fn denormalize_all(&self, series: &[f64]) -> Vec<f64> {
        series.iter().map(|&v| self.denormalize(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_maps_extremes_to_unit_interval() {
        let scaler = MinMaxScaler::fit(&[20.0, 26.5, 33.0]);
        assert_eq!(scaler.normalize(20.0), 0.0);
        assert_eq!(scaler.normalize(33.0), 1.0);
        assert!((scaler.normalize(26.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_constant_series_normalizes_to_zero() {
        let scaler = MinMaxScaler::fit(&[21.0; 10]);
        let normalized = scaler.normalize_all(&[21.0; 10]);
        assert!(normalized.iter().all(|&v| v == 0.0));
        assert_eq!(scaler.denormalize(0.0), 21.0);
    }

    #[test]
    fn test_empty_series_does_not_panic() {
        let scaler = MinMaxScaler::fit(&[]);
        assert_eq!(scaler.range(), 1.0);
        assert_eq!(scaler.min(), 0.0);
    }

    #[test]
    fn test_values_outside_training_range_extrapolate() {
        let scaler = MinMaxScaler::fit(&[0.0, 10.0]);
        assert_eq!(scaler.normalize(15.0), 1.5);
        assert_eq!(scaler.denormalize(-0.5), -5.0);
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn normalize_roundtrip(values in prop::collection::vec(-1e4f64..1e4, 2..100)) {
                let scaler = MinMaxScaler::fit(&values);
                let restored = scaler.denormalize_all(&scaler.normalize_all(&values));
                for (orig, back) in values.iter().zip(restored.iter()) {
                    prop_assert!((orig - back).abs() <= 1e-9 * (1.0 + orig.abs()));
                }
            }

            #[test]
            fn normalized_values_stay_in_unit_interval(
                values in prop::collection::vec(-1e4f64..1e4, 1..100)
            ) {
                let scaler = MinMaxScaler::fit(&values);
                for v in scaler.normalize_all(&values) {
                    prop_assert!((-1e-12..=1.0 + 1e-12).contains(&v));
                }
            }

            #[test]
            fn constant_series_is_consistent(value in -1e4f64..1e4, len in 1usize..50) {
                let series = vec![value; len];
                let scaler = MinMaxScaler::fit(&series);
                let normalized = scaler.normalize_all(&series);
                prop_assert!(normalized.iter().all(|&v| v == normalized[0]));
            }
        }
    }
}
