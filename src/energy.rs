//! Temperature to energy estimation
//!
//! Fits a straight line of hourly energy against air temperature over stored
//! readings. When the readings cannot support a fit, estimates fall back to
//! interpolating linearly across the observed temperature range.

use serde::Serialize;

use crate::db::SensorReading;

/// Fewest usable samples for a regression fit.
const MIN_FIT_SAMPLES: usize = 5;

/// Least-squares line `energy = intercept + slope * temp`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateMethod {
    Regression,
    Interpolation,
}

/// One estimate with its cost at the site tariff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyEstimate {
    pub temp: f64,
    pub energy_kwh: f64,
    pub cost: f64,
    pub method: EstimateMethod,
    pub samples: usize,
    pub fit: Option<LinearFit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyEstimator {
    fit: Option<LinearFit>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    energy_min: f64,
    energy_max: f64,
    samples: usize,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

impl EnergyEstimator {
    /// Fit from `(temp, energy)` pairs. Non-finite pairs are ignored.
    ///
    /// With at least five usable pairs and varying energy a line is fitted;
    /// otherwise the estimator interpolates over the temperature range into
    /// `[0, 1]` kWh.
    pub fn fit(samples: &[(f64, f64)]) -> Self {
        let valid: Vec<(f64, f64)> = samples
            .iter()
            .copied()
            .filter(|(t, e)| t.is_finite() && e.is_finite())
            .collect();

        if valid.len() >= MIN_FIT_SAMPLES {
            let t_mean = mean(valid.iter().map(|(t, _)| *t)).unwrap_or(0.0);
            let e_mean = mean(valid.iter().map(|(_, e)| *e)).unwrap_or(0.0);
            let e_var = valid.iter().map(|(_, e)| (e - e_mean).powi(2)).sum::<f64>();

            if e_var > 0.0 {
                let t_var = valid.iter().map(|(t, _)| (t - t_mean).powi(2)).sum::<f64>();
                let cov = valid
                    .iter()
                    .map(|(t, e)| (t - t_mean) * (e - e_mean))
                    .sum::<f64>();
                // Constant temperature: the best line is flat at the mean
                let slope = if t_var > 0.0 { cov / t_var } else { 0.0 };
                let (temp_min, temp_max) = min_max(valid.iter().map(|(t, _)| *t)).unzip();
                let (energy_min, energy_max) =
                    min_max(valid.iter().map(|(_, e)| *e)).unwrap_or((0.0, 1.0));

                return Self {
                    fit: Some(LinearFit {
                        slope,
                        intercept: e_mean - slope * t_mean,
                    }),
                    temp_min,
                    temp_max,
                    energy_min,
                    energy_max,
                    samples: valid.len(),
                };
            }
        }

        let (temp_min, temp_max) =
            min_max(samples.iter().map(|(t, _)| *t).filter(|t| t.is_finite())).unzip();
        Self::interpolating(temp_min, temp_max, 0.0, 1.0, valid.len())
    }

    /// Fit from stored readings.
    pub fn from_readings(readings: &[SensorReading]) -> Self {
        let samples: Vec<(f64, f64)> = readings.iter().map(|r| (r.temp, r.energy_kwh)).collect();
        Self::fit(&samples)
    }

    /// Estimator that only interpolates between the given ranges.
    pub fn interpolating(
        temp_min: Option<f64>,
        temp_max: Option<f64>,
        energy_min: f64,
        energy_max: f64,
        samples: usize,
    ) -> Self {
        Self {
            fit: None,
            temp_min,
            temp_max,
            energy_min,
            energy_max,
            samples,
        }
    }

    pub fn method(&self) -> EstimateMethod {
        match self.fit {
            Some(_) => EstimateMethod::Regression,
            None => EstimateMethod::Interpolation,
        }
    }

    pub fn linear_fit(&self) -> Option<LinearFit> {
        self.fit
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Estimated energy in kWh at `temp`, never negative.
    pub fn estimate(&self, temp: f64) -> f64 {
        if let Some(fit) = self.fit {
            return (fit.intercept + fit.slope * temp).max(0.0);
        }

        match (self.temp_min, self.temp_max) {
            (Some(lo), Some(hi)) if (hi - lo).abs() >= 1e-8 => {
                let ratio = ((temp - lo) / (hi - lo)).clamp(0.0, 1.0);
                self.energy_min + ratio * (self.energy_max - self.energy_min)
            }
            _ => self.energy_min,
        }
    }

    /// Estimate at `temp` priced at `tariff_per_kwh`, cost rounded to 2 dp.
    pub fn estimate_with_cost(&self, temp: f64, tariff_per_kwh: f64) -> EnergyEstimate {
        let energy_kwh = self.estimate(temp);
        EnergyEstimate {
            temp,
            energy_kwh,
            cost: (energy_kwh * tariff_per_kwh * 100.0).round() / 100.0,
            method: self.method(),
            samples: self.samples,
            fit: self.fit,
        }
    }
}
