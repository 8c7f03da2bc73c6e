//! Training pipeline: normalize, window, fit

use std::time::{Duration, Instant};

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::config::ForecastConfig;

use super::model::TrainedForecaster;
use super::network::{Adam, NetworkShape, RecurrentNetwork};
use super::scaler::MinMaxScaler;
use super::{ForecastError, LOOK_BACK, ModelFamily};

/// Hyperparameters shared by every training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub look_back: usize,
    pub units: usize,
    pub dense_units: usize,
    pub dropout: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::from(&ForecastConfig::default())
    }
}

impl From<&ForecastConfig> for TrainingConfig {
    fn from(config: &ForecastConfig) -> Self {
        Self {
            look_back: LOOK_BACK,
            units: config.units.max(1),
            dense_units: config.dense_units.max(1),
            dropout: config.dropout.clamp(0.0, 0.9),
            learning_rate: config.learning_rate,
            batch_size: config.batch_size.max(1),
            seed: config.seed,
        }
    }
}

impl TrainingConfig {
    pub fn shape(&self) -> NetworkShape {
        NetworkShape {
            look_back: self.look_back,
            units: self.units,
            dense_units: self.dense_units,
            dropout: self.dropout,
        }
    }
}

/// Outcome of a training run.
#[derive(Debug)]
pub struct TrainingResult {
    pub forecaster: TrainedForecaster,
    pub duration: Duration,
}

/// Supervised (window, next value) pairs over a normalized series.
///
/// A series of length `n` yields `n - look_back` examples, or none at all if
/// it is not longer than `look_back`.
pub fn sliding_windows(series: &[f64], look_back: usize) -> Vec<(&[f64], f64)> {
    series
        .windows(look_back + 1)
        .map(|w| (&w[..look_back], w[look_back]))
        .collect()
}

pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Fit a fresh network of `family` to `series` for `epochs` passes.
    ///
    /// Runs are reproducible: the same series and configuration always
    /// produce bit-identical weights.
    pub fn train(
        &self,
        series: &[f64],
        family: ModelFamily,
        epochs: usize,
    ) -> Result<TrainingResult, ForecastError> {
        let look_back = self.config.look_back;
        if series.len() < look_back {
            return Err(ForecastError::InsufficientData {
                required: look_back,
                actual: series.len(),
            });
        }
        if let Some(idx) = series.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::NonFiniteInput(idx));
        }

        let started = Instant::now();
        let scaler = MinMaxScaler::fit(series);
        let normalized = scaler.normalize_all(series);
        let examples = sliding_windows(&normalized, look_back);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut network = RecurrentNetwork::new(family, self.config.shape(), &mut rng);

        // Exactly look_back points leaves nothing to fit; the untrained
        // network is still usable for a rollout.
        let mut final_loss = None;
        if !examples.is_empty() {
            let mut optimizer = Adam::new(&network, self.config.learning_rate);
            let mut order: Vec<usize> = (0..examples.len()).collect();

            for epoch in 0..epochs {
                order.shuffle(&mut rng);
                let mut epoch_loss = 0.0;

                for chunk in order.chunks(self.config.batch_size) {
                    let batch: Vec<(&[f64], f64)> = chunk.iter().map(|&i| examples[i]).collect();
                    let loss = network.train_batch(&batch, &mut optimizer, &mut rng);
                    epoch_loss += loss * batch.len() as f64;
                }

                let epoch_loss = epoch_loss / examples.len() as f64;
                if !epoch_loss.is_finite() {
                    return Err(ForecastError::Training(format!(
                        "loss diverged at epoch {}",
                        epoch + 1
                    )));
                }
                tracing::trace!(epoch = epoch + 1, loss = epoch_loss, "Epoch complete");
                final_loss = Some(epoch_loss);
            }
        }

        let duration = started.elapsed();
        tracing::debug!(
            family = family.as_str(),
            samples = examples.len(),
            epochs,
            loss = ?final_loss,
            elapsed_ms = duration.as_millis() as u64,
            "Training finished"
        );

        Ok(TrainingResult {
            forecaster: TrainedForecaster::new(
                network,
                scaler,
                examples.len(),
                final_loss,
                Utc::now(),
            ),
            duration,
        })
    }
}
