//! Cache-or-train orchestration

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::ForecastConfig;
use crate::db::Metric;
use crate::traits::lock;

use super::cache::{CacheKey, CacheLookup, ModelCacheStore, ModelRecipe};
use super::fingerprint::Fingerprint;
use super::model::TrainedForecaster;
use super::training::{Trainer, TrainingConfig};
use super::{ForecastError, Granularity, ModelFamily};

/// Whether a forecast reused a cached model or trained a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Loaded,
    Retrained,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::Loaded => f.write_str("loaded"),
            CacheStatus::Retrained => f.write_str("retrained"),
        }
    }
}

/// Epoch count per granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochBudget {
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
}

impl EpochBudget {
    pub fn for_granularity(&self, granularity: Granularity) -> usize {
        match granularity {
            Granularity::Daily => self.daily,
            Granularity::Weekly => self.weekly,
            Granularity::Monthly => self.monthly,
        }
    }
}

impl From<&ForecastConfig> for EpochBudget {
    fn from(config: &ForecastConfig) -> Self {
        Self {
            daily: config.daily_epochs,
            weekly: config.weekly_epochs,
            monthly: config.monthly_epochs,
        }
    }
}

/// Values predicted for one request plus how they were obtained.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastOutcome {
    pub granularity: Granularity,
    pub metric: Metric,
    pub family: ModelFamily,
    /// Number of steps predicted
    pub horizon: usize,
    pub values: Vec<f64>,
    pub cache_status: CacheStatus,
    /// Length of the history the prediction was based on
    pub training_points: usize,
}

impl ForecastOutcome {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.granularity, self.metric, self.family)
    }
}

/// Serves forecasts from cached models, training only when the history for a
/// key has changed.
///
/// Concurrent requests for the same key are serialized so that a burst of
/// identical requests trains once and the rest load the fresh entry. Distinct
/// keys proceed in parallel.
pub struct ForecastEngine {
    store: ModelCacheStore,
    trainer: Trainer,
    epochs: EpochBudget,
    key_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    trainings: AtomicUsize,
}

impl ForecastEngine {
    pub fn new(config: &ForecastConfig) -> Self {
        Self::with_parts(
            ModelCacheStore::new(config.cache_dir.clone()),
            Trainer::new(TrainingConfig::from(config)),
            EpochBudget::from(config),
        )
    }

    pub fn with_parts(store: ModelCacheStore, trainer: Trainer, epochs: EpochBudget) -> Self {
        Self {
            store,
            trainer,
            epochs,
            key_locks: Mutex::new(HashMap::new()),
            trainings: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &ModelCacheStore {
        &self.store
    }

    /// Minimum history length accepted for any forecast.
    pub fn look_back(&self) -> usize {
        self.trainer.config().look_back
    }

    /// Number of training runs started by this engine.
    pub fn training_runs(&self) -> usize {
        self.trainings.load(Ordering::SeqCst)
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = lock(&self.key_locks);
        locks.entry(*key).or_default().clone()
    }

    fn validate(&self, series: &[f64]) -> Result<(), ForecastError> {
        let required = self.look_back();
        if series.len() < required {
            return Err(ForecastError::InsufficientData {
                required,
                actual: series.len(),
            });
        }
        if let Some(idx) = series.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::NonFiniteInput(idx));
        }
        Ok(())
    }

    /// Return the model for `key` trained on exactly `series`.
    ///
    /// A cache hit skips training entirely. On a miss a new model is trained
    /// and persisted; if persisting fails the fresh model is still returned.
    pub fn get_or_train(
        &self,
        series: &[f64],
        key: CacheKey,
    ) -> Result<(TrainedForecaster, CacheStatus), ForecastError> {
        self.validate(series)?;

        let key_lock = self.key_lock(&key);
        let _guard = lock(&key_lock);

        let epochs = self.epochs.for_granularity(key.granularity);
        let recipe = ModelRecipe {
            shape: self.trainer.config().shape(),
            epochs,
        };
        let fingerprint = Fingerprint::of(series);
        if let CacheLookup::Hit(forecaster) = self.store.lookup(&key, &fingerprint, &recipe) {
            tracing::info!(%key, data_points = series.len(), "Loaded cached model");
            return Ok((forecaster, CacheStatus::Loaded));
        }

        tracing::info!(%key, data_points = series.len(), epochs, "Training model");
        self.trainings.fetch_add(1, Ordering::SeqCst);
        let result = self.trainer.train(series, key.family, epochs)?;

        let stored = self.store.store(
            &key,
            &result.forecaster,
            &fingerprint,
            &recipe,
            series.len(),
        );
        if let Err(e) = stored {
            tracing::warn!(
                %key,
                error = %e,
                "Failed to persist trained model; serving it uncached"
            );
        }

        Ok((result.forecaster, CacheStatus::Retrained))
    }

    /// Forecast `granularity.horizon()` steps past the end of `series`.
    pub fn forecast(
        &self,
        series: &[f64],
        granularity: Granularity,
        metric: Metric,
        family: ModelFamily,
    ) -> Result<ForecastOutcome, ForecastError> {
        let key = CacheKey::new(granularity, metric, family);
        let (forecaster, cache_status) = self.get_or_train(series, key)?;
        let values = forecaster.forecast(series, granularity.horizon())?;

        Ok(ForecastOutcome {
            granularity,
            metric,
            family,
            horizon: granularity.horizon(),
            values,
            cache_status,
            training_points: series.len(),
        })
    }

    /// Next 24 hourly values from hourly history.
    pub fn forecast_daily(
        &self,
        series: &[f64],
        metric: Metric,
        family: ModelFamily,
    ) -> Result<ForecastOutcome, ForecastError> {
        self.forecast(series, Granularity::Daily, metric, family)
    }

    /// Next 7 daily values from daily history.
    pub fn forecast_weekly(
        &self,
        series: &[f64],
        metric: Metric,
        family: ModelFamily,
    ) -> Result<ForecastOutcome, ForecastError> {
        self.forecast(series, Granularity::Weekly, metric, family)
    }

    /// Next 30 daily values from daily history.
    pub fn forecast_monthly(
        &self,
        series: &[f64],
        metric: Metric,
        family: ModelFamily,
    ) -> Result<ForecastOutcome, ForecastError> {
        self.forecast(series, Granularity::Monthly, metric, family)
    }
}
