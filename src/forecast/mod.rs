//! Recurrent forecasting with a fingerprint-validated model cache
//!
//! Each (granularity, metric, family) triple owns one cached model. A request
//! fingerprints the incoming history; an exact match reuses the cached model
//! and anything else retrains and replaces the entry.

pub mod cache;
pub mod engine;
pub mod fingerprint;
pub mod model;
pub mod network;
pub mod rollout;
pub mod scaler;
pub mod training;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::periods::Bucket;

pub use cache::{
    CacheKey, CacheLookup, CacheMetadata, ModelCacheStore, ModelRecipe, PersistenceError,
};
pub use engine::{CacheStatus, EpochBudget, ForecastEngine, ForecastOutcome};
pub use fingerprint::Fingerprint;
pub use model::TrainedForecaster;
pub use network::{NetworkShape, RecurrentNetwork};
pub use scaler::MinMaxScaler;
pub use training::{Trainer, TrainingConfig, TrainingResult};

/// Number of trailing observations fed to the network for one prediction.
pub const LOOK_BACK: usize = 7;

/// Forecast granularity; also the first component of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Next 24 hours from hourly history
    Daily,
    /// Next 7 days from daily history
    Weekly,
    /// Next 30 days from daily history
    Monthly,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Number of steps rolled forward.
    pub fn horizon(&self) -> usize {
        match self {
            Self::Daily => 24,
            Self::Weekly => 7,
            Self::Monthly => 30,
        }
    }

    /// Bucket size of both the history and the forecast steps.
    pub fn bucket(&self) -> Bucket {
        match self {
            Self::Daily => Bucket::Hour,
            Self::Weekly | Self::Monthly => Bucket::Day,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(ForecastError::UnknownGranularity(other.to_string())),
        }
    }
}

/// Recurrent cell architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Gated long short-term memory cell
    Lstm,
    /// Plain tanh recurrent cell
    Rnn,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lstm => "lstm",
            Self::Rnn => "rnn",
        }
    }

    /// Upper-case name reported alongside results.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Lstm => "LSTM",
            Self::Rnn => "RNN",
        }
    }

    /// Gate blocks stacked in the recurrent kernel.
    pub(crate) fn gate_count(&self) -> usize {
        match self {
            Self::Lstm => 4,
            Self::Rnn => 1,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lstm" => Ok(Self::Lstm),
            "rnn" => Ok(Self::Rnn),
            other => Err(ForecastError::UnknownModelFamily(other.to_string())),
        }
    }
}

/// Errors surfaced by the forecasting pipeline.
///
/// Cache corruption is deliberately absent: it is recovered by retraining.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ForecastError {
    #[error("insufficient data: need at least {required} points, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("history of {requested} points is outside the accepted range {min}..={max}")]
    HistoryOutOfRange {
        requested: u32,
        min: u32,
        max: u32,
    },
    #[error("series contains a non-finite value at index {0}")]
    NonFiniteInput(usize),
    #[error("unknown model family '{0}', expected 'lstm' or 'rnn'")]
    UnknownModelFamily(String),
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("unknown granularity '{0}', expected 'daily', 'weekly' or 'monthly'")]
    UnknownGranularity(String),
    #[error("no data for metric '{metric}' in the requested window")]
    NoData { metric: String },
    #[error("series query failed: {0}")]
    QueryFailed(String),
    #[error("training failed: {0}")]
    Training(String),
    #[error("forecast task failed: {0}")]
    TaskFailed(String),
}

impl ForecastError {
    /// Whether the caller supplied bad input, as opposed to an infrastructure failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. }
                | Self::HistoryOutOfRange { .. }
                | Self::NonFiniteInput(_)
                | Self::UnknownModelFamily(_)
                | Self::UnknownMetric(_)
                | Self::UnknownGranularity(_)
        )
    }
}
