//! Forecast requests end to end: window, history, engine, timestamps

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::db::{Metric, MetricFamily};
use crate::forecast::{CacheStatus, ForecastEngine, ForecastError, Granularity, ModelFamily};
use crate::periods::{forecast_timestamps, history_window};
use crate::traits::SeriesSource;

/// Accepted history length per granularity, in buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRange {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

pub fn history_range(granularity: Granularity) -> HistoryRange {
    match granularity {
        Granularity::Daily => HistoryRange {
            min: 24,
            max: 240,
            default: 72,
        },
        Granularity::Weekly => HistoryRange {
            min: 14,
            max: 90,
            default: 90,
        },
        Granularity::Monthly => HistoryRange {
            min: 30,
            max: 365,
            default: 90,
        },
    }
}

#[derive(Debug, Clone)]
pub struct ForecastRequest {
    pub metric: Metric,
    pub granularity: Granularity,
    pub family: ModelFamily,
    /// History length in buckets; the granularity's default if `None`
    pub history: Option<u32>,
    pub reference: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastReport {
    pub metric: Metric,
    pub metric_family: MetricFamily,
    pub granularity: Granularity,
    pub family: ModelFamily,
    /// Display name of the network family, `LSTM` or `RNN`
    pub model_used: &'static str,
    pub reference: DateTime<FixedOffset>,
    pub history_start: DateTime<FixedOffset>,
    pub history_end: DateTime<FixedOffset>,
    pub training_points: usize,
    pub cache_status: CacheStatus,
    pub points: Vec<ForecastPoint>,
}

/// Serves forecast requests from a series source through a shared engine.
pub struct ForecastService<S> {
    source: S,
    engine: Arc<ForecastEngine>,
}

impl<S: SeriesSource> ForecastService<S> {
    pub fn new(source: S, engine: Arc<ForecastEngine>) -> Self {
        Self { source, engine }
    }

    pub fn engine(&self) -> &Arc<ForecastEngine> {
        &self.engine
    }

    pub async fn forecast(
        &self,
        request: &ForecastRequest,
    ) -> Result<ForecastReport, ForecastError> {
        let range = history_range(request.granularity);
        let size = request.history.unwrap_or(range.default);
        if !(range.min..=range.max).contains(&size) {
            return Err(ForecastError::HistoryOutOfRange {
                requested: size,
                min: range.min,
                max: range.max,
            });
        }

        let bucket = request.granularity.bucket();
        let window = history_window(bucket, size, request.reference);
        let series = self
            .source
            .metric_series(request.metric, &window, bucket)
            .await?;

        let required = self.engine.look_back();
        if series.len() < required {
            tracing::info!(
                metric = request.metric.as_str(),
                points = series.len(),
                required,
                "Not enough history to forecast"
            );
            return Err(ForecastError::InsufficientData {
                required,
                actual: series.len(),
            });
        }

        let engine = Arc::clone(&self.engine);
        let (granularity, metric, family) = (request.granularity, request.metric, request.family);
        let outcome = tokio::task::spawn_blocking(move || {
            engine.forecast(&series, granularity, metric, family)
        })
        .await
        .map_err(|e| ForecastError::TaskFailed(e.to_string()))??;

        let timestamps = forecast_timestamps(bucket, request.reference, outcome.values.len());
        let points = timestamps
            .into_iter()
            .zip(outcome.values.iter().copied())
            .map(|(timestamp, value)| ForecastPoint { timestamp, value })
            .collect();

        tracing::info!(
            metric = metric.as_str(),
            granularity = granularity.as_str(),
            family = family.as_str(),
            cache = %outcome.cache_status,
            points = outcome.training_points,
            "Forecast served"
        );

        Ok(ForecastReport {
            metric,
            metric_family: metric.family(),
            granularity,
            family,
            model_used: family.label(),
            reference: request.reference,
            history_start: window.start,
            history_end: window.end,
            training_points: outcome.training_points,
            cache_status: outcome.cache_status,
            points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_ranges() {
        assert_eq!(history_range(Granularity::Daily).default, 72);
        assert_eq!(history_range(Granularity::Weekly).max, 90);
        assert_eq!(history_range(Granularity::Monthly).min, 30);
    }

    #[test]
    fn test_defaults_within_range() {
        for granularity in Granularity::ALL {
            let range = history_range(granularity);
            assert!((range.min..=range.max).contains(&range.default));
        }
    }
}
