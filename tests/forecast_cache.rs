//! End-to-end tests for cached forecasting against a real cache directory.

use std::sync::Arc;

use building_monitor::config::ForecastConfig;
use building_monitor::db::Metric;
use building_monitor::forecast::{
    CacheKey, CacheStatus, Fingerprint, ForecastEngine, ForecastError, Granularity, ModelFamily,
};
use tempfile::tempdir;

/// Stock settings with a private cache directory.
fn default_config(dir: &std::path::Path) -> ForecastConfig {
    ForecastConfig {
        cache_dir: dir.to_path_buf(),
        ..ForecastConfig::default()
    }
}

/// Shorter weekly and monthly runs for tests that only check cache behaviour.
fn config(dir: &std::path::Path) -> ForecastConfig {
    ForecastConfig {
        weekly_epochs: 5,
        monthly_epochs: 5,
        ..default_config(dir)
    }
}

/// 72 hourly temperatures swinging between 20 and 33 degrees.
fn hourly_temperatures() -> Vec<f64> {
    (0..72)
        .map(|h| {
            let phase = 2.0 * std::f64::consts::PI * (h as f64 - 8.0) / 24.0;
            26.5 + 6.5 * phase.sin()
        })
        .collect()
}

fn daily_values(n: usize) -> Vec<f64> {
    (0..n).map(|d| 30.0 + (d % 7) as f64 * 1.5).collect()
}

// ==================== Scenario Tests ====================

#[test]
fn test_temperature_forecast_then_cached_reuse() {
    let series = hourly_temperatures();
    assert!(series.iter().all(|t| (20.0..=33.0).contains(t)));

    for family in [ModelFamily::Lstm, ModelFamily::Rnn] {
        let dir = tempdir().unwrap();
        let engine = ForecastEngine::new(&default_config(dir.path()));

        let first = engine
            .forecast_daily(&series, Metric::Temp, family)
            .unwrap();
        assert_eq!(first.cache_status, CacheStatus::Retrained);
        assert_eq!(first.values.len(), 24);
        for value in &first.values {
            assert!(value.is_finite());
            assert!(
                (15.0..=40.0).contains(value),
                "implausible {} forecast {value}",
                family.label()
            );
        }

        let second = engine
            .forecast_daily(&series, Metric::Temp, family)
            .unwrap();
        assert_eq!(second.cache_status, CacheStatus::Loaded);
        assert_eq!(engine.training_runs(), 1);
        let bits = |values: &[f64]| values.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first.values), bits(&second.values));
    }
}

#[test]
fn test_cache_survives_engine_restart() {
    let dir = tempdir().unwrap();
    let series = hourly_temperatures();

    let first = ForecastEngine::new(&config(dir.path()))
        .forecast_daily(&series, Metric::Humidity, ModelFamily::Rnn)
        .unwrap();

    let restarted = ForecastEngine::new(&config(dir.path()));
    let second = restarted
        .forecast_daily(&series, Metric::Humidity, ModelFamily::Rnn)
        .unwrap();

    assert_eq!(second.cache_status, CacheStatus::Loaded);
    assert_eq!(restarted.training_runs(), 0);
    assert_eq!(first.values, second.values);
}

#[test]
fn test_five_points_never_train() {
    let dir = tempdir().unwrap();
    let engine = ForecastEngine::new(&config(dir.path()));

    let five = [24.0, 25.0, 26.0, 25.5, 24.5];
    let err = engine
        .forecast_daily(&five, Metric::Temp, ModelFamily::Lstm)
        .unwrap_err();

    assert_eq!(
        err,
        ForecastError::InsufficientData {
            required: 7,
            actual: 5
        }
    );
    assert!(err.is_client_error());
    assert_eq!(engine.training_runs(), 0);
    assert!(engine.store().entries().unwrap().is_empty());
}

// ==================== Invalidation Tests ====================

#[test]
fn test_new_history_invalidates_cached_model() {
    let dir = tempdir().unwrap();
    let engine = ForecastEngine::new(&config(dir.path()));
    let a = daily_values(20);
    let mut b = a.clone();
    b[10] += 0.5;

    engine
        .forecast_weekly(&a, Metric::EnergyKwh, ModelFamily::Lstm)
        .unwrap();
    let outcome = engine
        .forecast_weekly(&b, Metric::EnergyKwh, ModelFamily::Lstm)
        .unwrap();

    assert_eq!(outcome.cache_status, CacheStatus::Retrained);
    assert_eq!(engine.training_runs(), 2);
    let key = CacheKey::new(Granularity::Weekly, Metric::EnergyKwh, ModelFamily::Lstm);
    let meta = engine.store().metadata(&key).unwrap();
    assert_eq!(meta.fingerprint, Fingerprint::of(&b));
    assert_ne!(meta.fingerprint, Fingerprint::of(&a));
}

#[test]
fn test_corrupted_artifact_is_retrained() {
    let dir = tempdir().unwrap();
    let engine = ForecastEngine::new(&config(dir.path()));
    let series = daily_values(20);

    engine
        .forecast_weekly(&series, Metric::Pm25, ModelFamily::Rnn)
        .unwrap();
    let key = CacheKey::new(Granularity::Weekly, Metric::Pm25, ModelFamily::Rnn);
    std::fs::write(engine.store().artifact_path(&key), b"not a model").unwrap();

    let outcome = engine
        .forecast_weekly(&series, Metric::Pm25, ModelFamily::Rnn)
        .unwrap();
    assert_eq!(outcome.cache_status, CacheStatus::Retrained);
    assert_eq!(engine.training_runs(), 2);
}

#[test]
fn test_keys_do_not_share_models() {
    let dir = tempdir().unwrap();
    let engine = ForecastEngine::new(&config(dir.path()));
    let series = daily_values(20);

    engine
        .forecast_weekly(&series, Metric::Temp, ModelFamily::Lstm)
        .unwrap();
    let rnn = engine
        .forecast_weekly(&series, Metric::Temp, ModelFamily::Rnn)
        .unwrap();
    let monthly = engine
        .forecast_monthly(&series, Metric::Temp, ModelFamily::Lstm)
        .unwrap();

    assert_eq!(rnn.cache_status, CacheStatus::Retrained);
    assert_eq!(monthly.cache_status, CacheStatus::Retrained);
    assert_eq!(engine.store().entries().unwrap().len(), 3);
}

#[test]
fn test_changed_epochs_invalidate_cached_model() {
    let dir = tempdir().unwrap();
    let series = daily_values(20);

    ForecastEngine::new(&config(dir.path()))
        .forecast_weekly(&series, Metric::WindSpeed, ModelFamily::Rnn)
        .unwrap();

    let longer = ForecastEngine::new(&ForecastConfig {
        weekly_epochs: 6,
        ..config(dir.path())
    });
    let outcome = longer
        .forecast_weekly(&series, Metric::WindSpeed, ModelFamily::Rnn)
        .unwrap();
    assert_eq!(outcome.cache_status, CacheStatus::Retrained);
    assert_eq!(longer.training_runs(), 1);
}

// ==================== Shape Tests ====================

#[test]
fn test_horizon_per_granularity() {
    let dir = tempdir().unwrap();
    let engine = ForecastEngine::new(&config(dir.path()));
    let series = daily_values(30);

    for (granularity, expected) in [
        (Granularity::Daily, 24),
        (Granularity::Weekly, 7),
        (Granularity::Monthly, 30),
    ] {
        let outcome = engine
            .forecast(&series, granularity, Metric::Co2, ModelFamily::Rnn)
            .unwrap();
        assert_eq!(outcome.values.len(), expected);
        assert_eq!(outcome.horizon, expected);
    }
}

// ==================== Concurrency Tests ====================

#[test]
fn test_concurrent_requests_train_once() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(ForecastEngine::new(&config(dir.path())));
    let series = daily_values(25);

    let outcomes: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let series = &series;
                scope.spawn(move || {
                    engine
                        .forecast_weekly(series, Metric::Ppd, ModelFamily::Lstm)
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(engine.training_runs(), 1);
    let retrained = outcomes
        .iter()
        .filter(|o| o.cache_status == CacheStatus::Retrained)
        .count();
    assert_eq!(retrained, 1);
    assert!(outcomes.windows(2).all(|w| w[0].values == w[1].values));
}
