//! Abstractions for time and side effects to enable testing.
//!
//! This module provides traits for:
//! - `Clock`: Abstracting time access for deterministic testing
//! - `ReadingStore`: Where the hourly job writes readings
//! - `SeriesSource`: Where forecasts read their history

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use chrono::{DateTime, FixedOffset, Utc};

use crate::db::{Metric, SensorReading};
use crate::forecast::ForecastError;
use crate::periods::{Bucket, TimeWindow};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ==================== Clock Trait ====================

/// Trait for abstracting time access.
///
/// This allows injecting mock clocks during testing to create
/// deterministic, reproducible tests for time-dependent logic.
pub trait Clock: Send + Sync {
    /// Get the current time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Get the current time at the building's offset.
    fn now_at(&self, offset: FixedOffset) -> DateTime<FixedOffset> {
        self.now_utc().with_timezone(&offset)
    }
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for testing with controllable time.
#[derive(Debug, Clone)]
pub struct MockClock {
    utc_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock set to the given UTC time.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            utc_time: Arc::new(Mutex::new(time)),
        }
    }

    /// Set the mock clock to a new time.
    pub fn set_time(&self, time: DateTime<Utc>) {
        *lock(&self.utc_time) = time;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut time = lock(&self.utc_time);
        *time += duration;
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *lock(&self.utc_time)
    }
}

// ==================== ReadingStore Trait ====================

/// Sink for generated readings.
pub trait ReadingStore: Send + Sync {
    /// Persist a reading; `Ok(false)` if one already exists for its hour.
    fn insert_reading(&self, reading: &SensorReading) -> impl Future<Output = Result<bool>> + Send;
}

/// In-memory store that can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    readings: Arc<Mutex<Vec<SensorReading>>>,
    failing: Arc<Mutex<bool>>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following insert fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn readings(&self) -> Vec<SensorReading> {
        lock(&self.readings).clone()
    }

    /// Inserts attempted, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ReadingStore for MemoryStore {
    async fn insert_reading(&self, reading: &SensorReading) -> Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.failing) {
            bail!("store unavailable");
        }

        let mut readings = lock(&self.readings);
        if readings.iter().any(|r| r.ts == reading.ts) {
            return Ok(false);
        }
        readings.push(reading.clone());
        Ok(true)
    }
}

// ==================== SeriesSource Trait ====================

/// Provider of bucketed metric history.
pub trait SeriesSource: Send + Sync {
    /// Average of `metric` per `bucket` inside `window`, oldest first.
    ///
    /// Empty windows are `NoData`; connectivity problems are `QueryFailed`.
    fn metric_series(
        &self,
        metric: Metric,
        window: &TimeWindow,
        bucket: Bucket,
    ) -> impl Future<Output = Result<Vec<f64>, ForecastError>> + Send;
}

/// Canned series per metric; records the windows it was asked for.
#[derive(Debug, Clone, Default)]
pub struct StaticSeries {
    series: HashMap<Metric, Vec<f64>>,
    requests: Arc<Mutex<Vec<(Metric, TimeWindow, Bucket)>>>,
}

impl StaticSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, metric: Metric, values: Vec<f64>) -> Self {
        self.series.insert(metric, values);
        self
    }

    pub fn requests(&self) -> Vec<(Metric, TimeWindow, Bucket)> {
        lock(&self.requests).clone()
    }
}

impl SeriesSource for StaticSeries {
    async fn metric_series(
        &self,
        metric: Metric,
        window: &TimeWindow,
        bucket: Bucket,
    ) -> Result<Vec<f64>, ForecastError> {
        lock(&self.requests).push((metric, *window, bucket));

        match self.series.get(&metric) {
            Some(values) if !values.is_empty() => Ok(values.clone()),
            _ => Err(ForecastError::NoData {
                metric: metric.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Timelike};

    use super::*;

    // ==================== Clock Tests ====================

    #[test]
    fn test_mock_clock_advance() {
        let start = Utc.with_ymd_and_hms(2025, 11, 27, 8, 0, 0).unwrap();
        let clock = MockClock::new(start);
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now_utc(), start + Duration::minutes(90));
    }

    #[test]
    fn test_mock_clock_set_time() {
        let clock = MockClock::new(Utc::now());
        let target = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        clock.set_time(target);
        assert_eq!(clock.now_utc(), target);
    }

    #[test]
    fn test_now_at_applies_offset() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 11, 27, 20, 0, 0).unwrap());
        let local = clock.now_at(FixedOffset::east_opt(7 * 3600).unwrap());
        assert_eq!(local.hour(), 3);
    }

    #[test]
    fn test_system_clock_is_close_to_now() {
        let diff = (SystemClock.now_utc() - Utc::now()).num_seconds().abs();
        assert!(diff < 5);
    }
}
