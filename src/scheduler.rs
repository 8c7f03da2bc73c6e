//! Hourly ingestion job
//!
//! Fires on every local hour boundary, synthesizes the reading for that hour
//! and stores it. A tick that wakes up later than the misfire grace is
//! skipped; a failing tick is logged and the next one runs as usual.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{EnergyConfig, SchedulerConfig, SiteConfig};
use crate::db::SensorReading;
use crate::generator::generate_hour;
use crate::periods::start_of_hour;
use crate::traits::{Clock, ReadingStore};

/// What happened on one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Inserted(SensorReading),
    /// A reading for this hour already existed
    Duplicate,
    /// Woke too long after the boundary
    Misfired { late_by_secs: i64 },
    Failed(String),
}

pub struct HourlyJob<S, C> {
    store: S,
    clock: C,
    site: SiteConfig,
    energy: EnergyConfig,
    misfire_grace: TimeDelta,
    rng: StdRng,
}

impl<S: ReadingStore, C: Clock> HourlyJob<S, C> {
    pub fn new(
        store: S,
        clock: C,
        site: SiteConfig,
        energy: EnergyConfig,
        scheduler: &SchedulerConfig,
        seed: u64,
    ) -> Self {
        Self {
            store,
            clock,
            site,
            energy,
            misfire_grace: TimeDelta::seconds(scheduler.misfire_grace_secs as i64),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Next local hour boundary strictly after now.
    pub fn next_boundary(&self) -> DateTime<Utc> {
        let now_local = self.clock.now_at(self.site.offset());
        (start_of_hour(now_local) + TimeDelta::hours(1)).with_timezone(&Utc)
    }

    /// Generate and store the reading for the current local hour.
    pub async fn run_once(&mut self) -> Result<Option<SensorReading>> {
        let now_local = self.clock.now_at(self.site.offset());
        let reading = generate_hour(now_local, &self.site, &self.energy, &mut self.rng);
        let inserted = self.store.insert_reading(&reading).await?;
        Ok(inserted.then_some(reading))
    }

    /// Run the tick scheduled for `boundary`. Never fails.
    pub async fn tick(&mut self, boundary: DateTime<Utc>) -> TickOutcome {
        let late_by = self.clock.now_utc() - boundary;
        if late_by > self.misfire_grace {
            tracing::warn!(
                boundary = %boundary,
                late_by_secs = late_by.num_seconds(),
                "Hourly tick missed its grace period, skipping"
            );
            return TickOutcome::Misfired {
                late_by_secs: late_by.num_seconds(),
            };
        }

        match self.run_once().await {
            Ok(Some(reading)) => {
                tracing::info!(
                    ts = %reading.ts,
                    temp = reading.temp,
                    energy_kwh = reading.energy_kwh,
                    "Stored hourly reading"
                );
                TickOutcome::Inserted(reading)
            }
            Ok(None) => {
                tracing::debug!(boundary = %boundary, "Reading for this hour already stored");
                TickOutcome::Duplicate
            }
            Err(e) => {
                tracing::error!("Hourly job failed: {:#}", e);
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    /// Tick on every hour boundary, forever.
    pub async fn run(mut self) {
        tracing::info!(
            offset_hours = self.site.utc_offset_hours,
            grace_secs = self.misfire_grace.num_seconds(),
            "Hourly job started"
        );

        loop {
            let boundary = self.next_boundary();
            let wait = (boundary - self.clock.now_utc())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tracing::debug!("Next reading in {} seconds", wait.as_secs());
            tokio::time::sleep(wait).await;

            self.tick(boundary).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::traits::{MemoryStore, MockClock};

    fn job(clock: MockClock, store: MemoryStore) -> HourlyJob<MemoryStore, MockClock> {
        HourlyJob::new(
            store,
            clock,
            SiteConfig::default(),
            EnergyConfig::default(),
            &SchedulerConfig::default(),
            42,
        )
    }

    #[test]
    fn test_next_boundary_is_next_hour() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 11, 27, 8, 20, 5).unwrap());
        let job = job(clock, MemoryStore::new());
        assert_eq!(job.next_boundary(), Utc.with_ymd_and_hms(2025, 11, 27, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_next_boundary_exactly_on_the_hour() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 11, 27, 8, 0, 0).unwrap());
        let job = job(clock, MemoryStore::new());
        assert_eq!(job.next_boundary(), Utc.with_ymd_and_hms(2025, 11, 27, 9, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_tick_on_time_inserts() {
        let boundary = Utc.with_ymd_and_hms(2025, 11, 27, 8, 0, 0).unwrap();
        let clock = MockClock::new(boundary + TimeDelta::seconds(2));
        let store = MemoryStore::new();
        let mut job = job(clock, store.clone());

        let outcome = job.tick(boundary).await;
        let TickOutcome::Inserted(reading) = outcome else {
            panic!("expected an insert, got {outcome:?}");
        };
        assert_eq!(reading.ts, boundary);
        assert_eq!(store.readings().len(), 1);
    }

    #[tokio::test]
    async fn test_second_tick_same_hour_is_duplicate() {
        let boundary = Utc.with_ymd_and_hms(2025, 11, 27, 8, 0, 0).unwrap();
        let clock = MockClock::new(boundary);
        let mut job = job(clock.clone(), MemoryStore::new());

        job.tick(boundary).await;
        clock.advance(TimeDelta::minutes(1));
        assert_eq!(job.tick(boundary).await, TickOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_late_tick_is_skipped() {
        let boundary = Utc.with_ymd_and_hms(2025, 11, 27, 8, 0, 0).unwrap();
        let clock = MockClock::new(boundary + TimeDelta::minutes(11));
        let store = MemoryStore::new();
        let mut job = job(clock, store.clone());

        assert_eq!(job.tick(boundary).await, TickOutcome::Misfired { late_by_secs: 660 });
        assert_eq!(store.attempts(), 0);
    }
}
