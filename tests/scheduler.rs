//! Hourly job behaviour across several ticks.

use building_monitor::config::{EnergyConfig, SchedulerConfig, SiteConfig};
use building_monitor::scheduler::{HourlyJob, TickOutcome};
use building_monitor::traits::{MemoryStore, MockClock};
use chrono::{Duration, TimeZone, Utc};

fn job(clock: &MockClock, store: &MemoryStore) -> HourlyJob<MemoryStore, MockClock> {
    HourlyJob::new(
        store.clone(),
        clock.clone(),
        SiteConfig::default(),
        EnergyConfig::default(),
        &SchedulerConfig::default(),
        7,
    )
}

#[tokio::test]
async fn test_failed_tick_does_not_stop_later_ticks() {
    let start = Utc.with_ymd_and_hms(2025, 11, 27, 1, 0, 0).unwrap();
    let clock = MockClock::new(start);
    let store = MemoryStore::new();
    let mut job = job(&clock, &store);

    store.set_failing(true);
    let outcome = job.tick(start).await;
    assert!(matches!(outcome, TickOutcome::Failed(_)));

    store.set_failing(false);
    let next = job.next_boundary();
    assert_eq!(next, start + Duration::hours(1));
    clock.set_time(next);
    let outcome = job.tick(next).await;
    assert!(matches!(outcome, TickOutcome::Inserted(_)));

    assert_eq!(store.attempts(), 2);
    assert_eq!(store.readings().len(), 1);
    assert_eq!(store.readings()[0].ts, next);
}

#[tokio::test]
async fn test_one_reading_per_hour() {
    let start = Utc.with_ymd_and_hms(2025, 11, 27, 0, 0, 0).unwrap();
    let clock = MockClock::new(start);
    let store = MemoryStore::new();
    let mut job = job(&clock, &store);

    for hour in 0..6 {
        let boundary = start + Duration::hours(hour);
        clock.set_time(boundary + Duration::seconds(1));
        assert!(matches!(job.tick(boundary).await, TickOutcome::Inserted(_)));
    }

    let readings = store.readings();
    assert_eq!(readings.len(), 6);
    assert!(readings.windows(2).all(|w| w[1].ts - w[0].ts == Duration::hours(1)));
    // Local hours 07..=12 on a Thursday
    assert!(readings.iter().all(|r| r.dayofweek == "thursday"));
}

#[tokio::test]
async fn test_tick_within_grace_runs() {
    let boundary = Utc.with_ymd_and_hms(2025, 11, 27, 3, 0, 0).unwrap();
    let clock = MockClock::new(boundary + Duration::minutes(9));
    let store = MemoryStore::new();
    let mut job = job(&clock, &store);

    assert!(matches!(job.tick(boundary).await, TickOutcome::Inserted(_)));
}
