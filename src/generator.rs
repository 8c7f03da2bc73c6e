//! Synthetic hourly sensor readings with a tropical diurnal profile

use std::f64::consts::TAU;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc, Weekday};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::comfort::{PmvLabel, pmv_to_ppd, temp_to_pmv};
use crate::config::{EnergyConfig, SiteConfig};
use crate::db::SensorReading;
use crate::periods::start_of_hour;
use crate::traits::ReadingStore;

fn gaussian<R: Rng + ?Sized>(rng: &mut R, std_dev: f64) -> f64 {
    Normal::new(0.0, std_dev)
        .map(|n| n.sample(rng))
        .unwrap_or(0.0)
}

/// Sine with a 24-hour period, shifted so it crosses zero upward at `phase`.
fn diurnal(hour: u32, phase: f64) -> f64 {
    (TAU * (hour as f64 - phase) / 24.0).sin()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Monday to Friday, inside the configured working hours.
pub fn is_working(ts_local: DateTime<FixedOffset>, energy: &EnergyConfig) -> bool {
    let weekday = !matches!(ts_local.weekday(), Weekday::Sat | Weekday::Sun);
    let hour = ts_local.hour();
    weekday && (energy.work_start_hour..=energy.work_end_hour).contains(&hour)
}

/// Occupancy factor: fully occupied during working hours, 35 % otherwise.
pub fn occupancy(ts_local: DateTime<FixedOffset>, energy: &EnergyConfig) -> f64 {
    if is_working(ts_local, energy) { 1.0 } else { 0.35 }
}

/// Hourly consumption from base load, cooling above the setpoint and a
/// dehumidification penalty above 60 % RH. Never below 0.05 kWh.
pub fn energy_kwh(
    temp: f64,
    humidity: f64,
    ts_local: DateTime<FixedOffset>,
    energy: &EnergyConfig,
    noise: f64,
) -> f64 {
    let working = is_working(ts_local, energy);
    let occ = occupancy(ts_local, energy);
    let base_load = if working {
        energy.base_load_day
    } else {
        energy.base_load_night
    };
    let cooling = (temp - energy.setpoint_c).max(0.0) * energy.ac_coeff * occ;
    let humid_penalty = (humidity - 60.0).max(0.0) * 0.003 * occ;
    (base_load + cooling + humid_penalty + noise).max(0.05)
}

/// Lower-case English weekday name.
pub fn day_name(ts_local: DateTime<FixedOffset>) -> String {
    ts_local.format("%A").to_string().to_lowercase()
}

/// Synthesize the reading for the local hour containing `ts_local`.
pub fn generate_hour<R: Rng + ?Sized>(
    ts_local: DateTime<FixedOffset>,
    site: &SiteConfig,
    energy: &EnergyConfig,
    rng: &mut R,
) -> SensorReading {
    let ts_local = start_of_hour(ts_local);
    let hour = ts_local.hour();

    let temp = (25.5 + 2.8 * diurnal(hour, 14.0) + gaussian(rng, 0.7)).clamp(20.0, 33.0);

    let humidity = (65.0 - 0.25 * (temp - 25.5) + 4.0 * diurnal(hour, -2.0) + gaussian(rng, 3.0))
        .clamp(40.0, 90.0);

    let wind_speed = (2.2 + 1.2 * diurnal(hour, 16.0) + gaussian(rng, 0.8).abs()).clamp(0.0, 12.0);

    let pm25 = (12.0 + 1.2 * diurnal(hour, 7.0) + gaussian(rng, 2.0).abs()).clamp(5.0, 120.0);

    let occ = occupancy(ts_local, energy);
    let co2_ppm = (450.0 + occ * (250.0 + gaussian(rng, 40.0))).clamp(400.0, 2000.0);

    let kwh = energy_kwh(temp, humidity, ts_local, energy, gaussian(rng, 0.05));
    let cost = round_to(kwh * site.tariff_per_kwh, 2);
    let eui = if site.floor_area_m2 > 0.0 {
        kwh / site.floor_area_m2
    } else {
        0.0
    };

    let pmv = temp_to_pmv(temp);
    let ppd = pmv_to_ppd(pmv as f64);

    SensorReading {
        ts: ts_local.with_timezone(&Utc),
        temp: round_to(temp, 3),
        humidity: round_to(humidity, 1),
        wind_speed: round_to(wind_speed, 3),
        pm25: round_to(pm25, 1),
        co2_ppm: round_to(co2_ppm, 1),
        energy_kwh: round_to(kwh, 3),
        cost,
        eui_kwh_m2: round_to(eui, 6),
        pmv: pmv as f64,
        ppd: round_to(ppd, 2),
        pmv_label: PmvLabel::from_index(pmv as f64).to_string(),
        dayofweek: day_name(ts_local),
    }
}

/// Contiguous local hour starts covering `days` days and ending with the
/// hour containing `now_local`, oldest first.
pub fn backfill_hours(now_local: DateTime<FixedOffset>, days: u32) -> Vec<DateTime<FixedOffset>> {
    let last = start_of_hour(now_local);
    let hours = days as i64 * 24;
    (0..hours)
        .rev()
        .map(|back| last - Duration::hours(back))
        .collect()
}

/// Outcome of a backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillStats {
    pub inserted: usize,
    /// Hours that already had a reading
    pub skipped: usize,
}

/// Generate and store readings for the last `days` days. Existing hours are
/// left untouched.
pub async fn backfill<S: ReadingStore, R: Rng + Send>(
    store: &S,
    now_local: DateTime<FixedOffset>,
    days: u32,
    site: &SiteConfig,
    energy: &EnergyConfig,
    rng: &mut R,
) -> Result<BackfillStats> {
    let mut stats = BackfillStats::default();
    for ts in backfill_hours(now_local, days) {
        let reading = generate_hour(ts, site, energy, rng);
        if store.insert_reading(&reading).await? {
            stats.inserted += 1;
        } else {
            stats.skipped += 1;
        }
    }

    tracing::info!(
        days,
        inserted = stats.inserted,
        skipped = stats.skipped,
        "Backfill complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::traits::MemoryStore;

    fn wib() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        wib().with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    // ==================== Working Hours Tests ====================

    #[test]
    fn test_is_working_weekday_hours() {
        let energy = EnergyConfig::default();
        // 2025-11-27 is a Thursday
        assert!(is_working(local(2025, 11, 27, 8), &energy));
        assert!(is_working(local(2025, 11, 27, 18), &energy));
        assert!(!is_working(local(2025, 11, 27, 7), &energy));
        assert!(!is_working(local(2025, 11, 27, 19), &energy));
    }

    #[test]
    fn test_is_working_weekend() {
        let energy = EnergyConfig::default();
        assert!(!is_working(local(2025, 11, 29, 10), &energy));
        assert!(!is_working(local(2025, 11, 30, 10), &energy));
    }

    // ==================== Energy Model Tests ====================

    #[test]
    fn test_energy_floor() {
        let energy = EnergyConfig::default();
        assert_eq!(energy_kwh(20.0, 50.0, local(2025, 11, 27, 2), &energy, -5.0), 0.05);
    }

    #[test]
    fn test_energy_cooling_load_during_work() {
        let energy = EnergyConfig::default();
        let ts = local(2025, 11, 27, 14);
        let kwh = energy_kwh(28.5, 60.0, ts, &energy, 0.0);
        let expected = 0.35 + 4.0 * 0.28;
        assert!((kwh - expected).abs() < 1e-12);
    }

    #[test]
    fn test_energy_night_uses_reduced_occupancy() {
        let energy = EnergyConfig::default();
        let ts = local(2025, 11, 27, 23);
        let kwh = energy_kwh(28.5, 70.0, ts, &energy, 0.0);
        let expected = 0.25 + 4.0 * 0.28 * 0.35 + 10.0 * 0.003 * 0.35;
        assert!((kwh - expected).abs() < 1e-12);
    }

    // ==================== Generator Tests ====================

    #[test]
    fn test_generated_values_within_physical_bounds() {
        let mut rng = StdRng::seed_from_u64(123);
        let site = SiteConfig::default();
        let energy = EnergyConfig::default();
        for ts in backfill_hours(local(2025, 11, 27, 23), 14) {
            let r = generate_hour(ts, &site, &energy, &mut rng);
            assert!((20.0..=33.0).contains(&r.temp));
            assert!((40.0..=90.0).contains(&r.humidity));
            assert!((0.0..=12.0).contains(&r.wind_speed));
            assert!((5.0..=120.0).contains(&r.pm25));
            assert!((400.0..=2000.0).contains(&r.co2_ppm));
            assert!(r.energy_kwh >= 0.05);
            assert!((0.0..=100.0).contains(&r.ppd));
            assert!((-3.0..=3.0).contains(&r.pmv));
        }
    }

    #[test]
    fn test_generated_reading_is_consistent() {
        let mut rng = StdRng::seed_from_u64(7);
        let site = SiteConfig::default();
        let energy = EnergyConfig::default();
        let r = generate_hour(local(2025, 11, 27, 14), &site, &energy, &mut rng);

        assert_eq!(r.pmv, temp_to_pmv(r.temp) as f64);
        assert_eq!(r.pmv_label, PmvLabel::from_index(r.pmv).to_string());
        assert!((r.cost - r.energy_kwh * site.tariff_per_kwh).abs() < 1.0);
        assert_eq!(r.dayofweek, "thursday");
    }

    #[test]
    fn test_generated_timestamp_is_hour_start_in_utc() {
        let mut rng = StdRng::seed_from_u64(1);
        let ts = wib().with_ymd_and_hms(2025, 11, 27, 14, 37, 12).unwrap();
        let (site, energy) = (SiteConfig::default(), EnergyConfig::default());
        let r = generate_hour(ts, &site, &energy, &mut rng);
        assert_eq!(r.ts, Utc.with_ymd_and_hms(2025, 11, 27, 7, 0, 0).unwrap());
    }

    #[test]
    fn test_afternoon_warmer_than_dawn_on_average() {
        let mut rng = StdRng::seed_from_u64(99);
        let site = SiteConfig::default();
        let energy = EnergyConfig::default();
        let mean = |hour: u32, rng: &mut StdRng| {
            (0..200)
                .map(|_| generate_hour(local(2025, 11, 27, hour), &site, &energy, rng).temp)
                .sum::<f64>()
                / 200.0
        };
        assert!(mean(20, &mut rng) > mean(8, &mut rng));
    }

    // ==================== Backfill Tests ====================

    #[test]
    fn test_backfill_hours_contiguous() {
        let hours = backfill_hours(local(2025, 11, 27, 15), 2);
        assert_eq!(hours.len(), 48);
        assert_eq!(*hours.last().unwrap(), local(2025, 11, 27, 15));
        assert_eq!(hours[0], local(2025, 11, 25, 16));
        assert!(hours.windows(2).all(|w| w[1] - w[0] == Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_backfill_skips_existing_hours() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(5);
        let site = SiteConfig::default();
        let energy = EnergyConfig::default();
        let now = local(2025, 11, 27, 15);

        let first = backfill(&store, now, 1, &site, &energy, &mut rng)
            .await
            .unwrap();
        assert_eq!(
            first,
            BackfillStats {
                inserted: 24,
                skipped: 0
            }
        );

        let second = backfill(&store, now, 2, &site, &energy, &mut rng)
            .await
            .unwrap();
        assert_eq!(
            second,
            BackfillStats {
                inserted: 24,
                skipped: 24
            }
        );
        assert_eq!(store.readings().len(), 48);
    }
}
