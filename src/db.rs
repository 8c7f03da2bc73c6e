use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::forecast::ForecastError;
use crate::periods::{Bucket, TimeWindow};
use crate::traits::{Clock, ReadingStore, SeriesSource};

/// One synthesized hourly observation.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SensorReading {
    /// Start of the local hour, stored in UTC
    pub ts: DateTime<Utc>,
    pub temp: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub pm25: f64,
    pub co2_ppm: f64,
    pub energy_kwh: f64,
    pub cost: f64,
    pub eui_kwh_m2: f64,
    pub pmv: f64,
    pub ppd: f64,
    pub pmv_label: String,
    pub dayofweek: String,
}

/// Group a forecastable metric belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricFamily {
    Environment,
    Comfort,
    Energy,
}

/// Whitelisted forecastable columns of `sensor_hourly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temp,
    Humidity,
    WindSpeed,
    Pm25,
    Co2,
    /// Predicted mean vote, accepted as `ppv` or `pmv`
    Ppv,
    Ppd,
    EnergyKwh,
}

macro_rules! metric_series_sql {
    ($column:literal) => {
        concat!(
            "SELECT date_trunc($1, (ts AT TIME ZONE 'UTC') + make_interval(secs => $2)) ",
            "AS bucket_start, ",
            "AVG(",
            $column,
            ")::DOUBLE PRECISION AS value ",
            "FROM sensor_hourly WHERE ts >= $3 AND ts < $4 ",
            "GROUP BY 1 ORDER BY 1 ASC"
        )
    };
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Temp,
        Metric::Humidity,
        Metric::WindSpeed,
        Metric::Pm25,
        Metric::Co2,
        Metric::Ppv,
        Metric::Ppd,
        Metric::EnergyKwh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temp => "temp",
            Metric::Humidity => "humidity",
            Metric::WindSpeed => "wind_speed",
            Metric::Pm25 => "pm25",
            Metric::Co2 => "co2",
            Metric::Ppv => "ppv",
            Metric::Ppd => "ppd",
            Metric::EnergyKwh => "energy_kwh",
        }
    }

    /// Backing column in `sensor_hourly`.
    pub fn column(&self) -> &'static str {
        match self {
            Metric::Temp => "temp",
            Metric::Humidity => "humidity",
            Metric::WindSpeed => "wind_speed",
            Metric::Pm25 => "pm25",
            Metric::Co2 => "co2_ppm",
            Metric::Ppv => "pmv",
            Metric::Ppd => "ppd",
            Metric::EnergyKwh => "energy_kwh",
        }
    }

    pub fn family(&self) -> MetricFamily {
        match self {
            Metric::Temp | Metric::Humidity | Metric::WindSpeed | Metric::Pm25 | Metric::Co2 => {
                MetricFamily::Environment
            }
            Metric::Ppv | Metric::Ppd => MetricFamily::Comfort,
            Metric::EnergyKwh => MetricFamily::Energy,
        }
    }

    /// Bucketed average of this metric. Column names never come from input.
    fn series_sql(&self) -> &'static str {
        match self {
            Metric::Temp => metric_series_sql!("temp"),
            Metric::Humidity => metric_series_sql!("humidity"),
            Metric::WindSpeed => metric_series_sql!("wind_speed"),
            Metric::Pm25 => metric_series_sql!("pm25"),
            Metric::Co2 => metric_series_sql!("co2_ppm"),
            Metric::Ppv => metric_series_sql!("pmv"),
            Metric::Ppd => metric_series_sql!("ppd"),
            Metric::EnergyKwh => metric_series_sql!("energy_kwh"),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temp" | "temperature" => Ok(Metric::Temp),
            "humidity" => Ok(Metric::Humidity),
            "wind_speed" => Ok(Metric::WindSpeed),
            "pm25" => Ok(Metric::Pm25),
            "co2" | "co2_ppm" => Ok(Metric::Co2),
            "ppv" | "pmv" => Ok(Metric::Ppv),
            "ppd" => Ok(Metric::Ppd),
            "energy_kwh" | "energy" => Ok(Metric::EnergyKwh),
            other => Err(ForecastError::UnknownMetric(other.to_string())),
        }
    }
}

/// Totals and averages over a report window.
#[derive(Debug, Clone, FromRow)]
pub struct SummaryTotals {
    pub total_kwh: f64,
    pub total_cost: f64,
    pub avg_pmv: Option<f64>,
    pub avg_ppd: Option<f64>,
    pub sample_count: i64,
}

/// Average energy use per local hour of day.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HourlyEnergy {
    pub hour: i32,
    pub avg_energy_kwh: f64,
    pub sample_count: i64,
}

/// One bucket of a chart series. `bucket_start` is local wall-clock time.
#[derive(Debug, Clone, FromRow)]
pub struct SeriesRow {
    pub bucket_start: NaiveDateTime,
    pub avg_temp: f64,
    pub avg_humidity: f64,
    pub avg_wind_speed: f64,
    pub avg_pm25: f64,
    pub avg_co2: f64,
    pub total_energy_kwh: f64,
    pub total_cost: f64,
    pub avg_pmv: f64,
    pub avg_ppd: f64,
    pub sample_count: i64,
}

#[derive(Clone, Debug)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    /// Insert a reading unless one already exists for its hour.
    ///
    /// Returns `true` if a row was written.
    pub async fn insert_reading(&self, reading: &SensorReading) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sensor_hourly
                (ts, temp, humidity, wind_speed, pm25, co2_ppm, energy_kwh,
                 cost, eui_kwh_m2, pmv, ppd, pmv_label, dayofweek)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (ts) DO NOTHING
            "#,
        )
        .bind(reading.ts)
        .bind(reading.temp)
        .bind(reading.humidity)
        .bind(reading.wind_speed)
        .bind(reading.pm25)
        .bind(reading.co2_ppm)
        .bind(reading.energy_kwh)
        .bind(reading.cost)
        .bind(reading.eui_kwh_m2)
        .bind(reading.pmv)
        .bind(reading.ppd)
        .bind(&reading.pmv_label)
        .bind(&reading.dayofweek)
        .execute(&self.pool)
        .await
        .context("Failed to insert sensor reading")?;

        Ok(result.rows_affected() == 1)
    }

    /// Most recent readings, newest first.
    pub async fn latest(&self, limit: i64) -> Result<Vec<SensorReading>> {
        let rows = sqlx::query_as::<_, SensorReading>(
            r#"
            SELECT ts, temp, humidity, wind_speed, pm25, co2_ppm, energy_kwh,
                   cost, eui_kwh_m2, pmv, ppd, pmv_label, dayofweek
            FROM sensor_hourly
            ORDER BY ts DESC
            LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch latest readings")?;

        Ok(rows)
    }

    /// Every reading inside `window`, oldest first.
    pub async fn readings_in(&self, window: &TimeWindow) -> Result<Vec<SensorReading>> {
        let rows = sqlx::query_as::<_, SensorReading>(
            r#"
            SELECT ts, temp, humidity, wind_speed, pm25, co2_ppm, energy_kwh,
                   cost, eui_kwh_m2, pmv, ppd, pmv_label, dayofweek
            FROM sensor_hourly
            WHERE ts >= $1 AND ts < $2
            ORDER BY ts ASC
            "#,
        )
        .bind(window.start_utc())
        .bind(window.end_utc())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch readings for window")?;

        Ok(rows)
    }

    pub async fn summary(&self, window: &TimeWindow) -> Result<SummaryTotals> {
        let totals = sqlx::query_as::<_, SummaryTotals>(
            r#"
            SELECT
                COALESCE(SUM(energy_kwh), 0)::DOUBLE PRECISION AS total_kwh,
                COALESCE(SUM(cost), 0)::DOUBLE PRECISION AS total_cost,
                AVG(pmv)::DOUBLE PRECISION AS avg_pmv,
                AVG(ppd)::DOUBLE PRECISION AS avg_ppd,
                COUNT(*) AS sample_count
            FROM sensor_hourly
            WHERE ts >= $1 AND ts < $2
            "#,
        )
        .bind(window.start_utc())
        .bind(window.end_utc())
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch summary totals")?;

        Ok(totals)
    }

    /// Average energy per local hour of day over `window`.
    pub async fn hourly_profile(&self, window: &TimeWindow) -> Result<Vec<HourlyEnergy>> {
        let rows = sqlx::query_as::<_, HourlyEnergy>(
            r#"
            SELECT
                EXTRACT(HOUR FROM (ts AT TIME ZONE 'UTC') + make_interval(secs => $3))::INTEGER
                    AS hour,
                AVG(energy_kwh)::DOUBLE PRECISION AS avg_energy_kwh,
                COUNT(*) AS sample_count
            FROM sensor_hourly
            WHERE ts >= $1 AND ts < $2
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(window.start_utc())
        .bind(window.end_utc())
        .bind(offset_secs(window))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch hourly energy profile")?;

        Ok(rows)
    }

    /// Aggregated chart series, one row per non-empty local bucket.
    pub async fn series(&self, bucket: Bucket, window: &TimeWindow) -> Result<Vec<SeriesRow>> {
        let rows = sqlx::query_as::<_, SeriesRow>(
            r#"
            SELECT
                date_trunc($1, (ts AT TIME ZONE 'UTC') + make_interval(secs => $2)) AS bucket_start,
                AVG(temp)::DOUBLE PRECISION AS avg_temp,
                AVG(humidity)::DOUBLE PRECISION AS avg_humidity,
                AVG(wind_speed)::DOUBLE PRECISION AS avg_wind_speed,
                AVG(pm25)::DOUBLE PRECISION AS avg_pm25,
                AVG(co2_ppm)::DOUBLE PRECISION AS avg_co2,
                SUM(energy_kwh)::DOUBLE PRECISION AS total_energy_kwh,
                SUM(cost)::DOUBLE PRECISION AS total_cost,
                AVG(pmv)::DOUBLE PRECISION AS avg_pmv,
                AVG(ppd)::DOUBLE PRECISION AS avg_ppd,
                COUNT(*) AS sample_count
            FROM sensor_hourly
            WHERE ts >= $3 AND ts < $4
            GROUP BY 1
            ORDER BY 1 ASC
            "#,
        )
        .bind(bucket.as_sql())
        .bind(offset_secs(window))
        .bind(window.start_utc())
        .bind(window.end_utc())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch aggregated series")?;

        Ok(rows)
    }

    /// Export every reading in `window` to a timestamped CSV file.
    ///
    /// Returns the path to the created file.
    pub async fn export_to_csv<C: Clock>(
        &self,
        window: &TimeWindow,
        output_dir: &Path,
        clock: &C,
    ) -> Result<PathBuf> {
        let readings = self
            .readings_in(window)
            .await
            .context("Failed to fetch readings for export")?;

        let filename = format!(
            "sensor_hourly_export_{}.csv",
            clock.now_utc().format("%Y%m%d_%H%M%S")
        );
        let output_path = output_dir.join(&filename);
        let path = output_path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut wtr = csv::Writer::from_path(&path).context("Failed to create CSV writer")?;
            for reading in readings {
                wtr.serialize(reading)
                    .context("Failed to serialize reading")?;
            }
            wtr.flush().context("Failed to flush CSV writer")?;
            Ok(())
        })
        .await
        .context("CSV export task failed")??;

        Ok(output_path)
    }
}

fn offset_secs(window: &TimeWindow) -> f64 {
    window.offset().local_minus_utc() as f64
}

impl ReadingStore for Database {
    async fn insert_reading(&self, reading: &SensorReading) -> Result<bool> {
        Database::insert_reading(self, reading).await
    }
}

impl SeriesSource for Database {
    async fn metric_series(
        &self,
        metric: Metric,
        window: &TimeWindow,
        bucket: Bucket,
    ) -> Result<Vec<f64>, ForecastError> {
        let rows = sqlx::query_as::<_, (NaiveDateTime, Option<f64>)>(metric.series_sql())
            .bind(bucket.as_sql())
            .bind(offset_secs(window))
            .bind(window.start_utc())
            .bind(window.end_utc())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ForecastError::QueryFailed(e.to_string()))?;

        let values: Vec<f64> = rows.into_iter().filter_map(|(_, v)| v).collect();
        if values.is_empty() {
            return Err(ForecastError::NoData {
                metric: metric.to_string(),
            });
        }

        tracing::debug!(
            metric = metric.as_str(),
            bucket = bucket.as_sql(),
            points = values.len(),
            "Fetched metric series"
        );
        Ok(values)
    }
}
