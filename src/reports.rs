//! Summary reports, chart series and CSV export

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::config::SiteConfig;
use crate::db::{Database, HourlyEnergy, SeriesRow, SummaryTotals};
use crate::periods::{Bucket, ReportPeriod, TimeWindow, at_offset, history_window, summary_window};
use crate::service::ForecastReport;

/// Energy and comfort totals for one report period.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub site: String,
    pub period: ReportPeriod,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub total_kwh: f64,
    pub total_cost: f64,
    /// Energy use intensity over the period, kWh per square metre
    pub eui_kwh_m2: f64,
    pub avg_pmv: Option<f64>,
    pub avg_ppd: Option<f64>,
    pub sample_count: i64,
    pub tariff_per_kwh: f64,
    pub floor_area_m2: f64,
    pub hourly_profile: Vec<HourlyEnergy>,
}

impl SummaryReport {
    pub fn from_parts(
        period: ReportPeriod,
        window: &TimeWindow,
        totals: SummaryTotals,
        hourly_profile: Vec<HourlyEnergy>,
        site: &SiteConfig,
    ) -> Self {
        let eui_kwh_m2 = if site.floor_area_m2 > 0.0 {
            totals.total_kwh / site.floor_area_m2
        } else {
            0.0
        };

        Self {
            site: site.name.clone(),
            period,
            start: window.start,
            end: window.end,
            total_kwh: round_to(totals.total_kwh, 3),
            total_cost: round_to(totals.total_cost, 2),
            eui_kwh_m2: round_to(eui_kwh_m2, 6),
            avg_pmv: totals.avg_pmv.map(|v| round_to(v, 3)),
            avg_ppd: totals.avg_ppd.map(|v| round_to(v, 2)),
            sample_count: totals.sample_count,
            tariff_per_kwh: site.tariff_per_kwh,
            floor_area_m2: site.floor_area_m2,
            hourly_profile,
        }
    }

    /// Whether the window held no readings at all.
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

/// One chart bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub ts_start: DateTime<FixedOffset>,
    pub avg_temp: f64,
    pub avg_humidity: f64,
    pub avg_wind_speed: f64,
    pub avg_pm25: f64,
    pub avg_co2: f64,
    pub total_energy_kwh: f64,
    pub total_cost: f64,
    pub eui_kwh_m2: f64,
    pub avg_pmv: f64,
    pub avg_ppd: f64,
    pub sample_count: i64,
}

impl SeriesPoint {
    pub fn from_row(row: &SeriesRow, offset: FixedOffset, floor_area_m2: f64) -> Self {
        let eui = if floor_area_m2 > 0.0 {
            row.total_energy_kwh / floor_area_m2
        } else {
            0.0
        };
        Self {
            ts_start: at_offset(offset, row.bucket_start),
            avg_temp: round_to(row.avg_temp, 3),
            avg_humidity: round_to(row.avg_humidity, 2),
            avg_wind_speed: round_to(row.avg_wind_speed, 3),
            avg_pm25: round_to(row.avg_pm25, 2),
            avg_co2: round_to(row.avg_co2, 1),
            total_energy_kwh: round_to(row.total_energy_kwh, 3),
            total_cost: round_to(row.total_cost, 2),
            eui_kwh_m2: round_to(eui, 6),
            avg_pmv: round_to(row.avg_pmv, 3),
            avg_ppd: round_to(row.avg_ppd, 2),
            sample_count: row.sample_count,
        }
    }
}

/// Aggregated chart series over a history window.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesReport {
    pub bucket: Bucket,
    pub size: u32,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub points: Vec<SeriesPoint>,
}

impl SeriesReport {
    pub fn from_rows(
        bucket: Bucket,
        size: u32,
        window: &TimeWindow,
        rows: &[SeriesRow],
        site: &SiteConfig,
    ) -> Self {
        let offset = window.offset();
        Self {
            bucket,
            size,
            start: window.start,
            end: window.end,
            points: rows
                .iter()
                .map(|row| SeriesPoint::from_row(row, offset, site.floor_area_m2))
                .collect(),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub async fn build_summary(
    db: &Database,
    period: ReportPeriod,
    reference: DateTime<FixedOffset>,
    site: &SiteConfig,
) -> Result<SummaryReport> {
    let window = summary_window(period, reference);
    let totals = db.summary(&window).await?;
    let profile = db.hourly_profile(&window).await?;

    let report = SummaryReport::from_parts(period, &window, totals, profile, site);
    tracing::debug!(
        period = period.as_str(),
        samples = report.sample_count,
        total_kwh = report.total_kwh,
        "Built summary report"
    );
    Ok(report)
}

pub async fn build_series(
    db: &Database,
    bucket: Bucket,
    size: u32,
    reference: DateTime<FixedOffset>,
    site: &SiteConfig,
) -> Result<SeriesReport> {
    let window = history_window(bucket, size, reference);
    let rows = db.series(bucket, &window).await?;
    Ok(SeriesReport::from_rows(bucket, size, &window, &rows, site))
}

/// Write series points as CSV, one row per bucket.
pub fn write_series_csv(points: &[SeriesPoint], path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).context("Failed to create CSV writer")?;
    for point in points {
        wtr.serialize(point)
            .context("Failed to serialize series point")?;
    }
    wtr.flush().context("Failed to flush CSV writer")?;
    Ok(())
}

#[derive(Serialize)]
struct ForecastCsvRow<'a> {
    timestamp: DateTime<FixedOffset>,
    metric: &'a str,
    family: &'a str,
    granularity: &'a str,
    value: f64,
}

/// Write forecast points as CSV with the request identity on every row.
pub fn write_forecast_csv(report: &ForecastReport, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).context("Failed to create CSV writer")?;
    for point in &report.points {
        wtr.serialize(ForecastCsvRow {
            timestamp: point.timestamp,
            metric: report.metric.as_str(),
            family: report.model_used,
            granularity: report.granularity.as_str(),
            value: point.value,
        })
        .context("Failed to serialize forecast point")?;
    }
    wtr.flush().context("Failed to flush CSV writer")?;
    Ok(())
}
