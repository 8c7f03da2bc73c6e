//! Reporting and history windows in site-local time.
//!
//! Every window is half-open, `[start, end)`, and computed on the local wall
//! clock of the building's fixed UTC offset. The reference instant always
//! belongs to the last bucket of a history window.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike, Utc,
};
use serde::{Deserialize, Serialize};

/// Aggregation bucket of a time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Hour,
    Day,
    Month,
}

impl Bucket {
    /// Field name accepted by `date_trunc`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Bucket::Hour => "hour",
            Bucket::Day => "day",
            Bucket::Month => "month",
        }
    }

    /// Series name as used on the command line.
    pub fn series_name(&self) -> &'static str {
        match self {
            Bucket::Hour => "hourly",
            Bucket::Day => "daily",
            Bucket::Month => "monthly",
        }
    }

    /// Default number of buckets for a chart series.
    pub fn default_size(&self) -> u32 {
        match self {
            Bucket::Hour => 24,
            Bucket::Day => 7,
            Bucket::Month => 6,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.series_name())
    }
}

impl FromStr for Bucket {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Ok(Bucket::Hour),
            "daily" | "day" => Ok(Bucket::Day),
            "monthly" | "month" => Ok(Bucket::Month),
            other => {
                bail!("unknown series granularity '{other}', expected hourly, daily or monthly")
            }
        }
    }
}

/// Summary report period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl ReportPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportPeriod::Daily => "daily",
            ReportPeriod::Weekly => "weekly",
            ReportPeriod::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(ReportPeriod::Daily),
            "weekly" => Ok(ReportPeriod::Weekly),
            "monthly" => Ok(ReportPeriod::Monthly),
            other => bail!("unknown period '{other}', expected daily, weekly or monthly"),
        }
    }
}

/// Half-open local time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl TimeWindow {
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.with_timezone(&Utc)
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        self.end.with_timezone(&Utc)
    }

    pub fn contains(&self, instant: DateTime<FixedOffset>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn offset(&self) -> FixedOffset {
        *self.start.offset()
    }

    /// Whole hours covered by the window.
    pub fn hours(&self) -> i64 {
        (self.end - self.start).num_hours()
    }
}

/// Interpret a naive wall-clock time at a fixed offset.
pub fn at_offset(offset: FixedOffset, naive: NaiveDateTime) -> DateTime<FixedOffset> {
    let utc = naive - Duration::seconds(offset.local_minus_utc() as i64);
    offset.from_utc_datetime(&utc)
}

pub fn start_of_hour(dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let naive = dt.naive_local();
    let floored = naive.date().and_time(NaiveTime::MIN) + Duration::hours(naive.hour() as i64);
    at_offset(*dt.offset(), floored)
}

pub fn start_of_day(dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    at_offset(*dt.offset(), dt.date_naive().and_time(NaiveTime::MIN))
}

pub fn start_of_month(dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let date = dt.date_naive();
    let first = date - Days::new(date.day0() as u64);
    at_offset(*dt.offset(), first.and_time(NaiveTime::MIN))
}

/// First day of the month `months` away from `date`'s month.
fn shift_month(date: NaiveDate, months: i32) -> NaiveDate {
    let index = date.year() * 12 + date.month0() as i32 + months;
    let (year, month0) = (index.div_euclid(12), index.rem_euclid(12));
    NaiveDate::from_ymd_opt(year, month0 as u32 + 1, 1).unwrap_or(date)
}

fn add_months(dt: DateTime<FixedOffset>, months: i32) -> DateTime<FixedOffset> {
    let first = shift_month(dt.date_naive(), months);
    at_offset(*dt.offset(), first.and_time(NaiveTime::MIN))
}

/// Window covered by a summary report.
///
/// Daily is the reference day, weekly the seven days ending with it, monthly
/// the calendar month containing it.
pub fn summary_window(period: ReportPeriod, reference: DateTime<FixedOffset>) -> TimeWindow {
    let day = start_of_day(reference);
    match period {
        ReportPeriod::Daily => TimeWindow {
            start: day,
            end: day + Duration::days(1),
        },
        ReportPeriod::Weekly => TimeWindow {
            start: day - Duration::days(6),
            end: day + Duration::days(1),
        },
        ReportPeriod::Monthly => {
            let month = start_of_month(reference);
            TimeWindow {
                start: month,
                end: add_months(month, 1),
            }
        }
    }
}

/// The `size` buckets ending with (and including) the one containing `reference`.
pub fn history_window(bucket: Bucket, size: u32, reference: DateTime<FixedOffset>) -> TimeWindow {
    let size = size.max(1);
    match bucket {
        Bucket::Hour => {
            let end = start_of_hour(reference) + Duration::hours(1);
            TimeWindow {
                start: end - Duration::hours(size as i64),
                end,
            }
        }
        Bucket::Day => {
            let end = start_of_day(reference) + Duration::days(1);
            TimeWindow {
                start: end - Duration::days(size as i64),
                end,
            }
        }
        Bucket::Month => {
            let end = add_months(start_of_month(reference), 1);
            TimeWindow {
                start: add_months(end, -(size as i32)),
                end,
            }
        }
    }
}

/// Timestamps of `steps` forecast buckets following the one containing `reference`.
pub fn forecast_timestamps(
    bucket: Bucket,
    reference: DateTime<FixedOffset>,
    steps: usize,
) -> Vec<DateTime<FixedOffset>> {
    let next = match bucket {
        Bucket::Hour => start_of_hour(reference) + Duration::hours(1),
        Bucket::Day => start_of_day(reference) + Duration::days(1),
        Bucket::Month => add_months(start_of_month(reference), 1),
    };
    (0..steps)
        .map(|i| match bucket {
            Bucket::Hour => next + Duration::hours(i as i64),
            Bucket::Day => next + Duration::days(i as i64),
            Bucket::Month => add_months(next, i as i32),
        })
        .collect()
}

/// Parse a reference time given on the command line.
///
/// Accepts `YYYY-MM-DD` (local midnight), `YYYY-MM-DDTHH:MM[:SS]` (local), or
/// a full RFC 3339 timestamp. `None` means now.
pub fn parse_reference(
    input: Option<&str>,
    offset: FixedOffset,
    now_utc: DateTime<Utc>,
) -> Result<DateTime<FixedOffset>> {
    let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(now_utc.with_timezone(&offset));
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&offset));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(at_offset(offset, naive));
        }
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid reference time '{raw}'"))?;
    Ok(at_offset(offset, date.and_time(NaiveTime::MIN)))
}
