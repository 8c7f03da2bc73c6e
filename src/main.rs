use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use building_monitor::{
    comfort::{self, SurfaceElement},
    config::AppConfig,
    db::{self, Metric},
    energy::EnergyEstimator,
    forecast::{ForecastEngine, Granularity, ModelCacheStore, ModelFamily},
    generator,
    periods::{self, Bucket, ReportPeriod},
    reports,
    scheduler::HourlyJob,
    service::{ForecastRequest, ForecastService},
    traits::{Clock, SystemClock},
};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "building-monitor")]
#[command(about = "Smart building monitor - hourly readings, reports and forecasts")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the hourly ingestion job until interrupted
    Daemon,
    /// Generate and store the reading for the current hour
    GenerateNow,
    /// Fill the last N days with synthetic readings
    Backfill {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Print the most recent readings
    Latest {
        #[arg(short, long, default_value_t = 24)]
        n: i64,
    },
    /// Energy and comfort totals for a period
    Summary {
        /// daily, weekly or monthly
        period: String,
        #[arg(long)]
        ref_date: Option<String>,
    },
    /// Aggregated chart series
    Series {
        /// hourly, daily or monthly
        bucket: String,
        #[arg(long)]
        size: Option<u32>,
        #[arg(long)]
        ref_date: Option<String>,
        /// Also write the points to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Forecast a metric with an LSTM or RNN model
    Forecast {
        #[arg(long, default_value = "temp")]
        metric: String,
        /// daily (24 hours), weekly (7 days) or monthly (30 days)
        #[arg(long, default_value = "daily")]
        granularity: String,
        #[arg(long, default_value = "lstm")]
        family: String,
        /// History length in buckets
        #[arg(long)]
        history: Option<u32>,
        #[arg(long = "ref")]
        reference: Option<String>,
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Comfort indices and surface temperatures for given conditions
    Comfort {
        /// Indoor air temperature
        #[arg(long, alias = "temp")]
        t_in: f64,
        /// Outdoor air temperature for the free-running surface table
        #[arg(long, default_value_t = comfort::T_OUT_REF)]
        t_out: f64,
        #[arg(long, default_value_t = 50.0)]
        humidity: f64,
        #[arg(long, default_value_t = 0.0)]
        wind: f64,
        #[arg(long, default_value_t = 12.0)]
        pm25: f64,
        /// Only this construction element, by name or alias
        #[arg(long)]
        element: Option<String>,
    },
    /// List the construction elements of the surface tables
    Elements,
    /// Print name and version
    Status,
    /// Estimate hourly energy use at an air temperature from stored readings
    EnergyEstimate {
        #[arg(long)]
        temp: f64,
        /// Days of readings to fit on
        #[arg(long, default_value_t = 30)]
        days: u32,
        #[arg(long)]
        ref_date: Option<String>,
    },
    /// Export the raw readings of a period to CSV
    Export {
        period: String,
        #[arg(long)]
        ref_date: Option<String>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Inspect or clear the forecast model cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// List cached models
    List,
    /// Delete every cached model
    Purge,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("building_monitor=debug");

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let config = Arc::new(config);

    // Commands that never touch the database
    match &args.command {
        Command::Comfort {
            t_in,
            t_out,
            humidity,
            wind,
            pm25,
            element,
        } => {
            let conditions = Conditions {
                t_in: *t_in,
                t_out: *t_out,
                humidity: *humidity,
                wind: *wind,
                pm25: *pm25,
            };
            return print_comfort(&conditions, element.as_deref());
        }
        Command::Elements => {
            let names: Vec<&str> = SurfaceElement::ALL.iter().map(|e| e.name()).collect();
            return print_json(&names);
        }
        Command::Status => {
            return print_json(&Status {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                status: "ok",
            });
        }
        Command::Cache(cache) => return run_cache(cache, &config),
        _ => {}
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(run(args.command, config))
}

async fn run(command: Command, config: Arc<AppConfig>) -> Result<()> {
    tracing::info!("Connecting to database...");
    let database = db::Database::new(&config.database.url).await?;
    tracing::info!("Database connected successfully");

    let clock = SystemClock;
    let offset = config.site.offset();

    match command {
        Command::Daemon => run_daemon(database, config).await,
        Command::GenerateNow => {
            let mut rng = StdRng::from_os_rng();
            let reading = generator::generate_hour(
                clock.now_at(offset),
                &config.site,
                &config.energy,
                &mut rng,
            );
            if database.insert_reading(&reading).await? {
                tracing::info!(ts = %reading.ts, "Stored reading for the current hour");
            } else {
                tracing::info!(ts = %reading.ts, "Reading for the current hour already exists");
            }
            print_json(&reading)
        }
        Command::Backfill { days } => {
            let mut rng = StdRng::from_os_rng();
            let stats = generator::backfill(
                &database,
                clock.now_at(offset),
                days,
                &config.site,
                &config.energy,
                &mut rng,
            )
            .await?;
            println!(
                "inserted {} rows, skipped {} existing",
                stats.inserted, stats.skipped
            );
            Ok(())
        }
        Command::Latest { n } => print_json(&database.latest(n).await?),
        Command::Summary { period, ref_date } => {
            let period: ReportPeriod = period.parse()?;
            let reference =
                periods::parse_reference(ref_date.as_deref(), offset, clock.now_utc())?;
            let report =
                reports::build_summary(&database, period, reference, &config.site).await?;
            if report.is_empty() {
                tracing::warn!(period = period.as_str(), "No readings in the selected period");
            }
            print_json(&report)
        }
        Command::Series {
            bucket,
            size,
            ref_date,
            csv,
        } => {
            let bucket: Bucket = bucket.parse()?;
            let size = size.unwrap_or(bucket.default_size());
            if size == 0 {
                bail!("size must be at least 1");
            }
            let reference =
                periods::parse_reference(ref_date.as_deref(), offset, clock.now_utc())?;
            let report =
                reports::build_series(&database, bucket, size, reference, &config.site).await?;
            if let Some(path) = csv {
                reports::write_series_csv(&report.points, &path)?;
                tracing::info!(path = %path.display(), "Series written to CSV");
            }
            print_json(&report)
        }
        Command::Forecast {
            metric,
            granularity,
            family,
            history,
            reference,
            csv,
        } => {
            let request = ForecastRequest {
                metric: metric.parse::<Metric>()?,
                granularity: granularity.parse::<Granularity>()?,
                family: family.parse::<ModelFamily>()?,
                history,
                reference: periods::parse_reference(
                    reference.as_deref(),
                    offset,
                    clock.now_utc(),
                )?,
            };
            let engine = Arc::new(ForecastEngine::new(&config.forecast));
            let service = ForecastService::new(database, engine);
            let report = service.forecast(&request).await?;
            if let Some(path) = csv {
                reports::write_forecast_csv(&report, &path)?;
                tracing::info!(path = %path.display(), "Forecast written to CSV");
            }
            print_json(&report)
        }
        Command::Export {
            period,
            ref_date,
            out,
        } => {
            let period: ReportPeriod = period.parse()?;
            let reference =
                periods::parse_reference(ref_date.as_deref(), offset, clock.now_utc())?;
            let window = periods::summary_window(period, reference);
            let path = database.export_to_csv(&window, &out, &clock).await?;
            println!("{}", path.display());
            Ok(())
        }
        Command::EnergyEstimate {
            temp,
            days,
            ref_date,
        } => {
            if days == 0 {
                bail!("days must be at least 1");
            }
            let reference =
                periods::parse_reference(ref_date.as_deref(), offset, clock.now_utc())?;
            let window = periods::history_window(Bucket::Day, days, reference);
            let readings = database.readings_in(&window).await?;
            let estimator = EnergyEstimator::from_readings(&readings);
            if estimator.linear_fit().is_none() {
                tracing::warn!(
                    samples = estimator.samples(),
                    "Too few readings for a regression, interpolating"
                );
            }
            print_json(&estimator.estimate_with_cost(temp, config.site.tariff_per_kwh))
        }
        Command::Comfort { .. } | Command::Elements | Command::Status | Command::Cache(_) => {
            Ok(())
        }
    }
}

/// Run in daemon mode - one synthetic reading per local hour
async fn run_daemon(database: db::Database, config: Arc<AppConfig>) -> Result<()> {
    if !config.scheduler.enabled {
        bail!("Scheduler is disabled in configuration (scheduler.enabled = false)");
    }

    tracing::info!(
        site = %config.site.name,
        "Starting building monitor in daemon mode"
    );

    let job = HourlyJob::new(
        database,
        SystemClock,
        config.site.clone(),
        config.energy.clone(),
        &config.scheduler,
        rand::random(),
    );

    tokio::select! {
        _ = job.run() => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown requested, stopping hourly job");
            Ok(())
        }
    }
}

fn run_cache(command: &CacheCommand, config: &AppConfig) -> Result<()> {
    let store = ModelCacheStore::new(config.forecast.cache_dir.clone());
    match command {
        CacheCommand::List => {
            let entries = store
                .entries()
                .with_context(|| format!("Failed to read cache at {}", store.dir().display()))?;
            print_json(&entries)
        }
        CacheCommand::Purge => {
            let removed = store
                .purge()
                .with_context(|| format!("Failed to purge cache at {}", store.dir().display()))?;
            println!("removed {} files from {}", removed, store.dir().display());
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct Status {
    name: &'static str,
    version: &'static str,
    status: &'static str,
}

#[derive(Debug, Clone, Copy)]
struct Conditions {
    t_in: f64,
    t_out: f64,
    humidity: f64,
    wind: f64,
    pm25: f64,
}

#[derive(Serialize)]
struct ComfortReport {
    pmv: i8,
    ppd: f64,
    label: comfort::PmvLabel,
    comfort_index: f64,
    index_label: comfort::PmvLabel,
    weighted: f64,
    surfaces: Vec<comfort::SurfaceComfort>,
}

fn print_comfort(conditions: &Conditions, element: Option<&str>) -> Result<()> {
    let elements = match element {
        Some(name) => vec![
            name.parse::<SurfaceElement>()
                .context("Run `building-monitor elements` for the known names")?,
        ],
        None => SurfaceElement::ALL.to_vec(),
    };

    let Conditions {
        t_in,
        t_out,
        humidity,
        wind,
        pm25,
    } = *conditions;
    let pmv = comfort::temp_to_pmv(t_in);
    let index = comfort::comfort_index(t_in, humidity, wind);
    let report = ComfortReport {
        pmv,
        ppd: comfort::pmv_to_ppd(pmv as f64),
        label: comfort::PmvLabel::from_index(pmv as f64),
        comfort_index: index,
        index_label: comfort::index_label(index),
        weighted: comfort::weighted_comfort(t_in, humidity, wind, pm25),
        surfaces: elements
            .into_iter()
            .map(|element| comfort::surface_comfort(element, t_out, t_in, humidity, wind))
            .collect(),
    };
    print_json(&report)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
