//! Building Monitor Library
//!
//! Hourly sensor synthesis and storage, period reports and cached
//! recurrent-network forecasts for a single building.

pub mod comfort;
pub mod config;
pub mod db;
pub mod energy;
pub mod forecast;
pub mod generator;
pub mod periods;
pub mod reports;
pub mod scheduler;
pub mod service;
pub mod traits;

// Re-export commonly used types
pub use comfort::{
    PmvLabel, SurfaceComfort, SurfaceElement, comfort_index, pmv_to_ppd, surface_comfort,
    temp_to_pmv,
};
pub use config::AppConfig;
pub use db::{Database, Metric, MetricFamily, SensorReading};
pub use energy::{EnergyEstimate, EnergyEstimator, EstimateMethod};
pub use forecast::{
    CacheKey, CacheLookup, CacheStatus, ForecastEngine, ForecastError, ForecastOutcome,
    Granularity, ModelCacheStore, ModelFamily,
};
pub use periods::{Bucket, ReportPeriod, TimeWindow};
pub use reports::{SeriesReport, SummaryReport};
pub use scheduler::{HourlyJob, TickOutcome};
pub use service::{ForecastReport, ForecastRequest, ForecastService};
pub use traits::{
    Clock, MemoryStore, MockClock, ReadingStore, SeriesSource, StaticSeries, SystemClock,
};
