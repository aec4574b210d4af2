//! # Online Forecast
//!
//! Online multi-horizon forecasting for sensor tags, with accuracy tracking.
//!
//! ## Pipeline
//!
//! Three schedulers share one cycle (10 minutes by default) and run at
//! staggered offsets inside it:
//!
//! - [`ForecastScheduler`]: at the cycle boundary, forecasts every deployed
//!   model over its configured horizons and stores the predictions with
//!   confidence bounds
//! - [`ActualValueUpdater`]: one minute later, matches predictions whose
//!   target time has passed to the nearest good-quality reading
//! - [`PerformanceAggregator`]: three minutes later, rolls completed
//!   predictions up into hourly MAE/MAPE/RMSE per model and horizon
//!
//! The stages never talk to each other directly. Everything goes through a
//! [`ForecastStore`], which is PostgreSQL in production and [`MemoryStore`]
//! in tests and offline replay.
//!
//! ## Cycle alignment
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use online_forecast::align::floor_to_cycle;
//!
//! let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap();
//! let forecast_time = floor_to_cycle(now, 600);
//! assert_eq!(forecast_time, Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());
//! ```

pub mod align;
pub mod config;
pub mod error;
pub mod horizons;
pub mod loader;
pub mod models;
pub mod records;
pub mod replay;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use crate::config::{Config, DatabaseConfig, PipelineConfig};
pub use crate::error::{PipelineError, Result};
pub use crate::models::{ForecastModel, ModelBlob, ModelFamily, ModelForecast};
pub use crate::scheduler::{
    ActualValueUpdater, ForecastScheduler, PerformanceAggregator, SchedulerManager,
};
pub use crate::store::{ForecastStore, MemoryStore, PgForecastStore};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
