//! # Sensor Forecast Workspace
//!
//! Umbrella crate for the online sensor forecasting pipeline.
//!
//! - [`interval_math`]: prediction intervals and accuracy metrics
//! - [`online_forecast`]: the forecast, backfill and aggregation schedulers
//!
//! ## Example
//!
//! ```
//! use sensor_forecast_workspace::interval_math::AccuracyMetrics;
//!
//! let metrics = AccuracyMetrics::from_pairs(&[11.0, 9.0], &[10.0, 10.0]).unwrap();
//! assert_eq!(metrics.mae, 1.0);
//! assert_eq!(metrics.accuracy(), Some(90.0));
//! ```

pub use interval_math;
pub use online_forecast;
