//! # Interval Math
//!
//! Uncertainty quantification and accuracy calculations for multi-horizon
//! forecasts. This crate provides three interchangeable prediction-interval
//! generators and the error metrics used to track forecast quality.
//!
//! - [`conformal::ConformalPrediction`]: non-parametric intervals from
//!   cross-validated absolute errors
//! - [`bootstrap::BootstrapResiduals`]: intervals from resampled residuals
//! - [`quantile_regression::QuantileRegression`]: one linear model per quantile
//!
//! ## Example
//!
//! ```
//! use interval_math::conformal::ConformalPrediction;
//! use interval_math::IntervalGenerator;
//!
//! let mut conformal = ConformalPrediction::new(vec![80, 95]).unwrap();
//! conformal.fit_scores(vec![0.5, 1.0, 1.5, 2.0, 2.5]).unwrap();
//!
//! let intervals = conformal.generate(&[100.0, 101.0, 102.0]).unwrap();
//! let bounds = intervals.bounds(95).unwrap();
//! assert!(bounds.lower[0] < 100.0 && bounds.upper[0] > 100.0);
//! ```

use thiserror::Error;

pub mod accuracy;
pub mod bootstrap;
pub mod conformal;
pub mod intervals;
pub mod quantile;
pub mod quantile_regression;

pub use accuracy::{absolute_percentage_error, AccuracyMetrics};
pub use intervals::{
    create_interval_generator, validate_intervals, IntervalBounds, IntervalGenerator,
    IntervalMethod, IntervalStrategy, IntervalValidation, PredictionIntervals,
};

/// Errors that can occur while fitting or generating prediction intervals
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("Generator not fitted: {0}")]
    NotFitted(String),
}

/// Result type for interval math operations
pub type Result<T> = std::result::Result<T, MathError>;

/// Check that a confidence level is a percentage strictly between 0 and 100
pub fn validate_level(level: u32) -> Result<()> {
    if level == 0 || level >= 100 {
        return Err(MathError::InvalidInput(format!(
            "Confidence level must be between 1 and 99, got {}",
            level
        )));
    }
    Ok(())
}

/// Check a whole set of confidence levels
pub fn validate_levels(levels: &[u32]) -> Result<()> {
    if levels.is_empty() {
        return Err(MathError::InvalidInput(
            "At least one confidence level is required".to_string(),
        ));
    }
    levels.iter().try_for_each(|&level| validate_level(level))
}

/// Miscoverage rate for a confidence level: 95 -> 0.05
pub fn alpha_for_level(level: u32) -> f64 {
    (100.0 - level as f64) / 100.0
}
