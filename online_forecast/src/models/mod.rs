//! Deployed forecasting models
//!
//! A trained model is stored in the registry as a bincode-encoded
//! [`ModelBlob`]. Each variant is one model family and knows how to produce
//! a multi-step forecast, with or without its own prediction intervals.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use interval_math::PredictionIntervals;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;
use std::str::FromStr;

pub mod arima;
pub mod exponential_smoothing;
pub mod lag_regression;
pub mod persistence;

pub use arima::ArimaModel;
pub use exponential_smoothing::EtsModel;
pub use lag_regression::LagRegressionModel;
pub use persistence::PersistenceModel;

/// Model family as named in the registry's `model_type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    AutoArima,
    AutoEts,
    Xgboost,
    Persistence,
}

impl FromStr for ModelFamily {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO_ARIMA" | "ARIMA" => Ok(Self::AutoArima),
            // the registry labels ETS models as PROPHET
            "PROPHET" | "AUTO_ETS" | "ETS" => Ok(Self::AutoEts),
            "XGBOOST" => Ok(Self::Xgboost),
            "PERSISTENCE" | "NAIVE" => Ok(Self::Persistence),
            other => Err(PipelineError::InvalidParameter(format!(
                "Unknown model type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AutoArima => "AUTO_ARIMA",
            Self::AutoEts => "AUTO_ETS",
            Self::Xgboost => "XGBOOST",
            Self::Persistence => "PERSISTENCE",
        };
        f.write_str(name)
    }
}

/// Output of one model invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ModelForecast {
    /// One point forecast per requested step
    pub values: Vec<f64>,
    /// Native intervals, when the family provides them
    pub intervals: Option<PredictionIntervals>,
}

impl ModelForecast {
    pub fn point(values: Vec<f64>) -> Self {
        Self {
            values,
            intervals: None,
        }
    }

    /// Check the forecast has `steps` finite values and, when present,
    /// matching finite bounds at `level`
    pub fn validate(&self, steps: usize, level: u32) -> Result<()> {
        if self.values.len() != steps {
            return Err(PipelineError::Prediction(format!(
                "expected {} values, got {}",
                steps,
                self.values.len()
            )));
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::Prediction(
                "forecast contains non-finite values".to_string(),
            ));
        }
        if let Some(intervals) = &self.intervals {
            let bounds = intervals.bounds(level).ok_or_else(|| {
                PipelineError::Prediction(format!("no {}% interval in forecast", level))
            })?;
            if bounds.lower.len() != steps
                || bounds.upper.len() != steps
                || bounds.lower.iter().chain(&bounds.upper).any(|v| !v.is_finite())
            {
                return Err(PipelineError::Prediction(format!(
                    "malformed {}% interval",
                    level
                )));
            }
        }
        Ok(())
    }
}

/// A loaded model that can be asked for a forecast
#[async_trait]
pub trait ForecastModel: fmt::Debug + Send + Sync {
    fn family(&self) -> ModelFamily;

    /// Whether `predict` returns its own prediction intervals
    fn has_native_intervals(&self) -> bool;

    /// Forecast the next `horizon_count` steps. Families with native
    /// intervals include bounds for every level in `levels`.
    async fn predict(&self, horizon_count: usize, levels: &[u32]) -> Result<ModelForecast>;
}

/// Serialized form of every supported model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelBlob {
    AutoArima(ArimaModel),
    AutoEts(EtsModel),
    Xgboost(LagRegressionModel),
    Persistence(PersistenceModel),
}

impl ModelBlob {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn inner(&self) -> &dyn ForecastModel {
        match self {
            Self::AutoArima(m) => m as &dyn ForecastModel,
            Self::AutoEts(m) => m as &dyn ForecastModel,
            Self::Xgboost(m) => m as &dyn ForecastModel,
            Self::Persistence(m) => m as &dyn ForecastModel,
        }
    }
}

#[async_trait]
impl ForecastModel for ModelBlob {
    fn family(&self) -> ModelFamily {
        self.inner().family()
    }

    fn has_native_intervals(&self) -> bool {
        self.inner().has_native_intervals()
    }

    async fn predict(&self, horizon_count: usize, levels: &[u32]) -> Result<ModelForecast> {
        self.inner().predict(horizon_count, levels).await
    }
}

/// Symmetric normal intervals around `values` where step `h` (1-based) has
/// standard deviation `std_dev(h)`
pub(crate) fn normal_intervals<F>(values: &[f64], levels: &[u32], std_dev: F) -> Result<PredictionIntervals>
where
    F: Fn(usize) -> f64,
{
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| PipelineError::Prediction(format!("standard normal: {}", e)))?;
    let mut intervals = PredictionIntervals::new();

    for &level in levels {
        interval_math::validate_level(level)?;
        let z = normal.inverse_cdf(1.0 - interval_math::alpha_for_level(level) / 2.0);
        let (lower, upper) = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let margin = z * std_dev(i + 1);
                (v - margin, v + margin)
            })
            .unzip();
        intervals.insert(level, lower, upper)?;
    }

    Ok(intervals)
}

pub(crate) fn require_steps(horizon_count: usize) -> Result<()> {
    if horizon_count == 0 {
        return Err(PipelineError::InvalidParameter(
            "horizon count must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_parsing() {
        assert_eq!("AUTO_ARIMA".parse::<ModelFamily>().unwrap(), ModelFamily::AutoArima);
        assert_eq!("prophet".parse::<ModelFamily>().unwrap(), ModelFamily::AutoEts);
        assert_eq!("XGBOOST".parse::<ModelFamily>().unwrap(), ModelFamily::Xgboost);
        assert!("LSTM".parse::<ModelFamily>().is_err());
        assert_eq!(ModelFamily::AutoEts.to_string(), "AUTO_ETS");
    }

    #[test]
    fn test_normal_intervals_at_95() {
        let intervals = normal_intervals(&[10.0, 10.0], &[95], |h| h as f64).unwrap();
        let bounds = intervals.bounds(95).unwrap();
        assert!((bounds.upper[0] - 10.0 - 1.959964).abs() < 1e-4);
        assert!((bounds.upper[1] - 10.0 - 2.0 * 1.959964).abs() < 1e-4);
    }

    #[test]
    fn test_validate_rejects_malformed_output() {
        let forecast = ModelForecast::point(vec![1.0, f64::NAN]);
        assert!(forecast.validate(2, 95).is_err());
        assert!(ModelForecast::point(vec![1.0]).validate(2, 95).is_err());
        assert!(ModelForecast::point(vec![1.0, 2.0]).validate(2, 95).is_ok());
    }
}
