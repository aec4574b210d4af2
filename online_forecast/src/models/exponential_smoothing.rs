//! Simple exponential smoothing (ETS(A,N,N))

use super::{normal_intervals, require_steps, ForecastModel, ModelFamily, ModelForecast};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Fitted simple exponential smoothing state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtsModel {
    /// Smoothing parameter
    pub alpha: f64,
    /// Level after the last observation
    pub level: f64,
    /// Standard deviation of one-step errors
    pub sigma: f64,
}

impl EtsModel {
    pub fn fit(series: &[f64], alpha: f64) -> Result<Self> {
        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(PipelineError::InvalidParameter(
                "Alpha must be between 0 and 1".to_string(),
            ));
        }
        let (&first, rest) = series.split_first().ok_or_else(|| {
            PipelineError::InsufficientData("Empty time series data".to_string())
        })?;

        let mut level = first;
        let mut squared_errors = 0.0;
        for &value in rest {
            // one-step forecast is the current level
            let error = value - level;
            squared_errors += error * error;
            level += alpha * error;
        }

        let sigma = if rest.is_empty() {
            0.0
        } else {
            (squared_errors / rest.len() as f64).sqrt()
        };

        Ok(Self { alpha, level, sigma })
    }

    /// Standard deviation at step h: σ·√(1 + (h−1)α²)
    fn std_dev(&self, h: usize) -> f64 {
        self.sigma * (1.0 + (h as f64 - 1.0) * self.alpha * self.alpha).sqrt()
    }
}

#[async_trait]
impl ForecastModel for EtsModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::AutoEts
    }

    fn has_native_intervals(&self) -> bool {
        true
    }

    async fn predict(&self, horizon_count: usize, levels: &[u32]) -> Result<ModelForecast> {
        require_steps(horizon_count)?;
        // flat forecast at the last level
        let values = vec![self.level; horizon_count];
        let intervals = normal_intervals(&values, levels, |h| self.std_dev(h))?;

        Ok(ModelForecast {
            values,
            intervals: Some(intervals),
        })
    }
}
