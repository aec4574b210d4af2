//! Gradient-boosted lag regressors, exported as an additive lag model
//!
//! The registry's XGBOOST models are reduced at export time to a bias plus
//! one weight per lag. They forecast recursively and have no native
//! intervals. Out-of-sample absolute errors recorded at training time can be
//! attached so the scheduler can build conformal intervals instead of a
//! fixed band.

use super::{require_steps, ForecastModel, ModelFamily, ModelForecast};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagRegressionModel {
    /// Weight per lag, lag 1 first
    pub lag_weights: Vec<f64>,
    pub bias: f64,
    /// Recent observations, oldest first
    pub history: Vec<f64>,
    /// Absolute validation errors from training, possibly empty
    #[serde(default)]
    pub calibration_errors: Vec<f64>,
}

impl LagRegressionModel {
    pub fn new(lag_weights: Vec<f64>, bias: f64, history: Vec<f64>) -> Self {
        Self {
            lag_weights,
            bias,
            history,
            calibration_errors: Vec::new(),
        }
    }

    pub fn with_calibration_errors(mut self, errors: Vec<f64>) -> Self {
        self.calibration_errors = errors;
        self
    }

    pub fn forecast(&self, horizon: usize) -> Result<Vec<f64>> {
        let lags = self.lag_weights.len();
        if self.history.len() < lags.max(1) {
            return Err(PipelineError::Prediction(format!(
                "lag model needs {} observations of history, has {}",
                lags.max(1),
                self.history.len()
            )));
        }

        let mut recent = self.history[self.history.len() - lags..].to_vec();
        let mut values = Vec::with_capacity(horizon);
        for _ in 0..horizon {
            let next = self.bias
                + self
                    .lag_weights
                    .iter()
                    .enumerate()
                    .map(|(i, w)| w * recent[recent.len() - 1 - i])
                    .sum::<f64>();
            recent.push(next);
            values.push(next);
        }
        Ok(values)
    }
}

#[async_trait]
impl ForecastModel for LagRegressionModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::Xgboost
    }

    fn has_native_intervals(&self) -> bool {
        false
    }

    async fn predict(&self, horizon_count: usize, _levels: &[u32]) -> Result<ModelForecast> {
        require_steps(horizon_count)?;
        Ok(ModelForecast::point(self.forecast(horizon_count)?))
    }
}
