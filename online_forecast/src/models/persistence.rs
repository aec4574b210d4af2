//! Last-value forecast

use super::{require_steps, ForecastModel, ModelFamily, ModelForecast};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Repeats the last observed value at every step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistenceModel {
    pub last_value: f64,
}

impl PersistenceModel {
    pub fn new(last_value: f64) -> Self {
        Self { last_value }
    }

    /// Flat forecast with a symmetric band of `fraction` of |value|
    pub fn banded(&self, steps: usize, fraction: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let margin = self.last_value.abs() * fraction;
        (
            vec![self.last_value; steps],
            vec![self.last_value - margin; steps],
            vec![self.last_value + margin; steps],
        )
    }
}

#[async_trait]
impl ForecastModel for PersistenceModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::Persistence
    }

    fn has_native_intervals(&self) -> bool {
        false
    }

    async fn predict(&self, horizon_count: usize, _levels: &[u32]) -> Result<ModelForecast> {
        require_steps(horizon_count)?;
        Ok(ModelForecast::point(vec![self.last_value; horizon_count]))
    }
}
