//! Bootstrap residual intervals
//!
//! In-sample residuals are resampled with replacement and added to each point
//! forecast. The interval bounds are percentiles of the simulated paths.
//!
//! Residuals are treated as exchangeable, so the same error distribution is
//! used at every step. For long horizons this understates uncertainty; prefer
//! conformal prediction when per-step widening matters.

use crate::intervals::{IntervalGenerator, PredictionIntervals};
use crate::quantile::{central_quantiles, empirical_quantile};
use crate::{validate_levels, MathError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

/// Bootstrap residual interval generator
#[derive(Debug, Clone)]
pub struct BootstrapResiduals {
    confidence_levels: Vec<u32>,
    n_bootstrap: usize,
    seed: Option<u64>,
    residuals: Option<Vec<f64>>,
}

impl BootstrapResiduals {
    /// Create a generator with 1000 iterations and an unseeded RNG
    pub fn new(confidence_levels: Vec<u32>) -> Result<Self> {
        validate_levels(&confidence_levels)?;
        Ok(Self {
            confidence_levels,
            n_bootstrap: 1000,
            seed: None,
            residuals: None,
        })
    }

    pub fn with_iterations(mut self, n_bootstrap: usize) -> Result<Self> {
        if n_bootstrap == 0 {
            return Err(MathError::InvalidInput(
                "Number of bootstrap iterations must be positive".to_string(),
            ));
        }
        self.n_bootstrap = n_bootstrap;
        Ok(self)
    }

    /// Fix the RNG seed so repeated calls to `generate` give identical bounds
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Store residuals `y_true - y_pred` from in-sample predictions
    pub fn fit(&mut self, y_true: &[f64], y_pred: &[f64]) -> Result<()> {
        if y_true.len() != y_pred.len() {
            return Err(MathError::InvalidInput(format!(
                "Actual length ({}) doesn't match prediction length ({})",
                y_true.len(),
                y_pred.len()
            )));
        }
        if y_true.is_empty() {
            return Err(MathError::InsufficientData(
                "At least one residual is required".to_string(),
            ));
        }

        let residuals: Vec<f64> = y_true.iter().zip(y_pred).map(|(t, p)| t - p).collect();
        if residuals.iter().any(|r| !r.is_finite()) {
            return Err(MathError::InvalidInput(
                "Residuals must be finite".to_string(),
            ));
        }

        let mean = residuals.iter().sum::<f64>() / residuals.len() as f64;
        info!(residuals = residuals.len(), mean, "Fitted bootstrap residuals");
        self.residuals = Some(residuals);
        Ok(())
    }

    pub fn residuals(&self) -> Option<&[f64]> {
        self.residuals.as_deref()
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl IntervalGenerator for BootstrapResiduals {
    fn confidence_levels(&self) -> &[u32] {
        &self.confidence_levels
    }

    fn is_fitted(&self) -> bool {
        self.residuals.is_some()
    }

    fn generate(&self, point_forecasts: &[f64]) -> Result<PredictionIntervals> {
        let residuals = self.residuals.as_deref().ok_or_else(|| {
            MathError::NotFitted("call fit() first to store residuals".to_string())
        })?;

        // One simulated sample per step, each holding n_bootstrap draws
        let mut rng = self.rng();
        let mut samples = vec![Vec::with_capacity(self.n_bootstrap); point_forecasts.len()];
        for _ in 0..self.n_bootstrap {
            for (step, forecast) in point_forecasts.iter().enumerate() {
                let residual = residuals.choose(&mut rng).copied().unwrap_or(0.0);
                samples[step].push(forecast + residual);
            }
        }

        let mut intervals = PredictionIntervals::new();
        for &level in &self.confidence_levels {
            let (lo_q, hi_q) = central_quantiles(level);
            let lower = samples
                .iter()
                .map(|s| empirical_quantile(s, lo_q))
                .collect::<Result<Vec<_>>>()?;
            let upper = samples
                .iter()
                .map(|s| empirical_quantile(s, hi_q))
                .collect::<Result<Vec<_>>>()?;
            intervals.insert(level, lower, upper)?;
        }

        debug!(
            iterations = self.n_bootstrap,
            keys = ?intervals.keys(),
            "Generated bootstrap intervals"
        );
        Ok(intervals)
    }
}
