//! Conformal prediction intervals
//!
//! Conformity scores are the absolute errors a forecaster makes on held-out
//! validation folds. The interval half-width for a confidence level L is the
//! L-th percentile of those scores. No distributional assumption is made.

use crate::intervals::{IntervalGenerator, PredictionIntervals};
use crate::quantile::{empirical_quantile, time_series_splits};
use crate::{validate_levels, MathError, Result};
use tracing::{debug, info};

/// Width multiplier applied to the last forecast step when time decay is on
const MAX_DECAY_FACTOR: f64 = 1.5;

/// A forecaster that can be re-trained on a prefix of a series.
///
/// Used by [`ConformalPrediction::fit`] to collect out-of-sample errors.
pub trait RefitForecaster {
    /// Train on `history` and forecast the next `horizon` points
    fn fit_predict(&self, history: &[f64], horizon: usize) -> Result<Vec<f64>>;
}

impl<F> RefitForecaster for F
where
    F: Fn(&[f64], usize) -> Result<Vec<f64>>,
{
    fn fit_predict(&self, history: &[f64], horizon: usize) -> Result<Vec<f64>> {
        self(history, horizon)
    }
}

/// Conformal prediction interval generator
#[derive(Debug, Clone)]
pub struct ConformalPrediction {
    /// Confidence levels (percent)
    confidence_levels: Vec<u32>,
    /// Number of cross-validation windows
    n_windows: usize,
    /// Widen intervals linearly from 1.0x to 1.5x across the horizon
    time_decay: bool,
    /// Absolute validation errors, set by `fit`
    conformity_scores: Option<Vec<f64>>,
}

impl ConformalPrediction {
    /// Create a generator with 5 windows and time decay enabled
    pub fn new(confidence_levels: Vec<u32>) -> Result<Self> {
        validate_levels(&confidence_levels)?;
        Ok(Self {
            confidence_levels,
            n_windows: 5,
            time_decay: true,
            conformity_scores: None,
        })
    }

    pub fn with_windows(mut self, n_windows: usize) -> Result<Self> {
        if n_windows == 0 {
            return Err(MathError::InvalidInput(
                "Number of windows must be positive".to_string(),
            ));
        }
        self.n_windows = n_windows;
        Ok(self)
    }

    pub fn with_time_decay(mut self, time_decay: bool) -> Self {
        self.time_decay = time_decay;
        self
    }

    /// Collect conformity scores by cross-validating `forecaster` over
    /// expanding time splits of `series`.
    pub fn fit<M: RefitForecaster + ?Sized>(&mut self, series: &[f64], forecaster: &M) -> Result<()> {
        info!(
            windows = self.n_windows,
            points = series.len(),
            "Computing conformity scores"
        );

        let mut scores = Vec::new();
        for (fold, (train, validation)) in time_series_splits(series.len(), self.n_windows)?
            .into_iter()
            .enumerate()
        {
            let actual = &series[validation];
            let predicted = forecaster.fit_predict(&series[train], actual.len())?;
            if predicted.len() != actual.len() {
                return Err(MathError::CalculationError(format!(
                    "Forecaster returned {} values for a fold of {}",
                    predicted.len(),
                    actual.len()
                )));
            }

            let errors: Vec<f64> = actual
                .iter()
                .zip(&predicted)
                .map(|(a, p)| (a - p).abs())
                .collect();
            debug!(
                fold = fold + 1,
                errors = errors.len(),
                mean = errors.iter().sum::<f64>() / errors.len() as f64,
                "Fold complete"
            );
            scores.extend(errors);
        }

        self.fit_scores(scores)
    }

    /// Use precomputed conformity scores (absolute errors)
    pub fn fit_scores(&mut self, scores: Vec<f64>) -> Result<()> {
        if scores.is_empty() {
            return Err(MathError::InsufficientData(
                "At least one conformity score is required".to_string(),
            ));
        }
        if scores.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(MathError::InvalidInput(
                "Conformity scores must be finite and non-negative".to_string(),
            ));
        }

        info!(scores = scores.len(), "Collected conformity scores");
        self.conformity_scores = Some(scores);
        Ok(())
    }

    pub fn conformity_scores(&self) -> Option<&[f64]> {
        self.conformity_scores.as_deref()
    }

    /// Base half-width for a level before any time decay
    pub fn base_interval(&self, level: u32) -> Result<f64> {
        let scores = self.conformity_scores.as_deref().ok_or_else(|| {
            MathError::NotFitted("call fit() first to compute conformity scores".to_string())
        })?;
        empirical_quantile(scores, 1.0 - crate::alpha_for_level(level))
    }

    /// Multiplier for step `step` of a `horizon`-step forecast
    fn decay_factor(&self, step: usize, horizon: usize) -> f64 {
        if !self.time_decay || horizon < 2 {
            return 1.0;
        }
        1.0 + (MAX_DECAY_FACTOR - 1.0) * step as f64 / (horizon - 1) as f64
    }
}

impl IntervalGenerator for ConformalPrediction {
    fn confidence_levels(&self) -> &[u32] {
        &self.confidence_levels
    }

    fn is_fitted(&self) -> bool {
        self.conformity_scores.is_some()
    }

    fn generate(&self, point_forecasts: &[f64]) -> Result<PredictionIntervals> {
        let horizon = point_forecasts.len();
        let mut intervals = PredictionIntervals::new();

        for &level in &self.confidence_levels {
            let base = self.base_interval(level)?;
            let widths: Vec<f64> = (0..horizon)
                .map(|step| base * self.decay_factor(step, horizon))
                .collect();

            let lower = point_forecasts.iter().zip(&widths).map(|(p, w)| p - w).collect();
            let upper = point_forecasts.iter().zip(&widths).map(|(p, w)| p + w).collect();
            intervals.insert(level, lower, upper)?;
        }

        debug!(keys = ?intervals.keys(), "Generated conformal intervals");
        Ok(intervals)
    }
}
