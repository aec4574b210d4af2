//! Quantile regression intervals
//!
//! One linear model is fitted per quantile (α/2 and 1-α/2 for each level) by
//! subgradient descent on the pinball loss. Features and targets are
//! standardized before fitting.

use crate::intervals::{IntervalGenerator, PredictionIntervals};
use crate::quantile::{central_quantiles, empirical_quantile};
use crate::{validate_levels, MathError, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

const DEFAULT_EPOCHS: usize = 2000;
const DEFAULT_LEARNING_RATE: f64 = 0.5;

/// Column means and standard deviations used to standardize inputs
#[derive(Debug, Clone)]
struct Scaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Scaler {
    fn fit(columns: &[Vec<f64>]) -> Self {
        let (means, stds) = columns
            .iter()
            .map(|col| {
                let n = col.len() as f64;
                let mean = col.iter().sum::<f64>() / n;
                let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                // constant columns are centered only
                let std = if var.sqrt() > 1e-12 { var.sqrt() } else { 1.0 };
                (mean, std)
            })
            .unzip();
        Self { means, stds }
    }

    fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// A linear model for one quantile, in standardized space
#[derive(Debug, Clone)]
struct QuantileModel {
    weights: Vec<f64>,
    bias: f64,
}

impl QuantileModel {
    fn predict(&self, x: &[f64]) -> f64 {
        self.bias + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
    }
}

/// Quantile regression interval generator
#[derive(Debug, Clone)]
pub struct QuantileRegression {
    confidence_levels: Vec<u32>,
    epochs: usize,
    learning_rate: f64,
    x_scaler: Option<Scaler>,
    y_scaler: Option<Scaler>,
    /// Models keyed by quantile in per-mille (25 -> 0.025)
    models: BTreeMap<u32, QuantileModel>,
}

fn per_mille(q: f64) -> u32 {
    (q * 1000.0).round() as u32
}

impl QuantileRegression {
    pub fn new(confidence_levels: Vec<u32>) -> Result<Self> {
        validate_levels(&confidence_levels)?;
        Ok(Self {
            confidence_levels,
            epochs: DEFAULT_EPOCHS,
            learning_rate: DEFAULT_LEARNING_RATE,
            x_scaler: None,
            y_scaler: None,
            models: BTreeMap::new(),
        })
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs.max(1);
        self
    }

    /// Quantiles (as fractions) a fitted generator has models for
    pub fn quantiles(&self) -> Vec<f64> {
        self.models.keys().map(|&k| k as f64 / 1000.0).collect()
    }

    /// Fit one model per required quantile. Each row of `features` is one
    /// observation.
    pub fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<()> {
        if features.len() != targets.len() {
            return Err(MathError::InvalidInput(format!(
                "Feature rows ({}) don't match targets ({})",
                features.len(),
                targets.len()
            )));
        }
        if features.len() < 2 {
            return Err(MathError::InsufficientData(
                "At least two observations are required".to_string(),
            ));
        }
        let n_features = features[0].len();
        if n_features == 0 || features.iter().any(|row| row.len() != n_features) {
            return Err(MathError::InvalidInput(
                "Feature rows must be non-empty and of equal width".to_string(),
            ));
        }
        if features.iter().flatten().chain(targets).any(|v| !v.is_finite()) {
            return Err(MathError::InvalidInput(
                "Features and targets must be finite".to_string(),
            ));
        }

        let columns: Vec<Vec<f64>> = (0..n_features)
            .map(|j| features.iter().map(|row| row[j]).collect())
            .collect();
        let x_scaler = Scaler::fit(&columns);
        let y_scaler = Scaler::fit(&[targets.to_vec()]);

        let x: Vec<Vec<f64>> = features.iter().map(|row| x_scaler.transform(row)).collect();
        let y: Vec<f64> = targets
            .iter()
            .map(|t| (t - y_scaler.means[0]) / y_scaler.stds[0])
            .collect();

        let mut models = BTreeMap::new();
        for &level in &self.confidence_levels {
            let (lo, hi) = central_quantiles(level);
            for q in [lo, hi] {
                let key = per_mille(q);
                if models.contains_key(&key) {
                    continue;
                }
                debug!(quantile = q, "Training quantile model");
                models.insert(key, self.train(&x, &y, q)?);
            }
        }

        info!(
            models = models.len(),
            observations = features.len(),
            "Fitted quantile regression models"
        );
        self.x_scaler = Some(x_scaler);
        self.y_scaler = Some(y_scaler);
        self.models = models;
        Ok(())
    }

    fn train(&self, x: &[Vec<f64>], y: &[f64], q: f64) -> Result<QuantileModel> {
        let n = x.len() as f64;
        let mut model = QuantileModel {
            weights: vec![0.0; x[0].len()],
            bias: empirical_quantile(y, q)?,
        };

        for epoch in 0..self.epochs {
            let step = self.learning_rate / ((epoch + 1) as f64).sqrt();
            let mut grad_w = vec![0.0; model.weights.len()];
            let mut grad_b = 0.0;

            for (row, target) in x.iter().zip(y) {
                // subgradient of the pinball loss with respect to the prediction
                let g = if target - model.predict(row) > 0.0 { -q } else { 1.0 - q };
                grad_b += g;
                for (gw, v) in grad_w.iter_mut().zip(row) {
                    *gw += g * v;
                }
            }

            model.bias -= step * grad_b / n;
            for (w, gw) in model.weights.iter_mut().zip(&grad_w) {
                *w -= step * gw / n;
            }
        }

        Ok(model)
    }

    fn predict_quantile(&self, q: f64, x_future: &[Vec<f64>]) -> Result<Vec<f64>> {
        let (x_scaler, y_scaler) = match (&self.x_scaler, &self.y_scaler) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(MathError::NotFitted(
                    "call fit() first to train quantile models".to_string(),
                ))
            }
        };
        let model = self.models.get(&per_mille(q)).ok_or_else(|| {
            MathError::NotFitted(format!("No model trained for quantile {}", q))
        })?;

        x_future
            .iter()
            .map(|row| {
                if row.len() != x_scaler.means.len() {
                    return Err(MathError::InvalidInput(format!(
                        "Expected {} features, got {}",
                        x_scaler.means.len(),
                        row.len()
                    )));
                }
                let z = model.predict(&x_scaler.transform(row));
                Ok(z * y_scaler.stds[0] + y_scaler.means[0])
            })
            .collect()
    }

    /// Generate intervals from the features of the future points
    pub fn generate_from_features(&self, x_future: &[Vec<f64>]) -> Result<PredictionIntervals> {
        let mut intervals = PredictionIntervals::new();
        for &level in &self.confidence_levels {
            let (lo_q, hi_q) = central_quantiles(level);
            let lo = self.predict_quantile(lo_q, x_future)?;
            let hi = self.predict_quantile(hi_q, x_future)?;

            // uncross quantiles so lower <= upper at every step
            let (lower, upper) = lo
                .iter()
                .zip(&hi)
                .map(|(a, b)| (a.min(*b), a.max(*b)))
                .unzip();
            intervals.insert(level, lower, upper)?;
        }
        Ok(intervals)
    }

    fn feature_count(&self) -> Option<usize> {
        self.x_scaler.as_ref().map(|s| s.means.len())
    }
}

impl IntervalGenerator for QuantileRegression {
    fn confidence_levels(&self) -> &[u32] {
        &self.confidence_levels
    }

    fn is_fitted(&self) -> bool {
        !self.models.is_empty()
    }

    /// Only usable when the models were fitted on a single feature, which is
    /// then taken to be the point forecast. Otherwise call
    /// [`QuantileRegression::generate_from_features`].
    fn generate(&self, point_forecasts: &[f64]) -> Result<PredictionIntervals> {
        match self.feature_count() {
            None => Err(MathError::NotFitted(
                "call fit() first to train quantile models".to_string(),
            )),
            Some(1) => {
                let rows: Vec<Vec<f64>> = point_forecasts.iter().map(|p| vec![*p]).collect();
                self.generate_from_features(&rows)
            }
            Some(n) => Err(MathError::InvalidInput(format!(
                "Quantile regression was fitted on {} features; use generate_from_features",
                n
            ))),
        }
    }
}
