//! Accuracy metrics for completed forecasts

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};

/// Absolute percentage error of one forecast, `None` when the actual is zero
pub fn absolute_percentage_error(predicted: f64, actual: f64) -> Option<f64> {
    if actual == 0.0 {
        return None;
    }
    Some(((predicted - actual) / actual).abs() * 100.0)
}

/// Forecast accuracy metrics over a set of completed predictions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    /// Number of completed predictions evaluated
    pub count: usize,
    /// Mean Absolute Error
    pub mae: f64,
    /// Mean Absolute Percentage Error, absent when every actual was zero
    pub mape: Option<f64>,
    /// Root Mean Squared Error
    pub rmse: f64,
}

impl AccuracyMetrics {
    /// Build metrics from signed errors (predicted - actual) and whichever
    /// percentage errors could be computed.
    pub fn from_errors(errors: &[f64], percentage_errors: &[f64]) -> Result<Self> {
        if errors.is_empty() {
            return Err(MathError::InsufficientData(
                "No completed predictions to evaluate".to_string(),
            ));
        }

        let n = errors.len() as f64;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        let mse = errors.iter().map(|e| e.powi(2)).sum::<f64>() / n;

        let mape = if percentage_errors.is_empty() {
            None
        } else {
            Some(percentage_errors.iter().sum::<f64>() / percentage_errors.len() as f64)
        };

        Ok(Self {
            count: errors.len(),
            mae,
            mape,
            rmse: mse.sqrt(),
        })
    }

    /// Build metrics directly from predicted and actual values
    pub fn from_pairs(predicted: &[f64], actual: &[f64]) -> Result<Self> {
        if predicted.len() != actual.len() {
            return Err(MathError::InvalidInput(format!(
                "Predicted length ({}) doesn't match actual length ({})",
                predicted.len(),
                actual.len()
            )));
        }

        let errors: Vec<f64> = predicted
            .iter()
            .zip(actual)
            .map(|(&p, &a)| p - a)
            .collect();
        let percentage_errors: Vec<f64> = predicted
            .iter()
            .zip(actual)
            .filter_map(|(&p, &a)| absolute_percentage_error(p, a))
            .collect();

        Self::from_errors(&errors, &percentage_errors)
    }

    /// Accuracy as 100 - MAPE
    pub fn accuracy(&self) -> Option<f64> {
        self.mape.map(|mape| 100.0 - mape)
    }

    /// Copy of the metrics rounded to two decimals for display tables
    pub fn rounded(&self) -> Self {
        Self {
            count: self.count,
            mae: round2(self.mae),
            mape: self.mape.map(round2),
            rmse: round2(self.rmse),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl std::fmt::Display for AccuracyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Forecast Accuracy ({} predictions):", self.count)?;
        writeln!(f, "  MAE:   {:.4}", self.mae)?;
        match self.mape {
            Some(mape) => writeln!(f, "  MAPE:  {:.4}%", mape)?,
            None => writeln!(f, "  MAPE:  n/a")?,
        }
        writeln!(f, "  RMSE:  {:.4}", self.rmse)?;
        Ok(())
    }
}
