//! Shared interval types, the generator trait and the strategy factory

use crate::bootstrap::BootstrapResiduals;
use crate::conformal::ConformalPrediction;
use crate::quantile_regression::QuantileRegression;
use crate::{MathError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::str::FromStr;

/// Lower and upper bounds for every forecast step at one confidence level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl IntervalBounds {
    /// Width of the interval at each step
    pub fn widths(&self) -> Vec<f64> {
        self.upper
            .iter()
            .zip(&self.lower)
            .map(|(u, l)| u - l)
            .collect()
    }
}

/// Prediction intervals keyed by confidence level (percent)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionIntervals {
    bounds: BTreeMap<u32, IntervalBounds>,
}

impl PredictionIntervals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bounds for a level, checking both sides have the same length
    pub fn insert(&mut self, level: u32, lower: Vec<f64>, upper: Vec<f64>) -> Result<()> {
        crate::validate_level(level)?;
        if lower.len() != upper.len() {
            return Err(MathError::InvalidInput(format!(
                "Lower bound length ({}) doesn't match upper bound length ({})",
                lower.len(),
                upper.len()
            )));
        }
        self.bounds.insert(level, IntervalBounds { lower, upper });
        Ok(())
    }

    pub fn bounds(&self, level: u32) -> Option<&IntervalBounds> {
        self.bounds.get(&level)
    }

    pub fn levels(&self) -> Vec<u32> {
        self.bounds.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Look up one side by its column key, e.g. `lo-95` or `hi-80`
    pub fn get(&self, key: &str) -> Option<&[f64]> {
        let (side, level) = key.split_once('-')?;
        let bounds = self.bounds.get(&level.parse::<u32>().ok()?)?;
        match side {
            "lo" => Some(bounds.lower.as_slice()),
            "hi" => Some(bounds.upper.as_slice()),
            _ => None,
        }
    }

    /// All column keys in level order
    pub fn keys(&self) -> Vec<String> {
        self.bounds
            .keys()
            .flat_map(|level| [format!("lo-{}", level), format!("hi-{}", level)])
            .collect()
    }
}

/// A fitted strategy that turns point forecasts into prediction intervals
pub trait IntervalGenerator: Debug + Send + Sync {
    /// Confidence levels (percent) produced by `generate`
    fn confidence_levels(&self) -> &[u32];

    /// Whether `fit` has been called successfully
    fn is_fitted(&self) -> bool;

    /// Generate lower/upper bounds for each step of `point_forecasts`
    fn generate(&self, point_forecasts: &[f64]) -> Result<PredictionIntervals>;
}

/// Supported interval strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalMethod {
    Conformal,
    Bootstrap,
    Quantile,
}

impl FromStr for IntervalMethod {
    type Err = MathError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conformal" => Ok(Self::Conformal),
            "bootstrap" => Ok(Self::Bootstrap),
            "quantile" => Ok(Self::Quantile),
            other => Err(MathError::InvalidInput(format!(
                "Unknown method: {}. Choose from: 'conformal', 'bootstrap', 'quantile'",
                other
            ))),
        }
    }
}

/// One of the three strategies, still to be fitted by the caller
#[derive(Debug, Clone)]
pub enum IntervalStrategy {
    Conformal(ConformalPrediction),
    Bootstrap(BootstrapResiduals),
    Quantile(QuantileRegression),
}

impl IntervalStrategy {
    pub fn method(&self) -> IntervalMethod {
        match self {
            Self::Conformal(_) => IntervalMethod::Conformal,
            Self::Bootstrap(_) => IntervalMethod::Bootstrap,
            Self::Quantile(_) => IntervalMethod::Quantile,
        }
    }

    fn inner(&self) -> &dyn IntervalGenerator {
        match self {
            Self::Conformal(g) => g as &dyn IntervalGenerator,
            Self::Bootstrap(g) => g as &dyn IntervalGenerator,
            Self::Quantile(g) => g as &dyn IntervalGenerator,
        }
    }
}

impl IntervalGenerator for IntervalStrategy {
    fn confidence_levels(&self) -> &[u32] {
        self.inner().confidence_levels()
    }

    fn is_fitted(&self) -> bool {
        self.inner().is_fitted()
    }

    fn generate(&self, point_forecasts: &[f64]) -> Result<PredictionIntervals> {
        self.inner().generate(point_forecasts)
    }
}

/// Create an unfitted interval generator for `method`
pub fn create_interval_generator(
    method: IntervalMethod,
    confidence_levels: Vec<u32>,
) -> Result<IntervalStrategy> {
    Ok(match method {
        IntervalMethod::Conformal => {
            IntervalStrategy::Conformal(ConformalPrediction::new(confidence_levels)?)
        }
        IntervalMethod::Bootstrap => {
            IntervalStrategy::Bootstrap(BootstrapResiduals::new(confidence_levels)?)
        }
        IntervalMethod::Quantile => {
            IntervalStrategy::Quantile(QuantileRegression::new(confidence_levels)?)
        }
    })
}

/// Quality of a set of intervals against realized values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalValidation {
    /// Share of actual values inside their interval, percent
    pub coverage: f64,
    /// Requested confidence level, percent
    pub target_coverage: f64,
    /// Mean interval width
    pub interval_width: f64,
    /// |coverage - target_coverage|
    pub calibration_error: f64,
}

/// Compare realized values with interval bounds
pub fn validate_intervals(
    y_true: &[f64],
    lower: &[f64],
    upper: &[f64],
    confidence_level: u32,
) -> Result<IntervalValidation> {
    crate::validate_level(confidence_level)?;
    if y_true.is_empty() {
        return Err(MathError::InsufficientData(
            "No values to validate".to_string(),
        ));
    }
    if y_true.len() != lower.len() || y_true.len() != upper.len() {
        return Err(MathError::InvalidInput(format!(
            "Length mismatch: {} values, {} lower bounds, {} upper bounds",
            y_true.len(),
            lower.len(),
            upper.len()
        )));
    }

    let n = y_true.len() as f64;
    let inside = y_true
        .iter()
        .zip(lower.iter().zip(upper))
        .filter(|(y, (lo, hi))| *y >= *lo && *y <= *hi)
        .count();
    let coverage = inside as f64 / n * 100.0;
    let interval_width = upper.iter().zip(lower).map(|(u, l)| u - l).sum::<f64>() / n;
    let target_coverage = confidence_level as f64;

    Ok(IntervalValidation {
        coverage,
        target_coverage,
        interval_width,
        calibration_error: (coverage - target_coverage).abs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_access() {
        let mut intervals = PredictionIntervals::new();
        intervals.insert(95, vec![1.0, 2.0], vec![3.0, 4.0]).unwrap();

        assert_eq!(intervals.get("lo-95"), Some(&[1.0, 2.0][..]));
        assert_eq!(intervals.get("hi-95"), Some(&[3.0, 4.0][..]));
        assert_eq!(intervals.get("lo-80"), None);
        assert_eq!(intervals.get("mid-95"), None);
        assert_eq!(intervals.keys(), vec!["lo-95".to_string(), "hi-95".to_string()]);
    }

    #[test]
    fn test_insert_rejects_mismatched_sides() {
        let mut intervals = PredictionIntervals::new();
        assert!(intervals.insert(95, vec![1.0], vec![2.0, 3.0]).is_err());
        assert!(intervals.insert(100, vec![1.0], vec![2.0]).is_err());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("Conformal".parse::<IntervalMethod>().unwrap(), IntervalMethod::Conformal);
        assert_eq!(" bootstrap ".parse::<IntervalMethod>().unwrap(), IntervalMethod::Bootstrap);
        assert!("gaussian".parse::<IntervalMethod>().is_err());
    }
}
