//! Quantile helpers and time-ordered cross-validation splits

use crate::{MathError, Result};
use std::ops::Range;

/// Empirical quantile of a sample, `tau` in `[0, 1]`.
///
/// Linear interpolation between the two closest order statistics, at rank
/// `(n - 1) * tau`.
pub fn empirical_quantile(values: &[f64], tau: f64) -> Result<f64> {
    if values.is_empty() {
        return Err(MathError::InsufficientData(
            "Cannot take a quantile of an empty sample".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&tau) {
        return Err(MathError::InvalidInput(format!(
            "Quantile must be within [0, 1], got {}",
            tau
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(MathError::InvalidInput(
            "Sample contains non-finite values".to_string(),
        ));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (sorted.len() - 1) as f64 * tau;
    let below = rank.floor() as usize;
    let above = rank.ceil() as usize;
    let fraction = rank - below as f64;
    Ok(sorted[below] + (sorted[above] - sorted[below]) * fraction)
}

/// Lower and upper quantiles that bound a central interval at `level` percent
pub fn central_quantiles(level: u32) -> (f64, f64) {
    let alpha = crate::alpha_for_level(level);
    (alpha / 2.0, 1.0 - alpha / 2.0)
}

/// Expanding-window splits over a series of `len` points.
///
/// Each split trains on everything before its validation slice, and the
/// validation slices tile the tail of the series in equal parts.
pub fn time_series_splits(len: usize, n_splits: usize) -> Result<Vec<(Range<usize>, Range<usize>)>> {
    if n_splits == 0 {
        return Err(MathError::InvalidInput(
            "Number of splits must be positive".to_string(),
        ));
    }

    let test_size = len / (n_splits + 1);
    if test_size == 0 {
        return Err(MathError::InsufficientData(format!(
            "Need at least {} observations for {} splits, got {}",
            n_splits + 1,
            n_splits,
            len
        )));
    }

    let first_test = len - n_splits * test_size;
    Ok((0..n_splits)
        .map(|i| {
            let start = first_test + i * test_size;
            (0..start, start..start + test_size)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_extremes() {
        let values = vec![3.0, 1.0, 2.0, 5.0, 4.0];
        assert!((empirical_quantile(&values, 0.0).unwrap() - 1.0).abs() < 1e-9);
        assert!((empirical_quantile(&values, 1.0).unwrap() - 5.0).abs() < 1e-9);
        assert!((empirical_quantile(&values, 0.5).unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_quantile_interpolates_between_order_statistics() {
        let values = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        assert!((empirical_quantile(&values, 0.9).unwrap() - 4.6).abs() < 1e-9);
        assert!((empirical_quantile(&values, 0.1).unwrap() - 1.4).abs() < 1e-9);
        assert!((empirical_quantile(&values, 0.25).unwrap() - 2.0).abs() < 1e-9);

        let ten: Vec<f64> = (1..=10).map(f64::from).collect();
        assert!((empirical_quantile(&ten, 0.8).unwrap() - 8.2).abs() < 1e-9);
        assert!((empirical_quantile(&ten, 0.95).unwrap() - 9.55).abs() < 1e-9);
    }

    #[test]
    fn test_single_value_quantile() {
        assert_eq!(empirical_quantile(&[7.0], 0.3).unwrap(), 7.0);
    }

    #[test]
    fn test_quantile_rejects_bad_input() {
        assert!(empirical_quantile(&[], 0.5).is_err());
        assert!(empirical_quantile(&[1.0], 1.5).is_err());
        assert!(empirical_quantile(&[1.0, f64::NAN], 0.5).is_err());
    }

    #[test]
    fn test_splits_tile_the_tail() {
        let splits = time_series_splits(12, 3).unwrap();
        assert_eq!(splits.len(), 3);
        assert_eq!(splits[0], (0..3, 3..6));
        assert_eq!(splits[1], (0..6, 6..9));
        assert_eq!(splits[2], (0..9, 9..12));
    }

    #[test]
    fn test_splits_need_enough_points() {
        assert!(time_series_splits(4, 5).is_err());
        assert!(time_series_splits(10, 0).is_err());
    }

    #[test]
    fn test_central_quantiles() {
        let (lo, hi) = central_quantiles(80);
        assert!((lo - 0.1).abs() < 1e-12);
        assert!((hi - 0.9).abs() < 1e-12);
    }
}
