//! Autoregressive forecasting with optional first differencing

use super::{normal_intervals, require_steps, ForecastModel, ModelFamily, ModelForecast};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A fitted AR(p) model, optionally on the first difference of the series
/// (ARIMA(p,1,0))
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArimaModel {
    /// AR coefficients, lag 1 first
    pub ar_coefficients: Vec<f64>,
    pub intercept: f64,
    /// Differencing order, 0 or 1
    pub d: usize,
    /// Recent observations in the original scale, oldest first
    pub history: Vec<f64>,
    /// Residual standard deviation of one-step forecasts
    pub sigma: f64,
}

impl ArimaModel {
    /// Fit AR(p) by Yule-Walker (Levinson-Durbin) on the mean-removed,
    /// optionally differenced series
    pub fn fit(series: &[f64], p: usize, d: usize) -> Result<Self> {
        if d > 1 {
            return Err(PipelineError::InvalidParameter(
                "Differencing order must be 0 or 1".to_string(),
            ));
        }
        if series.len() < p + d + 2 {
            return Err(PipelineError::InsufficientData(format!(
                "Insufficient data for ARIMA({},{},0). Need at least {} observations.",
                p,
                d,
                p + d + 2
            )));
        }

        let working = difference(series, d);
        let n = working.len() as f64;
        let mean = working.iter().sum::<f64>() / n;
        let centered: Vec<f64> = working.iter().map(|v| v - mean).collect();

        let autocov: Vec<f64> = (0..=p)
            .map(|lag| {
                centered[lag..]
                    .iter()
                    .zip(&centered)
                    .map(|(a, b)| a * b)
                    .sum::<f64>()
                    / n
            })
            .collect();

        let ar_coefficients = if autocov[0] > 0.0 {
            levinson_durbin(&autocov, p)
        } else {
            vec![0.0; p]
        };
        let intercept = mean * (1.0 - ar_coefficients.iter().sum::<f64>());

        // one-step in-sample residuals
        let residuals: Vec<f64> = (p..working.len())
            .map(|t| {
                let fitted = intercept
                    + ar_coefficients
                        .iter()
                        .enumerate()
                        .map(|(i, phi)| phi * working[t - 1 - i])
                        .sum::<f64>();
                working[t] - fitted
            })
            .collect();
        let sigma = if residuals.is_empty() {
            0.0
        } else {
            (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
        };

        let keep = p + d + 1;
        Ok(Self {
            ar_coefficients,
            intercept,
            d,
            history: series[series.len() - keep..].to_vec(),
            sigma,
        })
    }

    /// Point forecasts in the original scale
    pub fn forecast(&self, horizon: usize) -> Result<Vec<f64>> {
        let p = self.ar_coefficients.len();
        let working = difference(&self.history, self.d);
        if working.len() < p || self.history.is_empty() {
            return Err(PipelineError::Prediction(format!(
                "AR({}) model needs {} observations of history, has {}",
                p,
                p + self.d,
                self.history.len()
            )));
        }

        let mut recent = working[working.len() - p..].to_vec();
        let mut steps = Vec::with_capacity(horizon);
        for _ in 0..horizon {
            let next = self.intercept
                + self
                    .ar_coefficients
                    .iter()
                    .enumerate()
                    .map(|(i, phi)| phi * recent[recent.len() - 1 - i])
                    .sum::<f64>();
            recent.push(next);
            steps.push(next);
        }

        if self.d == 0 {
            return Ok(steps);
        }

        // integrate the differenced forecasts back onto the last level
        let mut level = *self.history.last().unwrap_or(&0.0);
        Ok(steps
            .into_iter()
            .map(|delta| {
                level += delta;
                level
            })
            .collect())
    }

    /// Forecast standard deviation for steps 1..=horizon from the MA(∞)
    /// representation of the fitted process
    fn forecast_std_devs(&self, horizon: usize) -> Vec<f64> {
        let p = self.ar_coefficients.len();
        let mut psi = vec![1.0];
        for j in 1..horizon {
            let next = (1..=p.min(j))
                .map(|i| self.ar_coefficients[i - 1] * psi[j - i])
                .sum::<f64>();
            psi.push(next);
        }

        if self.d == 1 {
            // cumulative weights for the integrated series
            let mut total = 0.0;
            for w in psi.iter_mut() {
                total += *w;
                *w = total;
            }
        }

        let mut variance = 0.0;
        psi.iter()
            .map(|w| {
                variance += w * w;
                self.sigma * variance.sqrt()
            })
            .collect()
    }
}

fn difference(series: &[f64], d: usize) -> Vec<f64> {
    if d == 0 {
        return series.to_vec();
    }
    series.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Solve the Yule-Walker equations for AR coefficients
fn levinson_durbin(autocov: &[f64], p: usize) -> Vec<f64> {
    let mut phi = vec![0.0; p];
    let mut error = autocov[0];

    for k in 1..=p {
        let acc = (1..k).map(|j| phi[j - 1] * autocov[k - j]).sum::<f64>();
        let reflection = (autocov[k] - acc) / error;

        let previous = phi.clone();
        phi[k - 1] = reflection;
        for j in 1..k {
            phi[j - 1] = previous[j - 1] - reflection * previous[k - j - 1];
        }

        error *= 1.0 - reflection * reflection;
        if error <= 0.0 {
            break;
        }
    }

    phi
}

#[async_trait]
impl ForecastModel for ArimaModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::AutoArima
    }

    fn has_native_intervals(&self) -> bool {
        true
    }

    async fn predict(&self, horizon_count: usize, levels: &[u32]) -> Result<ModelForecast> {
        require_steps(horizon_count)?;
        let values = self.forecast(horizon_count)?;
        let std_devs = self.forecast_std_devs(horizon_count);
        let intervals = normal_intervals(&values, levels, |h| std_devs[h - 1])?;

        Ok(ModelForecast {
            values,
            intervals: Some(intervals),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn ar1_series(phi: f64, mean: f64, n: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(17);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let mut values = vec![mean];
        for t in 1..n {
            let prev = values[t - 1];
            values.push(mean + phi * (prev - mean) + noise.sample(&mut rng));
        }
        values
    }

    #[test]
    fn test_fit_recovers_ar1_coefficient() {
        let series = ar1_series(0.7, 50.0, 2000);
        let model = ArimaModel::fit(&series, 1, 0).unwrap();

        assert_abs_diff_eq!(model.ar_coefficients[0], 0.7, epsilon = 0.1);
        assert!(model.sigma > 0.0);
    }

    #[test]
    fn test_forecast_reverts_to_mean() {
        let model = ArimaModel {
            ar_coefficients: vec![0.5],
            intercept: 5.0,
            d: 0,
            history: vec![20.0],
            sigma: 1.0,
        };
        let forecast = model.forecast(3).unwrap();
        assert_abs_diff_eq!(forecast[0], 15.0);
        assert_abs_diff_eq!(forecast[1], 12.5);
        assert_abs_diff_eq!(forecast[2], 11.25);
    }

    #[test]
    fn test_random_walk_widens_with_sqrt_h() {
        let model = ArimaModel {
            ar_coefficients: vec![],
            intercept: 0.0,
            d: 1,
            history: vec![99.0, 100.0],
            sigma: 2.0,
        };
        let std_devs = model.forecast_std_devs(4);
        assert_abs_diff_eq!(std_devs[0], 2.0);
        assert_abs_diff_eq!(std_devs[3], 4.0);
        assert_eq!(model.forecast(2).unwrap(), vec![100.0, 100.0]);
    }

    #[test]
    fn test_fit_needs_enough_points() {
        assert!(ArimaModel::fit(&[1.0, 2.0], 2, 0).is_err());
        assert!(ArimaModel::fit(&[1.0, 2.0, 3.0, 4.0], 1, 2).is_err());
    }
}
