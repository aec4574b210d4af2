//! Periodic multi-horizon forecast generation

use super::player_cache::build_snapshot;
use super::{RunFlag, Stage};
use crate::align::floor_to_cycle;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::horizons::resolve_horizons;
use crate::loader::load_for;
use crate::models::{ForecastModel, ModelBlob, PersistenceModel};
use crate::records::{ModelDescriptor, NewPrediction, Reading};
use crate::store::ForecastStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use interval_math::conformal::ConformalPrediction;
use interval_math::IntervalGenerator;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Band used when a model gives values but no intervals
const APPROXIMATE_BAND: f64 = 0.10;
/// Band around the persistence fallback
const DEGRADED_BAND: f64 = 0.05;

/// Where a forecast's confidence bounds came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntervalSource {
    /// The model's own intervals
    Native,
    /// Conformal intervals from the model's stored calibration errors
    Conformal,
    /// Fixed ±10% placeholder band, not a calibrated interval
    Approximate,
    /// Persistence fallback with a ±5% band after a prediction failure
    Degraded,
}

/// Point forecasts and bounds at the storage confidence level
#[derive(Debug, Clone, PartialEq)]
pub struct BandedForecast {
    pub values: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub source: IntervalSource,
}

impl BandedForecast {
    fn degraded(last_value: f64, steps: usize) -> Self {
        let (values, lower, upper) = PersistenceModel::new(last_value).banded(steps, DEGRADED_BAND);
        Self {
            values,
            lower,
            upper,
            source: IntervalSource::Degraded,
        }
    }

    fn approximate(values: Vec<f64>) -> Self {
        let lower = values.iter().map(|p| p - p.abs() * APPROXIMATE_BAND).collect();
        let upper = values.iter().map(|p| p + p.abs() * APPROXIMATE_BAND).collect();
        Self {
            values,
            lower,
            upper,
            source: IntervalSource::Approximate,
        }
    }
}

/// Outcome of one forecast cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub forecast_time: DateTime<Utc>,
    pub models_seen: usize,
    pub models_succeeded: usize,
    pub predictions_written: u64,
    pub skipped: usize,
}

#[derive(Debug)]
enum ModelOutcome {
    Written { rows: u64, source: IntervalSource },
    Skipped,
}

pub struct ForecastScheduler {
    store: Arc<dyn ForecastStore>,
    config: PipelineConfig,
    flag: RunFlag,
}

impl ForecastScheduler {
    pub fn new(store: Arc<dyn ForecastStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            flag: RunFlag::default(),
        }
    }

    /// Confidence level stored in ci_lower/ci_upper
    fn ci_level(&self) -> u32 {
        self.config.confidence_levels.first().copied().unwrap_or(95)
    }

    /// Generate forecasts for every deployed model as of `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let forecast_time = floor_to_cycle(now, self.config.cycle_secs);
        let models = self.store.deployed_models().await?;
        info!(%forecast_time, models = models.len(), "Forecast cycle starting");

        let mut report = CycleReport {
            forecast_time,
            models_seen: models.len(),
            models_succeeded: 0,
            predictions_written: 0,
            skipped: 0,
        };

        for model in &models {
            if !self.flag.is_running() {
                info!("Forecast cycle interrupted by shutdown");
                break;
            }

            match self.process_model(model, forecast_time).await {
                Ok(ModelOutcome::Written { rows, source }) => {
                    debug!(model_id = model.model_id, rows, ?source, "Model forecast stored");
                    report.models_succeeded += 1;
                    report.predictions_written += rows;
                }
                Ok(ModelOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        model_id = model.model_id,
                        tag = %model.tag_name,
                        %forecast_time,
                        error = %e,
                        "Model failed this cycle"
                    );
                    report.skipped += 1;
                }
            }
        }

        info!(
            %forecast_time,
            succeeded = report.models_succeeded,
            skipped = report.skipped,
            written = report.predictions_written,
            "Forecast cycle complete"
        );
        Ok(report)
    }

    async fn process_model(
        &self,
        model: &ModelDescriptor,
        forecast_time: DateTime<Utc>,
    ) -> Result<ModelOutcome> {
        let horizons = resolve_horizons(
            model.model_id,
            model.pipeline_config.as_deref(),
            &self.config.default_horizons,
        );

        let Some(reference) = self.store.reference_bucket(&model.tag_name, forecast_time).await?
        else {
            warn!(
                model_id = model.model_id,
                tag = %model.tag_name,
                %forecast_time,
                "No reference value at or before forecast time, skipping"
            );
            return Ok(ModelOutcome::Skipped);
        };

        let loaded = match load_for(model).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(model_id = model.model_id, tag = %model.tag_name, error = %e, "Model load failed, skipping");
                return Ok(ModelOutcome::Skipped);
            }
        };

        let banded = self.banded_forecast(model, &loaded, reference.value, horizons.len()).await;
        let rows = prediction_rows(model, forecast_time, &horizons, &banded)?;
        let written = self.store.insert_predictions(&rows).await?;

        self.refresh_player_cache(model, forecast_time, reference).await;

        Ok(ModelOutcome::Written {
            rows: written,
            source: banded.source,
        })
    }

    /// Invoke the model and attach bounds at the storage level, degrading to
    /// persistence when the model fails or returns malformed output
    pub async fn banded_forecast(
        &self,
        descriptor: &ModelDescriptor,
        model: &ModelBlob,
        last_value: f64,
        steps: usize,
    ) -> BandedForecast {
        let level = self.ci_level();
        let forecast = match model.predict(steps, &self.config.confidence_levels).await {
            Ok(forecast) => forecast,
            Err(e) => {
                warn!(model_id = descriptor.model_id, error = %e, "Prediction failed, using persistence (degraded)");
                return BandedForecast::degraded(last_value, steps);
            }
        };
        if let Err(e) = forecast.validate(steps, level) {
            warn!(model_id = descriptor.model_id, error = %e, "Malformed model output, using persistence (degraded)");
            return BandedForecast::degraded(last_value, steps);
        }

        if let Some(bounds) = forecast.intervals.as_ref().and_then(|i| i.bounds(level)) {
            return BandedForecast {
                lower: bounds.lower.clone(),
                upper: bounds.upper.clone(),
                values: forecast.values,
                source: IntervalSource::Native,
            };
        }

        if let ModelBlob::Xgboost(lag_model) = model {
            if !lag_model.calibration_errors.is_empty() {
                match conformal_bounds(&lag_model.calibration_errors, level, &forecast.values) {
                    Ok((lower, upper)) => {
                        return BandedForecast {
                            values: forecast.values,
                            lower,
                            upper,
                            source: IntervalSource::Conformal,
                        }
                    }
                    Err(e) => warn!(
                        model_id = descriptor.model_id,
                        error = %e,
                        "Stored calibration errors unusable"
                    ),
                }
            }
        }

        warn!(
            model_id = descriptor.model_id,
            family = %model.family(),
            "No native intervals, using approximate ±10% band"
        );
        BandedForecast::approximate(forecast.values)
    }

    async fn refresh_player_cache(&self, model: &ModelDescriptor, forecast_time: DateTime<Utc>, present: Reading) {
        if let Err(e) = self.write_player_cache(model, forecast_time, present).await {
            warn!(model_id = model.model_id, %forecast_time, error = %e, "Player cache refresh failed");
        }
    }

    async fn write_player_cache(
        &self,
        model: &ModelDescriptor,
        forecast_time: DateTime<Utc>,
        present: Reading,
    ) -> Result<()> {
        let snapshot = build_snapshot(
            self.store.as_ref(),
            &self.config,
            model.model_id,
            &model.tag_name,
            forecast_time,
            present,
        )
        .await?;
        self.store.upsert_player_cache(&snapshot).await
    }
}

fn conformal_bounds(scores: &[f64], level: u32, values: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut conformal = ConformalPrediction::new(vec![level])?;
    conformal.fit_scores(scores.to_vec())?;
    let intervals = conformal.generate(values)?;
    let bounds = intervals.bounds(level).ok_or_else(|| {
        PipelineError::Prediction(format!("conformal generator returned no {}% bounds", level))
    })?;
    Ok((bounds.lower.clone(), bounds.upper.clone()))
}

/// One row per horizon; step i of the forecast targets horizons[i]
fn prediction_rows(
    model: &ModelDescriptor,
    forecast_time: DateTime<Utc>,
    horizons: &[u32],
    banded: &BandedForecast,
) -> Result<Vec<NewPrediction>> {
    if banded.values.len() != horizons.len() {
        return Err(PipelineError::Prediction(format!(
            "{} forecast steps for {} horizons",
            banded.values.len(),
            horizons.len()
        )));
    }

    horizons
        .iter()
        .enumerate()
        .map(|(i, &horizon)| {
            let horizon_minutes = i32::try_from(horizon).map_err(|_| {
                PipelineError::InvalidParameter(format!("horizon {} out of range", horizon))
            })?;
            Ok(NewPrediction {
                model_id: model.model_id,
                tag_name: model.tag_name.clone(),
                forecast_time,
                target_time: forecast_time + Duration::minutes(horizon as i64),
                horizon_minutes,
                predicted_value: banded.values[i],
                ci_lower: banded.lower[i],
                ci_upper: banded.upper[i],
            })
        })
        .collect()
}

#[async_trait]
impl Stage for ForecastScheduler {
    fn name(&self) -> &'static str {
        "forecast"
    }

    fn run_flag(&self) -> &RunFlag {
        &self.flag
    }

    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<()> {
        self.run_once(now).await.map(|_| ())
    }
}
