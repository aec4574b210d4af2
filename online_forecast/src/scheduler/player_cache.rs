//! Denormalized snapshot for the forecast player view
//!
//! Rebuilt after every successful forecast. Everything in it is derived from
//! bucket history, the predictions just written, and completed predictions
//! from the recent metrics window.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::records::{
    CompletedQuery, PlayerCacheSnapshot, PlayerPredictionRow, Reading, WindowPoint,
};
use crate::store::ForecastStore;
use chrono::{DateTime, Duration, Utc};
use interval_math::{AccuracyMetrics, MathError};

/// Build the snapshot for one model at `forecast_time`. `present` is the
/// reference bucket the forecast started from.
pub async fn build_snapshot(
    store: &dyn ForecastStore,
    config: &PipelineConfig,
    model_id: i64,
    tag_name: &str,
    forecast_time: DateTime<Utc>,
    present: Reading,
) -> Result<PlayerCacheSnapshot> {
    let cycle = Duration::seconds(config.cycle_secs as i64);
    let lookback = cycle * config.rolling_window_intervals as i32;

    let past = store
        .buckets_between(tag_name, present.ts - lookback, present.ts)
        .await?;
    let future = store.predictions_for_forecast(model_id, forecast_time).await?;

    let skip = past.len().saturating_sub(config.rolling_window_intervals);
    let mut rolling_window: Vec<WindowPoint> = past[skip..]
        .iter()
        .map(|r| WindowPoint::Past {
            ts: r.ts,
            value: r.value,
        })
        .collect();
    rolling_window.push(WindowPoint::Present {
        ts: present.ts,
        value: present.value,
    });
    rolling_window.extend(future.iter().map(|p| WindowPoint::Future {
        ts: p.target_time,
        value: p.predicted_value,
        ci_lower: p.ci_lower,
        ci_upper: p.ci_upper,
        horizon_minutes: p.horizon_minutes,
    }));

    let predictions = future
        .iter()
        .take(config.player_cache_rows)
        .map(|p| PlayerPredictionRow {
            target_time: p.target_time,
            horizon_minutes: p.horizon_minutes,
            predicted_value: p.predicted_value,
            ci_lower: p.ci_lower,
            ci_upper: p.ci_upper,
        })
        .collect();

    let metrics = recent_metrics(store, config, model_id, forecast_time).await?;
    let latest = store.latest_raw_reading(tag_name, forecast_time).await?;

    Ok(PlayerCacheSnapshot {
        model_id,
        tag_name: tag_name.to_string(),
        forecast_time,
        reference_time: latest.map_or(forecast_time, |r| r.ts),
        rolling_window,
        predictions,
        mae: metrics.map(|m| m.mae),
        mape: metrics.and_then(|m| m.mape),
        rmse: metrics.map(|m| m.rmse),
        accuracy: metrics.and_then(|m| m.accuracy()).map(|a| (a * 100.0).round() / 100.0),
        next_forecast_at: forecast_time + cycle,
        latest_value: latest.map(|r| r.value),
    })
}

/// Accuracy over completed predictions from the metrics window, rounded to
/// two decimals. `None` when nothing has completed yet.
async fn recent_metrics(
    store: &dyn ForecastStore,
    config: &PipelineConfig,
    model_id: i64,
    forecast_time: DateTime<Utc>,
) -> Result<Option<AccuracyMetrics>> {
    let completed = store
        .completed_predictions(CompletedQuery {
            model_id: Some(model_id),
            forecast_from: forecast_time - Duration::hours(config.metrics_window_hours as i64),
            forecast_to: forecast_time,
        })
        .await?;

    let errors: Vec<f64> = completed.iter().map(|c| c.prediction_error).collect();
    let percentage_errors: Vec<f64> = completed
        .iter()
        .filter_map(|c| c.absolute_percentage_error)
        .collect();

    match AccuracyMetrics::from_errors(&errors, &percentage_errors) {
        Ok(metrics) => Ok(Some(metrics.rounded())),
        Err(MathError::InsufficientData(_)) => Ok(None),
        Err(e) => Err(PipelineError::Math(e)),
    }
}
