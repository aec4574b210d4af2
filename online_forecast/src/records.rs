//! Rows read from and written to the forecast datastore

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A trained model registered for online forecasting. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModelDescriptor {
    pub model_id: i64,
    pub tag_name: String,
    /// Registry family string, e.g. `AUTO_ARIMA`
    pub model_type: String,
    pub model_blob: Option<Vec<u8>>,
    /// Legacy on-disk location, used when no blob is stored
    pub model_path: Option<String>,
    pub is_deployed: bool,
    pub is_active: bool,
    /// Raw pipeline configuration JSON
    pub pipeline_config: Option<String>,
}

impl ModelDescriptor {
    pub fn is_live(&self) -> bool {
        self.is_deployed && self.is_active
    }
}

/// A sensor reading, either raw history or a 10-minute bucket average
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub ts: DateTime<Utc>,
    pub value: f64,
}

/// A prediction to insert; conflicts on (target_time, tag, model, horizon)
/// are ignored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrediction {
    pub model_id: i64,
    pub tag_name: String,
    pub forecast_time: DateTime<Utc>,
    pub target_time: DateTime<Utc>,
    pub horizon_minutes: i32,
    pub predicted_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// A stored prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Prediction {
    pub prediction_id: i64,
    pub model_id: i64,
    pub tag_name: String,
    pub forecast_time: DateTime<Utc>,
    pub target_time: DateTime<Utc>,
    pub horizon_minutes: i32,
    pub predicted_value: f64,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
    pub actual_value: Option<f64>,
    pub prediction_error: Option<f64>,
    pub absolute_percentage_error: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// A prediction whose target time has passed but has no actual yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingPrediction {
    pub prediction_id: i64,
    pub tag_name: String,
    pub target_time: DateTime<Utc>,
    pub predicted_value: f64,
}

/// Selection of pending predictions for one backfill batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingQuery {
    pub now: DateTime<Utc>,
    /// Oldest target time still eligible
    pub not_before: DateTime<Utc>,
    /// Keyset cursor: only rows strictly before this (target_time, id)
    pub cursor: Option<(DateTime<Utc>, i64)>,
    pub limit: usize,
}

/// The good-quality reading closest to a pending prediction's target time
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct MatchedReading {
    pub prediction_id: i64,
    pub ts: DateTime<Utc>,
    pub value: f64,
}

/// Backfilled outcome for one prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActualUpdate {
    pub prediction_id: i64,
    pub actual_value: f64,
    pub prediction_error: f64,
    pub absolute_percentage_error: Option<f64>,
}

impl ActualUpdate {
    pub fn new(prediction: &PendingPrediction, actual_value: f64) -> Self {
        Self::from_values(prediction.prediction_id, prediction.predicted_value, actual_value)
    }

    /// Errors for any row keyed by `id`, prediction or training evaluation
    pub fn from_values(id: i64, predicted_value: f64, actual_value: f64) -> Self {
        Self {
            prediction_id: id,
            actual_value,
            prediction_error: predicted_value - actual_value,
            absolute_percentage_error: interval_math::absolute_percentage_error(
                predicted_value,
                actual_value,
            ),
        }
    }
}

/// Backtest prediction saved when a model was trained.
///
/// Training writes `actual_value = 0` as a placeholder, so a row is pending
/// while its actual is null or still that placeholder with no error
/// recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrainingEvaluation {
    pub evaluation_id: i64,
    pub model_id: i64,
    pub sensor_tag: String,
    pub target_time: DateTime<Utc>,
    pub horizon_minutes: i32,
    pub predicted_value: f64,
    pub actual_value: Option<f64>,
    pub prediction_error: Option<f64>,
    pub absolute_percentage_error: Option<f64>,
}

impl TrainingEvaluation {
    pub fn is_pending(&self) -> bool {
        match self.actual_value {
            None => true,
            Some(actual) => actual == 0.0 && self.prediction_error.is_none(),
        }
    }
}

/// Selection of predictions with actuals, by forecast time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletedQuery {
    pub model_id: Option<i64>,
    /// Inclusive
    pub forecast_from: DateTime<Utc>,
    /// Exclusive
    pub forecast_to: DateTime<Utc>,
}

/// A prediction that already has its actual value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CompletedPrediction {
    pub model_id: i64,
    pub tag_name: String,
    pub horizon_minutes: i32,
    pub forecast_time: DateTime<Utc>,
    pub prediction_error: f64,
    pub absolute_percentage_error: Option<f64>,
}

/// Hourly accuracy rollup for one (model, horizon)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PerformanceSummary {
    pub evaluation_time: DateTime<Utc>,
    pub model_id: i64,
    pub tag_name: String,
    pub horizon_minutes: i32,
    pub num_predictions: i32,
    pub mae: f64,
    pub mape: Option<f64>,
    pub rmse: f64,
    pub eval_start_time: DateTime<Utc>,
    pub eval_end_time: DateTime<Utc>,
}

/// One point of the player cache rolling window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WindowPoint {
    Past {
        ts: DateTime<Utc>,
        value: f64,
    },
    Present {
        ts: DateTime<Utc>,
        value: f64,
    },
    Future {
        ts: DateTime<Utc>,
        value: f64,
        ci_lower: Option<f64>,
        ci_upper: Option<f64>,
        horizon_minutes: i32,
    },
}

/// Near-term prediction row shown next to the chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPredictionRow {
    pub target_time: DateTime<Utc>,
    pub horizon_minutes: i32,
    pub predicted_value: f64,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
}

/// Denormalized view for a dashboard, fully derived from the tables above
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCacheSnapshot {
    pub model_id: i64,
    pub tag_name: String,
    pub forecast_time: DateTime<Utc>,
    pub reference_time: DateTime<Utc>,
    pub rolling_window: Vec<WindowPoint>,
    pub predictions: Vec<PlayerPredictionRow>,
    pub mae: Option<f64>,
    pub mape: Option<f64>,
    pub rmse: Option<f64>,
    pub accuracy: Option<f64>,
    pub next_forecast_at: DateTime<Utc>,
    pub latest_value: Option<f64>,
}
