//! In-process datastore with the same semantics as the PostgreSQL tables.
//! Used for tests and offline replay.

use super::{ForecastStore, GOOD_QUALITY};
use crate::error::{PipelineError, Result};
use crate::records::{
    ActualUpdate, CompletedPrediction, CompletedQuery, MatchedReading, ModelDescriptor,
    NewPrediction, PendingPrediction, PendingQuery, PerformanceSummary, PlayerCacheSnapshot,
    Prediction, Reading, TrainingEvaluation,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

fn distance(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    if a >= b {
        a - b
    } else {
        b - a
    }
}

/// Nearest reading with a value within `tolerance` of `target`, earlier on ties
fn nearest(
    readings: &[RawReading],
    target: DateTime<Utc>,
    tolerance: Duration,
) -> Option<(DateTime<Utc>, f64)> {
    readings
        .iter()
        .filter(|r| GOOD_QUALITY.contains(&r.quality))
        .filter(|r| distance(r.ts, target) <= tolerance)
        .filter_map(|r| Some((r.ts, r.value?)))
        .min_by_key(|(ts, _)| (distance(*ts, target), *ts))
}

#[derive(Debug, Clone, Copy)]
struct RawReading {
    ts: DateTime<Utc>,
    /// `influx_hist.value` is nullable
    value: Option<f64>,
    quality: i32,
}

#[derive(Debug, Default)]
struct Tables {
    models: Vec<ModelDescriptor>,
    buckets: HashMap<String, BTreeMap<DateTime<Utc>, f64>>,
    readings: HashMap<String, Vec<RawReading>>,
    predictions: Vec<Prediction>,
    next_prediction_id: i64,
    evaluations: Vec<TrainingEvaluation>,
    /// keyed by (evaluation_time, model_id, horizon_minutes)
    summaries: BTreeMap<(DateTime<Utc>, i64, i32), PerformanceSummary>,
    player_cache: BTreeMap<(i64, DateTime<Utc>), PlayerCacheSnapshot>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_actuals: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&self, model: ModelDescriptor) {
        self.tables.lock().models.push(model);
    }

    pub fn add_bucket(&self, tag: &str, bucket: DateTime<Utc>, avg: f64) {
        self.tables
            .lock()
            .buckets
            .entry(tag.to_string())
            .or_default()
            .insert(bucket, avg);
    }

    /// Add a good-quality raw reading
    pub fn add_reading(&self, tag: &str, ts: DateTime<Utc>, value: f64) {
        self.add_reading_with_quality(tag, ts, Some(value), 0);
    }

    pub fn add_reading_with_quality(
        &self,
        tag: &str,
        ts: DateTime<Utc>,
        value: Option<f64>,
        quality: i32,
    ) {
        self.tables
            .lock()
            .readings
            .entry(tag.to_string())
            .or_default()
            .push(RawReading { ts, value, quality });
    }

    /// Add a training evaluation with the placeholder zero actual that
    /// training writes. Returns its id.
    pub fn add_evaluation(
        &self,
        model_id: i64,
        tag: &str,
        target_time: DateTime<Utc>,
        horizon_minutes: i32,
        predicted_value: f64,
    ) -> i64 {
        let mut tables = self.tables.lock();
        let evaluation_id = tables.evaluations.len() as i64 + 1;
        tables.evaluations.push(TrainingEvaluation {
            evaluation_id,
            model_id,
            sensor_tag: tag.to_string(),
            target_time,
            horizon_minutes,
            predicted_value,
            actual_value: Some(0.0),
            prediction_error: None,
            absolute_percentage_error: None,
        });
        evaluation_id
    }

    pub fn evaluations(&self) -> Vec<TrainingEvaluation> {
        self.tables.lock().evaluations.clone()
    }

    /// Make actual-value writes fail, as a dropped connection would
    pub fn fail_actual_writes(&self, fail: bool) {
        self.fail_actuals.store(fail, Ordering::SeqCst);
    }

    pub fn predictions(&self) -> Vec<Prediction> {
        let mut rows = self.tables.lock().predictions.clone();
        rows.sort_by_key(|p| (p.model_id, p.forecast_time, p.horizon_minutes));
        rows
    }

    pub fn summaries(&self) -> Vec<PerformanceSummary> {
        self.tables.lock().summaries.values().cloned().collect()
    }

    pub fn player_cache(&self) -> Vec<PlayerCacheSnapshot> {
        self.tables.lock().player_cache.values().cloned().collect()
    }

    /// Tags that have any bucket data
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.tables.lock().buckets.keys().cloned().collect();
        tags.sort();
        tags
    }
}

#[async_trait]
impl ForecastStore for MemoryStore {
    async fn deployed_models(&self) -> Result<Vec<ModelDescriptor>> {
        Ok(self
            .tables
            .lock()
            .models
            .iter()
            .filter(|m| m.is_live())
            .cloned()
            .collect())
    }

    async fn reference_bucket(&self, tag: &str, at: DateTime<Utc>) -> Result<Option<Reading>> {
        Ok(self.tables.lock().buckets.get(tag).and_then(|series| {
            series
                .range(..=at)
                .next_back()
                .map(|(ts, value)| Reading { ts: *ts, value: *value })
        }))
    }

    async fn buckets_between(
        &self,
        tag: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(self
            .tables
            .lock()
            .buckets
            .get(tag)
            .map(|series| {
                series
                    .range(from..to)
                    .map(|(ts, value)| Reading { ts: *ts, value: *value })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_raw_reading(&self, tag: &str, at: DateTime<Utc>) -> Result<Option<Reading>> {
        Ok(self.tables.lock().readings.get(tag).and_then(|readings| {
            readings
                .iter()
                .filter(|r| r.ts <= at && GOOD_QUALITY.contains(&r.quality))
                .filter_map(|r| Some(Reading { ts: r.ts, value: r.value? }))
                .max_by_key(|r| r.ts)
        }))
    }

    async fn insert_predictions(&self, rows: &[NewPrediction]) -> Result<u64> {
        let mut tables = self.tables.lock();
        let mut inserted = 0;

        for row in rows {
            let exists = tables.predictions.iter().any(|p| {
                p.target_time == row.target_time
                    && p.tag_name == row.tag_name
                    && p.model_id == row.model_id
                    && p.horizon_minutes == row.horizon_minutes
            });
            if exists {
                continue;
            }

            tables.next_prediction_id += 1;
            let prediction_id = tables.next_prediction_id;
            tables.predictions.push(Prediction {
                prediction_id,
                model_id: row.model_id,
                tag_name: row.tag_name.clone(),
                forecast_time: row.forecast_time,
                target_time: row.target_time,
                horizon_minutes: row.horizon_minutes,
                predicted_value: row.predicted_value,
                ci_lower: Some(row.ci_lower),
                ci_upper: Some(row.ci_upper),
                actual_value: None,
                prediction_error: None,
                absolute_percentage_error: None,
                created_at: row.forecast_time,
            });
            inserted += 1;
        }

        Ok(inserted)
    }

    async fn predictions_for_forecast(
        &self,
        model_id: i64,
        forecast_time: DateTime<Utc>,
    ) -> Result<Vec<Prediction>> {
        let mut rows: Vec<Prediction> = self
            .tables
            .lock()
            .predictions
            .iter()
            .filter(|p| p.model_id == model_id && p.forecast_time == forecast_time)
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.target_time, p.horizon_minutes));
        Ok(rows)
    }

    async fn completed_predictions(&self, query: CompletedQuery) -> Result<Vec<CompletedPrediction>> {
        Ok(self
            .tables
            .lock()
            .predictions
            .iter()
            .filter(|p| query.model_id.map_or(true, |id| p.model_id == id))
            .filter(|p| p.forecast_time >= query.forecast_from && p.forecast_time < query.forecast_to)
            .filter(|p| p.actual_value.is_some())
            .filter_map(|p| {
                Some(CompletedPrediction {
                    model_id: p.model_id,
                    tag_name: p.tag_name.clone(),
                    horizon_minutes: p.horizon_minutes,
                    forecast_time: p.forecast_time,
                    prediction_error: p.prediction_error?,
                    absolute_percentage_error: p.absolute_percentage_error,
                })
            })
            .collect())
    }

    async fn upsert_player_cache(&self, snapshot: &PlayerCacheSnapshot) -> Result<()> {
        self.tables
            .lock()
            .player_cache
            .insert((snapshot.model_id, snapshot.forecast_time), snapshot.clone());
        Ok(())
    }

    async fn pending_predictions(&self, query: PendingQuery) -> Result<Vec<PendingPrediction>> {
        let mut rows: Vec<PendingPrediction> = self
            .tables
            .lock()
            .predictions
            .iter()
            .filter(|p| p.actual_value.is_none())
            .filter(|p| p.target_time <= query.now && p.target_time >= query.not_before)
            .filter(|p| {
                query
                    .cursor
                    .map_or(true, |cursor| (p.target_time, p.prediction_id) < cursor)
            })
            .map(|p| PendingPrediction {
                prediction_id: p.prediction_id,
                tag_name: p.tag_name.clone(),
                target_time: p.target_time,
                predicted_value: p.predicted_value,
            })
            .collect();

        rows.sort_by(|a, b| {
            (b.target_time, b.prediction_id).cmp(&(a.target_time, a.prediction_id))
        });
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn nearest_readings(
        &self,
        pending: &[PendingPrediction],
        tolerance: Duration,
    ) -> Result<Vec<MatchedReading>> {
        let tables = self.tables.lock();

        Ok(pending
            .iter()
            .filter_map(|p| {
                nearest(tables.readings.get(&p.tag_name)?, p.target_time, tolerance).map(
                    |(ts, value)| MatchedReading {
                        prediction_id: p.prediction_id,
                        ts,
                        value,
                    },
                )
            })
            .collect())
    }

    async fn apply_actuals(&self, updates: &[ActualUpdate]) -> Result<u64> {
        if self.fail_actuals.load(Ordering::SeqCst) {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset while writing actuals",
            )));
        }

        let mut tables = self.tables.lock();
        let mut updated = 0;
        for update in updates {
            if let Some(row) = tables
                .predictions
                .iter_mut()
                .find(|p| p.prediction_id == update.prediction_id && p.actual_value.is_none())
            {
                row.actual_value = Some(update.actual_value);
                row.prediction_error = Some(update.prediction_error);
                row.absolute_percentage_error = update.absolute_percentage_error;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn backfill_evaluations(
        &self,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<u64> {
        if self.fail_actuals.load(Ordering::SeqCst) {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset while writing training evaluations",
            )));
        }

        let mut guard = self.tables.lock();
        let Tables {
            readings,
            evaluations,
            ..
        } = &mut *guard;

        let mut updated = 0;
        for row in evaluations.iter_mut() {
            if !row.is_pending() || row.target_time > now || row.target_time < not_before {
                continue;
            }
            let Some((_, actual)) = readings
                .get(&row.sensor_tag)
                .and_then(|r| nearest(r, row.target_time, tolerance))
            else {
                continue;
            };

            let update = ActualUpdate::from_values(row.evaluation_id, row.predicted_value, actual);
            row.actual_value = Some(update.actual_value);
            row.prediction_error = Some(update.prediction_error);
            row.absolute_percentage_error = update.absolute_percentage_error;
            updated += 1;
        }
        Ok(updated)
    }

    async fn upsert_performance(&self, rows: &[PerformanceSummary]) -> Result<u64> {
        let mut tables = self.tables.lock();
        for row in rows {
            tables.summaries.insert(
                (row.evaluation_time, row.model_id, row.horizon_minutes),
                row.clone(),
            );
        }
        Ok(rows.len() as u64)
    }

    async fn prune_performance(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock();
        let len = tables.summaries.len();
        tables.summaries.retain(|_, s| s.eval_end_time >= before);
        Ok((len - tables.summaries.len()) as u64)
    }
}
