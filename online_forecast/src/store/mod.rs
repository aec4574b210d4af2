//! Datastore access for the schedulers
//!
//! All coordination between the schedulers goes through this trait. Every
//! write is an insert-ignore, an upsert, or an update guarded so a row is
//! written at most once, which keeps re-runs and overlapping cycles safe.

use crate::error::Result;
use crate::records::{
    ActualUpdate, CompletedPrediction, CompletedQuery, MatchedReading, ModelDescriptor,
    NewPrediction, PendingPrediction, PendingQuery, PerformanceSummary, PlayerCacheSnapshot,
    Prediction, Reading,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

pub mod memory;
pub mod pool;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgForecastStore;

/// Raw sensor quality codes treated as good readings
pub const GOOD_QUALITY: [i32; 2] = [0, 192];

#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Models that are both deployed and active
    async fn deployed_models(&self) -> Result<Vec<ModelDescriptor>>;

    /// Latest 10-minute bucket average at or before `at`
    async fn reference_bucket(&self, tag: &str, at: DateTime<Utc>) -> Result<Option<Reading>>;

    /// Bucket averages with `from <= bucket < to`, oldest first
    async fn buckets_between(
        &self,
        tag: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>>;

    /// Latest good-quality raw reading at or before `at`. Readings with a
    /// NULL value are skipped.
    async fn latest_raw_reading(&self, tag: &str, at: DateTime<Utc>) -> Result<Option<Reading>>;

    /// Insert predictions, ignoring rows that already exist. Returns the
    /// number of rows actually inserted.
    async fn insert_predictions(&self, rows: &[NewPrediction]) -> Result<u64>;

    /// Predictions made by one model at one forecast time, by target time
    async fn predictions_for_forecast(
        &self,
        model_id: i64,
        forecast_time: DateTime<Utc>,
    ) -> Result<Vec<Prediction>>;

    /// Predictions with actual values whose forecast time falls in the query
    /// window
    async fn completed_predictions(&self, query: CompletedQuery) -> Result<Vec<CompletedPrediction>>;

    /// Insert or replace the snapshot for (model, forecast_time)
    async fn upsert_player_cache(&self, snapshot: &PlayerCacheSnapshot) -> Result<()>;

    /// Predictions due for backfill, newest target first
    async fn pending_predictions(&self, query: PendingQuery) -> Result<Vec<PendingPrediction>>;

    /// For each pending prediction, the good-quality raw reading nearest its
    /// target time within `tolerance`. Ties go to the earlier reading and
    /// readings with a NULL value never match.
    /// Predictions without a reading in range are absent from the result.
    async fn nearest_readings(
        &self,
        pending: &[PendingPrediction],
        tolerance: Duration,
    ) -> Result<Vec<MatchedReading>>;

    /// Write actual values as one unit. Rows that already have an actual are
    /// left untouched. Returns the number of rows updated.
    async fn apply_actuals(&self, updates: &[ActualUpdate]) -> Result<u64>;

    /// Fill pending training evaluations with target_time in
    /// `[not_before, now]` from the nearest good-quality reading within
    /// `tolerance`, matched like [`ForecastStore::nearest_readings`]. Runs as
    /// one unit. Returns the number of rows updated.
    async fn backfill_evaluations(
        &self,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<u64>;

    /// Insert or replace summaries keyed by (evaluation_time, model, horizon)
    async fn upsert_performance(&self, rows: &[PerformanceSummary]) -> Result<u64>;

    /// Delete summaries whose evaluation window ended before `before`
    async fn prune_performance(&self, before: DateTime<Utc>) -> Result<u64>;
}
