//! PostgreSQL implementation of [`ForecastStore`]
//!
//! Batch statements pass their rows as parallel arrays through `UNNEST`, so
//! each batch is one round trip. Backfill and aggregation statements run in
//! a transaction with `SET LOCAL statement_timeout`.

use super::ForecastStore;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::records::{
    ActualUpdate, CompletedPrediction, CompletedQuery, MatchedReading, ModelDescriptor,
    NewPrediction, PendingPrediction, PendingQuery, PerformanceSummary, PlayerCacheSnapshot,
    Prediction, Reading,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

pub struct PgForecastStore {
    pool: PgPool,
    backfill_timeout: std::time::Duration,
    aggregate_timeout: std::time::Duration,
}

impl PgForecastStore {
    pub fn new(pool: PgPool, config: &PipelineConfig) -> Self {
        Self {
            pool,
            backfill_timeout: std::time::Duration::from_secs(config.backfill_statement_timeout_secs),
            aggregate_timeout: std::time::Duration::from_secs(
                config.aggregate_statement_timeout_secs,
            ),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction whose statements are cancelled after `timeout`
    async fn begin_bounded(&self, timeout: std::time::Duration) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        // SET does not take bind parameters; the value is an integer we format
        let statement = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
        sqlx::query(&statement).execute(&mut *tx).await?;
        Ok(tx)
    }

    fn reading_from_row(row: &sqlx::postgres::PgRow, ts_column: &str) -> Result<Reading> {
        Ok(Reading {
            ts: row.try_get(ts_column)?,
            value: row.try_get("value")?,
        })
    }
}

#[async_trait]
impl ForecastStore for PgForecastStore {
    #[tracing::instrument(skip(self))]
    async fn deployed_models(&self) -> Result<Vec<ModelDescriptor>> {
        let models = sqlx::query_as::<_, ModelDescriptor>(
            r#"
            SELECT model_id, tag_name, model_type, model_blob, model_path,
                   is_deployed, is_active, pipeline_config::text AS pipeline_config
            FROM model_registry
            WHERE is_deployed = TRUE AND is_active = TRUE
            ORDER BY model_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(models)
    }

    #[tracing::instrument(skip(self))]
    async fn reference_bucket(&self, tag: &str, at: DateTime<Utc>) -> Result<Option<Reading>> {
        let row = sqlx::query(
            r#"
            SELECT bucket, avg::float8 AS value
            FROM influx_agg_10m
            WHERE tag_name = $1 AND bucket <= $2 AND avg IS NOT NULL
            ORDER BY bucket DESC
            LIMIT 1
            "#,
        )
        .bind(tag)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::reading_from_row(&row, "bucket")).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn buckets_between(
        &self,
        tag: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        let rows = sqlx::query(
            r#"
            SELECT bucket, avg::float8 AS value
            FROM influx_agg_10m
            WHERE tag_name = $1 AND bucket >= $2 AND bucket < $3 AND avg IS NOT NULL
            ORDER BY bucket
            "#,
        )
        .bind(tag)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::reading_from_row(row, "bucket"))
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn latest_raw_reading(&self, tag: &str, at: DateTime<Utc>) -> Result<Option<Reading>> {
        let row = sqlx::query(
            r#"
            SELECT ts, value::float8 AS value
            FROM influx_hist
            WHERE tag_name = $1 AND ts <= $2 AND quality IN (0, 192) AND value IS NOT NULL
            ORDER BY ts DESC
            LIMIT 1
            "#,
        )
        .bind(tag)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::reading_from_row(&row, "ts")).transpose()
    }

    #[tracing::instrument(skip_all, fields(rows = rows.len()))]
    async fn insert_predictions(&self, rows: &[NewPrediction]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO predictions (
                model_id, tag_name, forecast_time, target_time, horizon_minutes,
                predicted_value, ci_lower, ci_upper
            )
            SELECT * FROM UNNEST(
                $1::bigint[], $2::text[], $3::timestamptz[], $4::timestamptz[], $5::int[],
                $6::float8[], $7::float8[], $8::float8[]
            )
            ON CONFLICT (target_time, tag_name, model_id, horizon_minutes) DO NOTHING
            "#,
        )
        .bind(rows.iter().map(|r| r.model_id).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.tag_name.clone()).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.forecast_time).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.target_time).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.horizon_minutes).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.predicted_value).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.ci_lower).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.ci_upper).collect::<Vec<_>>())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self))]
    async fn predictions_for_forecast(
        &self,
        model_id: i64,
        forecast_time: DateTime<Utc>,
    ) -> Result<Vec<Prediction>> {
        let rows = sqlx::query_as::<_, Prediction>(
            r#"
            SELECT prediction_id, model_id, tag_name, forecast_time, target_time, horizon_minutes,
                   predicted_value, ci_lower, ci_upper, actual_value, prediction_error,
                   absolute_percentage_error, created_at
            FROM predictions
            WHERE model_id = $1 AND forecast_time = $2
            ORDER BY target_time, horizon_minutes
            "#,
        )
        .bind(model_id)
        .bind(forecast_time)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    #[tracing::instrument(skip(self))]
    async fn completed_predictions(&self, query: CompletedQuery) -> Result<Vec<CompletedPrediction>> {
        let mut tx = self.begin_bounded(self.aggregate_timeout).await?;
        let rows = sqlx::query_as::<_, CompletedPrediction>(
            r#"
            SELECT model_id, tag_name, horizon_minutes, forecast_time,
                   prediction_error, absolute_percentage_error
            FROM predictions
            WHERE actual_value IS NOT NULL
              AND prediction_error IS NOT NULL
              AND forecast_time >= $1
              AND forecast_time < $2
              AND ($3::bigint IS NULL OR model_id = $3)
            "#,
        )
        .bind(query.forecast_from)
        .bind(query.forecast_to)
        .bind(query.model_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(rows)
    }

    #[tracing::instrument(skip_all, fields(model_id = snapshot.model_id, forecast_time = %snapshot.forecast_time))]
    async fn upsert_player_cache(&self, snapshot: &PlayerCacheSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO forecast_player_cache (
                model_id, tag_name, forecast_time, reference_time, rolling_window,
                predictions_data, mape, rmse, mae, accuracy, next_forecast_at, latest_value
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (model_id, forecast_time) DO UPDATE SET
                reference_time = EXCLUDED.reference_time,
                rolling_window = EXCLUDED.rolling_window,
                predictions_data = EXCLUDED.predictions_data,
                mape = EXCLUDED.mape,
                rmse = EXCLUDED.rmse,
                mae = EXCLUDED.mae,
                accuracy = EXCLUDED.accuracy,
                next_forecast_at = EXCLUDED.next_forecast_at,
                latest_value = EXCLUDED.latest_value
            "#,
        )
        .bind(snapshot.model_id)
        .bind(&snapshot.tag_name)
        .bind(snapshot.forecast_time)
        .bind(snapshot.reference_time)
        .bind(Json(&snapshot.rolling_window))
        .bind(Json(&snapshot.predictions))
        .bind(snapshot.mape)
        .bind(snapshot.rmse)
        .bind(snapshot.mae)
        .bind(snapshot.accuracy)
        .bind(snapshot.next_forecast_at)
        .bind(snapshot.latest_value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn pending_predictions(&self, query: PendingQuery) -> Result<Vec<PendingPrediction>> {
        let (cursor_time, cursor_id) = match query.cursor {
            Some((time, id)) => (Some(time), Some(id)),
            None => (None, None),
        };

        let mut tx = self.begin_bounded(self.backfill_timeout).await?;
        let rows = sqlx::query_as::<_, PendingPrediction>(
            r#"
            SELECT prediction_id, tag_name, target_time, predicted_value
            FROM predictions
            WHERE actual_value IS NULL
              AND target_time <= $1
              AND target_time >= $2
              AND ($3::timestamptz IS NULL OR (target_time, prediction_id) < ($3, $4))
            ORDER BY target_time DESC, prediction_id DESC
            LIMIT $5
            "#,
        )
        .bind(query.now)
        .bind(query.not_before)
        .bind(cursor_time)
        .bind(cursor_id)
        .bind(query.limit as i64)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(rows)
    }

    #[tracing::instrument(skip_all, fields(pending = pending.len()))]
    async fn nearest_readings(
        &self,
        pending: &[PendingPrediction],
        tolerance: Duration,
    ) -> Result<Vec<MatchedReading>> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.begin_bounded(self.backfill_timeout).await?;
        let rows = sqlx::query_as::<_, MatchedReading>(
            r#"
            SELECT DISTINCT ON (p.prediction_id)
                   p.prediction_id, h.ts, h.value::float8 AS value
            FROM UNNEST($1::bigint[], $2::text[], $3::timestamptz[])
                 AS p(prediction_id, tag_name, target_time)
            JOIN influx_hist h
              ON h.tag_name = p.tag_name
             AND h.ts BETWEEN p.target_time - make_interval(secs => $4)
                          AND p.target_time + make_interval(secs => $4)
             AND h.quality IN (0, 192)
             AND h.value IS NOT NULL
            ORDER BY p.prediction_id,
                     ABS(EXTRACT(EPOCH FROM (h.ts - p.target_time))),
                     h.ts
            "#,
        )
        .bind(pending.iter().map(|p| p.prediction_id).collect::<Vec<_>>())
        .bind(pending.iter().map(|p| p.tag_name.clone()).collect::<Vec<_>>())
        .bind(pending.iter().map(|p| p.target_time).collect::<Vec<_>>())
        .bind(tolerance.num_milliseconds() as f64 / 1000.0)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(rows)
    }

    #[tracing::instrument(skip_all, fields(updates = updates.len()))]
    async fn apply_actuals(&self, updates: &[ActualUpdate]) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        // dropping the transaction on error rolls the whole batch back
        let mut tx = self.begin_bounded(self.backfill_timeout).await?;
        let result = sqlx::query(
            r#"
            UPDATE predictions AS p
            SET actual_value = u.actual_value,
                prediction_error = u.prediction_error,
                absolute_percentage_error = u.absolute_percentage_error
            FROM UNNEST($1::bigint[], $2::float8[], $3::float8[], $4::float8[])
                 AS u(prediction_id, actual_value, prediction_error, absolute_percentage_error)
            WHERE p.prediction_id = u.prediction_id
              AND p.actual_value IS NULL
            "#,
        )
        .bind(updates.iter().map(|u| u.prediction_id).collect::<Vec<_>>())
        .bind(updates.iter().map(|u| u.actual_value).collect::<Vec<_>>())
        .bind(updates.iter().map(|u| u.prediction_error).collect::<Vec<_>>())
        .bind(
            updates
                .iter()
                .map(|u| u.absolute_percentage_error)
                .collect::<Vec<_>>(),
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self))]
    async fn backfill_evaluations(
        &self,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<u64> {
        let mut tx = self.begin_bounded(self.backfill_timeout).await?;
        let result = sqlx::query(
            r#"
            WITH matched AS (
                SELECT DISTINCT ON (te.evaluation_id)
                       te.evaluation_id,
                       h.value::float8 AS actual_value,
                       (te.predicted_value - h.value)::float8 AS prediction_error,
                       CASE WHEN h.value <> 0
                            THEN (ABS((te.predicted_value - h.value) / h.value) * 100)::float8
                       END AS absolute_percentage_error
                FROM training_evaluation te
                JOIN influx_hist h
                  ON h.tag_name = te.sensor_tag
                 AND h.ts BETWEEN te.target_time - make_interval(secs => $3)
                              AND te.target_time + make_interval(secs => $3)
                 AND h.quality IN (0, 192)
                 AND h.value IS NOT NULL
                WHERE te.target_time <= $1
                  AND te.target_time >= $2
                  AND (te.actual_value IS NULL
                       OR (te.actual_value = 0 AND te.prediction_error IS NULL))
                ORDER BY te.evaluation_id,
                         ABS(EXTRACT(EPOCH FROM (h.ts - te.target_time))),
                         h.ts
            )
            UPDATE training_evaluation te
            SET actual_value = m.actual_value,
                prediction_error = m.prediction_error,
                absolute_percentage_error = m.absolute_percentage_error
            FROM matched m
            WHERE te.evaluation_id = m.evaluation_id
            "#,
        )
        .bind(now)
        .bind(not_before)
        .bind(tolerance.num_milliseconds() as f64 / 1000.0)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip_all, fields(rows = rows.len()))]
    async fn upsert_performance(&self, rows: &[PerformanceSummary]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.begin_bounded(self.aggregate_timeout).await?;
        let result = sqlx::query(
            r#"
            INSERT INTO prediction_performance (
                evaluation_time, model_id, tag_name, horizon_minutes, num_predictions,
                mae, mape, rmse, eval_start_time, eval_end_time
            )
            SELECT * FROM UNNEST(
                $1::timestamptz[], $2::bigint[], $3::text[], $4::int[], $5::int[],
                $6::float8[], $7::float8[], $8::float8[], $9::timestamptz[], $10::timestamptz[]
            )
            ON CONFLICT (evaluation_time, model_id, horizon_minutes) DO UPDATE SET
                tag_name = EXCLUDED.tag_name,
                num_predictions = EXCLUDED.num_predictions,
                mae = EXCLUDED.mae,
                mape = EXCLUDED.mape,
                rmse = EXCLUDED.rmse,
                eval_start_time = EXCLUDED.eval_start_time,
                eval_end_time = EXCLUDED.eval_end_time
            "#,
        )
        .bind(rows.iter().map(|r| r.evaluation_time).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.model_id).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.tag_name.clone()).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.horizon_minutes).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.num_predictions).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.mae).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.mape).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.rmse).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.eval_start_time).collect::<Vec<_>>())
        .bind(rows.iter().map(|r| r.eval_end_time).collect::<Vec<_>>())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self))]
    async fn prune_performance(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM prediction_performance WHERE eval_end_time < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
