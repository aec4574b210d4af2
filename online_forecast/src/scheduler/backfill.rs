//! Fill in actual values once a prediction's target time has passed

use super::{RunFlag, Stage};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::records::{ActualUpdate, PendingQuery};
use crate::store::ForecastStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one backfill cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub batches: usize,
    /// Pending predictions selected across all batches
    pub examined: usize,
    pub updated: u64,
    /// Selected predictions with no reading inside the tolerance window
    pub unmatched: usize,
    /// Training evaluations filled after the prediction batches
    pub evaluations_updated: u64,
    /// The cycle ended early on a store error or shutdown
    pub aborted: bool,
}

pub struct ActualValueUpdater {
    store: Arc<dyn ForecastStore>,
    config: PipelineConfig,
    flag: RunFlag,
}

impl ActualValueUpdater {
    pub fn new(store: Arc<dyn ForecastStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            flag: RunFlag::default(),
        }
    }

    /// Backfill up to `backfill_max_batches` batches of due predictions.
    ///
    /// Batches walk backwards from the newest target time with a keyset
    /// cursor, so rows that cannot be matched yet do not block older ones.
    /// Unmatched and unprocessed rows stay eligible for the next cycle.
    /// Training evaluations are filled afterwards in a single pass, even when
    /// a prediction batch failed.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<BackfillReport> {
        let batch_size = self.config.backfill_batch_size;
        let tolerance = self.config.backfill_tolerance();
        let not_before = now - self.config.backfill_lookback();

        let mut report = BackfillReport::default();
        let mut cursor = None;

        for batch in 1..=self.config.backfill_max_batches {
            if !self.flag.is_running() {
                info!(batch, "Backfill interrupted by shutdown");
                report.aborted = true;
                break;
            }

            match self.run_batch(now, not_before, cursor, tolerance).await {
                Ok(None) => break,
                Ok(Some(outcome)) => {
                    report.batches += 1;
                    report.examined += outcome.selected;
                    report.updated += outcome.updated;
                    report.unmatched += outcome.unmatched;
                    cursor = Some(outcome.cursor);

                    debug!(
                        batch,
                        selected = outcome.selected,
                        updated = outcome.updated,
                        unmatched = outcome.unmatched,
                        "Backfill batch committed"
                    );
                    if outcome.selected < batch_size {
                        break;
                    }
                }
                Err(e) => {
                    error!(batch, error = %e, "Backfill batch failed and was rolled back");
                    report.aborted = true;
                    break;
                }
            }
        }

        if self.flag.is_running() {
            match self
                .store
                .backfill_evaluations(now, not_before, tolerance)
                .await
            {
                Ok(updated) => report.evaluations_updated = updated,
                Err(e) => {
                    error!(error = %e, "Training evaluation backfill failed and was rolled back");
                    report.aborted = true;
                }
            }
        }

        info!(
            batches = report.batches,
            updated = report.updated,
            evaluations_updated = report.evaluations_updated,
            unmatched = report.unmatched,
            "Backfill cycle complete"
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
        cursor: Option<(DateTime<Utc>, i64)>,
        tolerance: chrono::Duration,
    ) -> Result<Option<BatchOutcome>> {
        let pending = self
            .store
            .pending_predictions(PendingQuery {
                now,
                not_before,
                cursor,
                limit: self.config.backfill_batch_size,
            })
            .await?;
        let Some(last) = pending.last() else {
            return Ok(None);
        };
        let next_cursor = (last.target_time, last.prediction_id);

        let readings: HashMap<i64, f64> = self
            .store
            .nearest_readings(&pending, tolerance)
            .await?
            .into_iter()
            .map(|m| (m.prediction_id, m.value))
            .collect();

        let updates: Vec<ActualUpdate> = pending
            .iter()
            .filter_map(|p| {
                readings
                    .get(&p.prediction_id)
                    .map(|&actual| ActualUpdate::new(p, actual))
            })
            .collect();

        let updated = self.store.apply_actuals(&updates).await?;

        Ok(Some(BatchOutcome {
            selected: pending.len(),
            updated,
            unmatched: pending.len() - updates.len(),
            cursor: next_cursor,
        }))
    }
}

struct BatchOutcome {
    selected: usize,
    updated: u64,
    unmatched: usize,
    cursor: (DateTime<Utc>, i64),
}

#[async_trait]
impl Stage for ActualValueUpdater {
    fn name(&self) -> &'static str {
        "backfill"
    }

    fn run_flag(&self) -> &RunFlag {
        &self.flag
    }

    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<()> {
        self.run_once(now).await.map(|_| ())
    }
}
