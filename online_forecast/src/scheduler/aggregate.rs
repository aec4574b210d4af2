//! Hourly accuracy rollups per (model, horizon)

use super::{RunFlag, Stage};
use crate::align::truncate_to_hour;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::records::{CompletedPrediction, CompletedQuery, PerformanceSummary};
use crate::store::ForecastStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use interval_math::AccuracyMetrics;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of one aggregation cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationReport {
    pub evaluation_time: DateTime<Utc>,
    /// (model, horizon) groups seen in the window
    pub groups: usize,
    pub summaries_written: u64,
    /// Groups under the minimum sample count
    pub below_min_samples: usize,
    /// Rows removed by retention, when pruning ran this cycle
    pub pruned: Option<u64>,
}

pub struct PerformanceAggregator {
    store: Arc<dyn ForecastStore>,
    config: PipelineConfig,
    flag: RunFlag,
    last_pruned: Mutex<Option<NaiveDate>>,
}

impl PerformanceAggregator {
    pub fn new(store: Arc<dyn ForecastStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            flag: RunFlag::default(),
            last_pruned: Mutex::new(None),
        }
    }

    /// Summarize predictions whose forecast time falls in the hour before
    /// `now` truncated to the hour
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<AggregationReport> {
        let evaluation_time = truncate_to_hour(now);
        let completed = self
            .store
            .completed_predictions(CompletedQuery {
                model_id: None,
                forecast_from: evaluation_time - Duration::hours(1),
                forecast_to: evaluation_time,
            })
            .await?;

        let mut groups: BTreeMap<(i64, i32), Vec<&CompletedPrediction>> = BTreeMap::new();
        for row in &completed {
            groups
                .entry((row.model_id, row.horizon_minutes))
                .or_default()
                .push(row);
        }

        let mut summaries = Vec::new();
        let mut below_min_samples = 0;
        for ((model_id, horizon), rows) in &groups {
            if rows.len() < self.config.aggregation_min_samples {
                debug!(
                    model_id,
                    horizon,
                    samples = rows.len(),
                    min_samples = self.config.aggregation_min_samples,
                    "Not enough completed predictions, skipping group"
                );
                below_min_samples += 1;
                continue;
            }
            summaries.push(summarize(evaluation_time, rows)?);
        }

        let summaries_written = if summaries.is_empty() {
            0
        } else {
            self.store.upsert_performance(&summaries).await?
        };

        let pruned = self.prune_if_due(now, evaluation_time).await?;

        let report = AggregationReport {
            evaluation_time,
            groups: groups.len(),
            summaries_written,
            below_min_samples,
            pruned,
        };
        info!(
            %evaluation_time,
            groups = report.groups,
            written = report.summaries_written,
            below_min_samples,
            "Aggregation cycle complete"
        );
        Ok(report)
    }

    /// Retention runs in the midnight evaluation hour, at most once per day
    async fn prune_if_due(
        &self,
        now: DateTime<Utc>,
        evaluation_time: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        if evaluation_time.hour() != 0 {
            return Ok(None);
        }
        let today = evaluation_time.date_naive();
        if *self.last_pruned.lock() == Some(today) {
            return Ok(None);
        }

        let cutoff = now - self.config.retention();
        let deleted = self.store.prune_performance(cutoff).await?;
        *self.last_pruned.lock() = Some(today);
        info!(%cutoff, deleted, "Pruned old performance summaries");
        Ok(Some(deleted))
    }
}

fn summarize(
    evaluation_time: DateTime<Utc>,
    rows: &[&CompletedPrediction],
) -> Result<PerformanceSummary> {
    let first = rows
        .first()
        .ok_or_else(|| PipelineError::InsufficientData("empty aggregation group".to_string()))?;

    let errors: Vec<f64> = rows.iter().map(|r| r.prediction_error).collect();
    let percentage_errors: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.absolute_percentage_error)
        .collect();
    let metrics = AccuracyMetrics::from_errors(&errors, &percentage_errors)?;

    let earliest = rows.iter().map(|r| r.forecast_time).min().unwrap_or(evaluation_time);
    let latest = rows.iter().map(|r| r.forecast_time).max().unwrap_or(evaluation_time);
    let num_predictions = i32::try_from(metrics.count).map_err(|_| {
        PipelineError::InvalidParameter(format!("{} predictions in one group", metrics.count))
    })?;

    Ok(PerformanceSummary {
        evaluation_time,
        model_id: first.model_id,
        tag_name: first.tag_name.clone(),
        horizon_minutes: first.horizon_minutes,
        num_predictions,
        mae: metrics.mae,
        mape: metrics.mape,
        rmse: metrics.rmse,
        eval_start_time: truncate_to_hour(earliest),
        eval_end_time: truncate_to_hour(latest),
    })
}

#[async_trait]
impl Stage for PerformanceAggregator {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn run_flag(&self) -> &RunFlag {
        &self.flag
    }

    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<()> {
        self.run_once(now).await.map(|_| ())
    }
}
