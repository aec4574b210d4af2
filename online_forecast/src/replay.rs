//! Offline backtest over recorded sensor readings
//!
//! Readings come from a CSV file with a `tag_name,ts,value` header, `ts` in
//! RFC 3339. They seed a [`MemoryStore`] as raw history and as 10-minute
//! bucket averages. One exponential smoothing model per tag is fitted on the
//! first half of its buckets, then the three stages are run cycle by cycle
//! across the whole span.

use crate::align::floor_to_cycle;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{EtsModel, ModelBlob, ModelFamily, PersistenceModel};
use crate::records::{ModelDescriptor, PerformanceSummary};
use crate::scheduler::{ActualValueUpdater, ForecastScheduler, PerformanceAggregator};
use crate::store::MemoryStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const BUCKET_SECS: u64 = 600;
const REPLAY_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorRow {
    pub tag_name: String,
    pub ts: DateTime<Utc>,
    pub value: f64,
}

/// Parse sensor rows from CSV
pub fn read_sensor_csv<R: Read>(reader: R) -> Result<Vec<SensorRow>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for record in rdr.deserialize() {
        let row: SensorRow = record?;
        if !row.value.is_finite() {
            warn!(tag = %row.tag_name, ts = %row.ts, "Skipping non-finite reading");
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

pub fn load_sensor_csv(path: &Path) -> Result<Vec<SensorRow>> {
    let file = std::fs::File::open(path)?;
    read_sensor_csv(file)
}

/// Time span covered by the seeded readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplaySpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Load readings and bucket averages into `store` and register one model
/// per tag
pub fn seed_store(store: &MemoryStore, rows: &[SensorRow]) -> Result<ReplaySpan> {
    let start = rows.iter().map(|r| r.ts).min();
    let end = rows.iter().map(|r| r.ts).max();
    let (Some(start), Some(end)) = (start, end) else {
        return Err(PipelineError::InsufficientData(
            "no readings to replay".to_string(),
        ));
    };

    // tag -> bucket -> (sum, count)
    let mut buckets: BTreeMap<&str, BTreeMap<DateTime<Utc>, (f64, usize)>> = BTreeMap::new();
    for row in rows {
        store.add_reading(&row.tag_name, row.ts, row.value);
        let slot = buckets
            .entry(row.tag_name.as_str())
            .or_default()
            .entry(floor_to_cycle(row.ts, BUCKET_SECS))
            .or_insert((0.0, 0));
        slot.0 += row.value;
        slot.1 += 1;
    }

    for (model_id, (tag, tag_buckets)) in (1i64..).zip(&buckets) {
        let averages: Vec<f64> = tag_buckets
            .iter()
            .map(|(bucket, (sum, count))| {
                let avg = sum / *count as f64;
                store.add_bucket(tag, *bucket, avg);
                avg
            })
            .collect();

        let training = &averages[..averages.len().div_ceil(2)];
        let (family, blob) = match EtsModel::fit(training, REPLAY_ALPHA) {
            Ok(model) if training.len() > 1 => (ModelFamily::AutoEts, ModelBlob::AutoEts(model)),
            _ => {
                let last = training.last().copied().unwrap_or_default();
                (
                    ModelFamily::Persistence,
                    ModelBlob::Persistence(PersistenceModel::new(last)),
                )
            }
        };

        info!(tag, model_id, %family, buckets = averages.len(), "Registered replay model");
        store.add_model(ModelDescriptor {
            model_id,
            tag_name: tag.to_string(),
            model_type: family.to_string(),
            model_blob: Some(blob.encode()?),
            model_path: None,
            is_deployed: true,
            is_active: true,
            pipeline_config: None,
        });
    }

    Ok(ReplaySpan { start, end })
}

/// Totals across a replay
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    pub cycles: usize,
    pub predictions_written: u64,
    pub actuals_filled: u64,
    pub summaries_written: u64,
    pub performance: Vec<PerformanceSummary>,
}

/// Run every stage once per cycle from the first full cycle after
/// `span.start` through `span.end`
pub async fn replay(
    store: Arc<MemoryStore>,
    config: &PipelineConfig,
    span: ReplaySpan,
) -> Result<ReplaySummary> {
    let forecast = ForecastScheduler::new(store.clone(), config.clone());
    let backfill = ActualValueUpdater::new(store.clone(), config.clone());
    let aggregate = PerformanceAggregator::new(store.clone(), config.clone());

    let cycle = Duration::seconds(config.cycle_secs as i64);
    let forecast_offset = Duration::seconds(config.forecast_offset_secs as i64);
    let backfill_offset = Duration::seconds(config.backfill_offset_secs as i64);
    let aggregate_offset = Duration::seconds(config.aggregate_offset_secs as i64);

    let mut summary = ReplaySummary::default();
    let mut t = floor_to_cycle(span.start, config.cycle_secs) + cycle;
    while t <= span.end {
        let cycle_report = forecast.run_once(t + forecast_offset).await?;
        let backfill_report = backfill.run_once(t + backfill_offset).await?;
        let aggregate_report = aggregate.run_once(t + aggregate_offset).await?;

        summary.cycles += 1;
        summary.predictions_written += cycle_report.predictions_written;
        summary.actuals_filled += backfill_report.updated;
        summary.summaries_written += aggregate_report.summaries_written;
        t += cycle;
    }

    summary.performance = store.summaries();
    info!(
        cycles = summary.cycles,
        predictions = summary.predictions_written,
        actuals = summary.actuals_filled,
        summaries = summary.summaries_written,
        "Replay finished"
    );
    Ok(summary)
}

/// Load `path` into a fresh store and replay it
pub async fn replay_csv(path: &Path, config: &PipelineConfig) -> Result<ReplaySummary> {
    let rows = load_sensor_csv(path)?;
    let store = Arc::new(MemoryStore::new());
    let span = seed_store(&store, &rows)?;
    info!(readings = rows.len(), start = %span.start, end = %span.end, "Replaying sensor CSV");
    replay(store, config, span).await
}
