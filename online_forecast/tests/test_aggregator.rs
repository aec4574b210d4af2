mod common;

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, Utc};
use common::{at, config};
use online_forecast::records::{NewPrediction, PerformanceSummary};
use online_forecast::{
    ActualValueUpdater, ForecastStore, MemoryStore, PerformanceAggregator, PipelineConfig,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Store a prediction made at `forecast_time` for 10 minutes ahead, with a
/// reading at the target
async fn completed(
    store: &MemoryStore,
    model_id: i64,
    forecast_time: DateTime<Utc>,
    predicted: f64,
    actual: f64,
) {
    let target_time = forecast_time + Duration::minutes(10);
    store
        .insert_predictions(&[NewPrediction {
            model_id,
            tag_name: "FIC-101".to_string(),
            forecast_time,
            target_time,
            horizon_minutes: 10,
            predicted_value: predicted,
            ci_lower: predicted - 1.0,
            ci_upper: predicted + 1.0,
        }])
        .await
        .unwrap();
    store.add_reading("FIC-101", target_time, actual);
}

async fn backfill(store: &Arc<MemoryStore>, now: DateTime<Utc>) {
    ActualValueUpdater::new(store.clone(), config())
        .run_once(now)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_two_samples_write_nothing() {
    let store = Arc::new(MemoryStore::new());
    completed(&store, 1, at(11, 0), 10.0, 12.0).await;
    completed(&store, 1, at(11, 10), 10.0, 7.0).await;
    backfill(&store, at(12, 1)).await;

    let report = PerformanceAggregator::new(store.clone(), config())
        .run_once(at(12, 3))
        .await
        .unwrap();

    assert_eq!(report.groups, 1);
    assert_eq!(report.below_min_samples, 1);
    assert_eq!(report.summaries_written, 0);
    assert!(store.summaries().is_empty());
}

#[tokio::test]
async fn test_three_samples_write_one_summary() {
    let store = Arc::new(MemoryStore::new());
    completed(&store, 1, at(11, 0), 10.0, 12.0).await;
    completed(&store, 1, at(11, 10), 10.0, 7.0).await;
    completed(&store, 1, at(11, 20), 10.0, 10.0).await;
    backfill(&store, at(12, 1)).await;

    let report = PerformanceAggregator::new(store.clone(), config())
        .run_once(at(12, 3))
        .await
        .unwrap();
    assert_eq!(report.evaluation_time, at(12, 0));
    assert_eq!(report.summaries_written, 1);

    let summaries = store.summaries();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.num_predictions, 3);
    assert_eq!(summary.horizon_minutes, 10);
    assert_eq!(summary.evaluation_time, at(12, 0));
    assert_eq!(summary.eval_start_time, at(11, 0));
    assert_eq!(summary.eval_end_time, at(11, 0));

    // errors are -2, 3 and 0
    assert_relative_eq!(summary.mae, 5.0 / 3.0, epsilon = 1e-9);
    assert_relative_eq!(summary.rmse, (13.0f64 / 3.0).sqrt(), epsilon = 1e-9);
    let expected_mape = (2.0 / 12.0 * 100.0 + 3.0 / 7.0 * 100.0 + 0.0) / 3.0;
    assert_relative_eq!(summary.mape.unwrap(), expected_mape, epsilon = 1e-9);
}

#[tokio::test]
async fn test_forecasts_outside_the_hour_are_excluded() {
    let store = Arc::new(MemoryStore::new());
    completed(&store, 1, at(10, 50), 10.0, 11.0).await;
    completed(&store, 1, at(11, 0), 10.0, 11.0).await;
    completed(&store, 1, at(11, 30), 10.0, 11.0).await;
    completed(&store, 1, at(12, 0), 10.0, 11.0).await;
    backfill(&store, at(12, 20)).await;

    let report = PerformanceAggregator::new(store.clone(), config())
        .run_once(at(12, 30))
        .await
        .unwrap();

    // only 11:00 and 11:30 fall in [11:00, 12:00)
    assert_eq!(report.summaries_written, 0);
    assert_eq!(report.below_min_samples, 1);
}

#[tokio::test]
async fn test_groups_are_per_model() {
    let store = Arc::new(MemoryStore::new());
    for minute in [0, 10, 20] {
        completed(&store, 1, at(11, minute), 10.0, 11.0).await;
        completed(&store, 2, at(11, minute), 20.0, 11.0).await;
    }
    backfill(&store, at(12, 1)).await;

    let config = PipelineConfig {
        aggregation_min_samples: 3,
        ..config()
    };
    PerformanceAggregator::new(store.clone(), config)
        .run_once(at(12, 3))
        .await
        .unwrap();

    let maes: Vec<(i64, f64)> = store.summaries().iter().map(|s| (s.model_id, s.mae)).collect();
    assert_eq!(maes, vec![(1, 1.0), (2, 9.0)]);
}

#[tokio::test]
async fn test_rerun_replaces_summary() {
    let store = Arc::new(MemoryStore::new());
    for minute in [0, 10, 20] {
        completed(&store, 1, at(11, minute), 10.0, 11.0).await;
    }
    backfill(&store, at(12, 1)).await;
    let aggregator = PerformanceAggregator::new(store.clone(), config());

    aggregator.run_once(at(12, 3)).await.unwrap();
    aggregator.run_once(at(12, 13)).await.unwrap();

    assert_eq!(store.summaries().len(), 1);
}

fn old_summary(eval_end_time: DateTime<Utc>) -> PerformanceSummary {
    PerformanceSummary {
        evaluation_time: eval_end_time + Duration::hours(1),
        model_id: 1,
        tag_name: "FIC-101".to_string(),
        horizon_minutes: 10,
        num_predictions: 3,
        mae: 1.0,
        mape: Some(2.0),
        rmse: 1.5,
        eval_start_time: eval_end_time,
        eval_end_time,
    }
}

#[tokio::test]
async fn test_retention_prunes_once_at_midnight() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_performance(&[
            old_summary(at(0, 0) - Duration::days(120)),
            old_summary(at(0, 0) - Duration::days(10)),
        ])
        .await
        .unwrap();
    let aggregator = PerformanceAggregator::new(store.clone(), config());

    let midnight = aggregator.run_once(at(0, 3)).await.unwrap();
    assert_eq!(midnight.pruned, Some(1));
    assert_eq!(store.summaries().len(), 1);

    let same_hour = aggregator.run_once(at(0, 13)).await.unwrap();
    assert_eq!(same_hour.pruned, None);

    let later = aggregator.run_once(at(1, 3)).await.unwrap();
    assert_eq!(later.pruned, None);
}
