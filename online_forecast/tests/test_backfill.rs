mod common;

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, Utc};
use common::{at, config};
use online_forecast::records::NewPrediction;
use online_forecast::{ActualValueUpdater, ForecastStore, MemoryStore, PipelineConfig};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn prediction(model_id: i64, target_time: DateTime<Utc>, predicted_value: f64) -> NewPrediction {
    NewPrediction {
        model_id,
        tag_name: "FIC-101".to_string(),
        forecast_time: target_time - Duration::minutes(10),
        target_time,
        horizon_minutes: 10,
        predicted_value,
        ci_lower: predicted_value - 1.0,
        ci_upper: predicted_value + 1.0,
    }
}

async fn insert(store: &MemoryStore, rows: &[NewPrediction]) {
    store.insert_predictions(rows).await.unwrap();
}

#[tokio::test]
async fn test_actual_and_errors_are_written() {
    let store = Arc::new(MemoryStore::new());
    insert(&store, &[prediction(1, at(12, 10), 110.0)]).await;
    store.add_reading("FIC-101", at(12, 11), 100.0);

    let updater = ActualValueUpdater::new(store.clone(), config());
    let report = updater.run_once(at(12, 21)).await.unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.unmatched, 0);
    assert!(!report.aborted);

    let row = &store.predictions()[0];
    assert_eq!(row.actual_value, Some(100.0));
    assert_relative_eq!(row.prediction_error.unwrap(), 10.0);
    assert_relative_eq!(row.absolute_percentage_error.unwrap(), 10.0);
}

#[tokio::test]
async fn test_zero_actual_leaves_percentage_error_null() {
    let store = Arc::new(MemoryStore::new());
    insert(&store, &[prediction(1, at(12, 10), 2.0)]).await;
    store.add_reading("FIC-101", at(12, 10), 0.0);

    ActualValueUpdater::new(store.clone(), config())
        .run_once(at(12, 21))
        .await
        .unwrap();

    let row = &store.predictions()[0];
    assert_eq!(row.actual_value, Some(0.0));
    assert_eq!(row.prediction_error, Some(2.0));
    assert_eq!(row.absolute_percentage_error, None);
}

#[tokio::test]
async fn test_future_targets_are_not_backfilled() {
    let store = Arc::new(MemoryStore::new());
    insert(&store, &[prediction(1, at(12, 30), 50.0)]).await;
    // a reading already exists near the target, but the target has not passed
    store.add_reading("FIC-101", at(12, 30), 51.0);

    let report = ActualValueUpdater::new(store.clone(), config())
        .run_once(at(12, 21))
        .await
        .unwrap();

    assert_eq!(report.examined, 0);
    assert_eq!(store.predictions()[0].actual_value, None);
}

#[tokio::test]
async fn test_tolerance_and_quality_filter_readings() {
    let store = Arc::new(MemoryStore::new());
    insert(
        &store,
        &[
            prediction(1, at(10, 0), 10.0),
            prediction(2, at(11, 0), 10.0),
            prediction(3, at(12, 0), 10.0),
        ],
    )
    .await;
    // 6 minutes away: outside the 5 minute tolerance
    store.add_reading("FIC-101", at(10, 6), 99.0);
    // bad quality at the exact time, good one 2 minutes later
    store.add_reading_with_quality("FIC-101", at(11, 0), Some(1.0), 8);
    store.add_reading("FIC-101", at(11, 2), 12.0);
    // equidistant readings: the earlier one wins
    store.add_reading("FIC-101", at(11, 57), 7.0);
    store.add_reading("FIC-101", at(12, 3), 9.0);

    let report = ActualValueUpdater::new(store.clone(), config())
        .run_once(at(13, 0))
        .await
        .unwrap();

    assert_eq!(report.updated, 2);
    assert_eq!(report.unmatched, 1);

    let actuals: Vec<_> = store.predictions().iter().map(|p| p.actual_value).collect();
    assert_eq!(actuals, vec![None, Some(12.0), Some(7.0)]);
}

#[tokio::test]
async fn test_batch_limit_leaves_remainder_for_next_cycle() {
    let store = Arc::new(MemoryStore::new());
    let rows: Vec<_> = (0..150)
        .map(|i| prediction(1, at(8, 0) + Duration::minutes(i), 40.0))
        .collect();
    insert(&store, &rows).await;
    for i in 0..150 {
        store.add_reading("FIC-101", at(8, 0) + Duration::minutes(i), 41.0);
    }

    let config = PipelineConfig {
        backfill_batch_size: 100,
        backfill_max_batches: 1,
        ..config()
    };
    let updater = ActualValueUpdater::new(store.clone(), config);

    let first = updater.run_once(at(12, 0)).await.unwrap();
    assert_eq!(first.batches, 1);
    assert_eq!(first.updated, 100);
    let remaining = store
        .predictions()
        .iter()
        .filter(|p| p.actual_value.is_none())
        .count();
    assert_eq!(remaining, 50);

    let second = updater.run_once(at(12, 10)).await.unwrap();
    assert_eq!(second.updated, 50);
    assert!(store.predictions().iter().all(|p| p.actual_value.is_some()));
}

#[tokio::test]
async fn test_unmatched_rows_do_not_starve_older_ones() {
    let store = Arc::new(MemoryStore::new());
    let rows: Vec<_> = (0..6)
        .map(|i| prediction(1, at(10, 0) + Duration::minutes(20 * i), 5.0))
        .collect();
    insert(&store, &rows).await;
    // only the two oldest targets have readings
    store.add_reading("FIC-101", at(10, 0), 6.0);
    store.add_reading("FIC-101", at(10, 20), 6.0);

    let config = PipelineConfig {
        backfill_batch_size: 2,
        backfill_max_batches: 5,
        ..config()
    };
    let report = ActualValueUpdater::new(store.clone(), config)
        .run_once(at(12, 0))
        .await
        .unwrap();

    assert_eq!(report.batches, 3);
    assert_eq!(report.examined, 6);
    assert_eq!(report.updated, 2);
    assert_eq!(report.unmatched, 4);
}

#[tokio::test]
async fn test_failed_batch_is_rolled_back_and_retried() {
    let store = Arc::new(MemoryStore::new());
    insert(
        &store,
        &[prediction(1, at(12, 0), 10.0), prediction(1, at(12, 10), 10.0)],
    )
    .await;
    store.add_reading("FIC-101", at(12, 0), 11.0);
    store.add_reading("FIC-101", at(12, 10), 12.0);

    let updater = ActualValueUpdater::new(store.clone(), config());

    store.fail_actual_writes(true);
    let failed = updater.run_once(at(12, 20)).await.unwrap();
    assert!(failed.aborted);
    assert_eq!(failed.updated, 0);
    assert!(store.predictions().iter().all(|p| p.actual_value.is_none()));

    store.fail_actual_writes(false);
    let retried = updater.run_once(at(12, 30)).await.unwrap();
    assert!(!retried.aborted);
    assert_eq!(retried.updated, 2);
}

#[tokio::test]
async fn test_targets_beyond_lookback_are_ignored() {
    let store = Arc::new(MemoryStore::new());
    insert(&store, &[prediction(1, at(12, 0) - Duration::days(8), 10.0)]).await;
    store.add_reading("FIC-101", at(12, 0) - Duration::days(8), 10.5);

    let report = ActualValueUpdater::new(store.clone(), config())
        .run_once(at(12, 0))
        .await
        .unwrap();

    assert_eq!(report.examined, 0);
    assert_eq!(store.predictions()[0].actual_value, None);
}

#[tokio::test]
async fn test_null_reading_falls_through_to_next_nearest() {
    let store = Arc::new(MemoryStore::new());
    insert(
        &store,
        &[prediction(1, at(12, 0), 20.0), prediction(1, at(11, 0), 20.0)],
    )
    .await;
    // the closest good-quality row has no value
    store.add_reading_with_quality("FIC-101", at(12, 0), None, 0);
    store.add_reading("FIC-101", at(12, 3), 25.0);
    store.add_reading("FIC-101", at(11, 0), 16.0);

    let report = ActualValueUpdater::new(store.clone(), config())
        .run_once(at(12, 10))
        .await
        .unwrap();

    assert!(!report.aborted);
    assert_eq!(report.updated, 2);
    let actuals: Vec<_> = store.predictions().iter().map(|p| p.actual_value).collect();
    assert_eq!(actuals, vec![Some(16.0), Some(25.0)]);
}

#[tokio::test]
async fn test_prediction_with_only_null_readings_stays_pending() {
    let store = Arc::new(MemoryStore::new());
    insert(&store, &[prediction(1, at(12, 0), 20.0)]).await;
    store.add_reading_with_quality("FIC-101", at(12, 0), None, 0);

    let report = ActualValueUpdater::new(store.clone(), config())
        .run_once(at(12, 10))
        .await
        .unwrap();

    assert!(!report.aborted);
    assert_eq!(report.unmatched, 1);
    assert_eq!(store.predictions()[0].actual_value, None);

    let latest = store.latest_raw_reading("FIC-101", at(12, 10)).await.unwrap();
    assert_eq!(latest, None);
}

#[tokio::test]
async fn test_training_evaluations_are_backfilled() {
    let store = Arc::new(MemoryStore::new());
    let due = store.add_evaluation(1, "FIC-101", at(12, 0), 10, 55.0);
    let zero = store.add_evaluation(1, "FIC-101", at(12, 10), 20, 3.0);
    let future = store.add_evaluation(1, "FIC-101", at(13, 0), 60, 55.0);
    store.add_reading("FIC-101", at(12, 2), 50.0);
    store.add_reading("FIC-101", at(12, 10), 0.0);
    store.add_reading("FIC-101", at(13, 0), 51.0);

    let updater = ActualValueUpdater::new(store.clone(), config());
    let report = updater.run_once(at(12, 20)).await.unwrap();
    assert_eq!(report.evaluations_updated, 2);

    let rows = store.evaluations();
    let row = |id: i64| rows.iter().find(|e| e.evaluation_id == id).unwrap();

    assert_eq!(row(due).actual_value, Some(50.0));
    assert_relative_eq!(row(due).prediction_error.unwrap(), 5.0);
    assert_relative_eq!(row(due).absolute_percentage_error.unwrap(), 10.0);

    // a genuine zero actual is recorded once and not revisited
    assert_eq!(row(zero).actual_value, Some(0.0));
    assert_eq!(row(zero).prediction_error, Some(3.0));
    assert_eq!(row(zero).absolute_percentage_error, None);

    assert_eq!(row(future).prediction_error, None);

    let rerun = updater.run_once(at(12, 30)).await.unwrap();
    assert_eq!(rerun.evaluations_updated, 0);
}

#[tokio::test]
async fn test_training_evaluations_respect_tolerance_and_lookback() {
    let store = Arc::new(MemoryStore::new());
    store.add_evaluation(1, "FIC-101", at(12, 0), 10, 10.0);
    store.add_evaluation(1, "FIC-101", at(12, 0) - Duration::days(8), 10, 10.0);
    store.add_reading("FIC-101", at(12, 6), 11.0);
    store.add_reading("FIC-101", at(12, 0) - Duration::days(8), 11.0);

    let report = ActualValueUpdater::new(store.clone(), config())
        .run_once(at(12, 30))
        .await
        .unwrap();

    assert_eq!(report.evaluations_updated, 0);
    assert!(store.evaluations().iter().all(|e| e.is_pending()));
}
