mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{at, config};
use online_forecast::scheduler::{stage_delay, RunFlag, Stage};
use online_forecast::{
    ActualValueUpdater, ForecastScheduler, MemoryStore, PerformanceAggregator, Result,
    SchedulerManager,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct CountingStage {
    cycles: AtomicUsize,
    flag: RunFlag,
}

#[async_trait]
impl Stage for CountingStage {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn run_flag(&self) -> &RunFlag {
        &self.flag
    }

    async fn run_cycle(&self, _now: DateTime<Utc>) -> Result<()> {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct PanickingStage {
    flag: RunFlag,
}

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn run_flag(&self) -> &RunFlag {
        &self.flag
    }

    async fn run_cycle(&self, _now: DateTime<Utc>) -> Result<()> {
        panic!("stage blew up");
    }
}

#[rstest]
#[case(0, Duration::from_secs(570))]
#[case(60, Duration::from_secs(30))]
#[case(180, Duration::from_secs(150))]
fn test_stage_delay_within_cycle(#[case] offset_secs: u64, #[case] expected: Duration) {
    let now = at(12, 0) + chrono::Duration::seconds(30);
    let delay = stage_delay(now, Duration::from_secs(600), Duration::from_secs(offset_secs));
    assert_eq!(delay, expected);
}

#[test]
fn test_stage_exactly_on_its_slot_waits_a_full_cycle() {
    let delay = stage_delay(at(12, 1), Duration::from_secs(600), Duration::from_secs(60));
    assert_eq!(delay, Duration::from_secs(600));
}

#[test]
fn test_manager_staggers_configured_stages() {
    let store = Arc::new(MemoryStore::new());
    let manager = SchedulerManager::from_config(
        Arc::new(ForecastScheduler::new(store.clone(), config())),
        Arc::new(ActualValueUpdater::new(store.clone(), config())),
        Arc::new(PerformanceAggregator::new(store, config())),
        &config(),
    );

    let delays = manager.stage_delays(at(12, 0) + chrono::Duration::seconds(30));
    assert_eq!(
        delays,
        vec![
            ("forecast", Duration::from_secs(570)),
            ("backfill", Duration::from_secs(30)),
            ("aggregate", Duration::from_secs(150)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stages_run_until_shutdown() {
    let stage = Arc::new(CountingStage::default());
    let mut manager = SchedulerManager::new(Duration::from_secs(1)).with_stage(stage.clone(), Duration::ZERO);

    manager.start();
    assert!(manager.is_running());
    tokio::time::sleep(Duration::from_millis(3500)).await;
    manager.shutdown().await;

    assert!(!manager.is_running());
    let ran = stage.cycles.load(Ordering::SeqCst);
    assert!(ran >= 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(stage.cycles.load(Ordering::SeqCst), ran);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_wakes_sleeping_stage() {
    let stage = Arc::new(CountingStage::default());
    let mut manager =
        SchedulerManager::new(Duration::from_secs(3600)).with_stage(stage.clone(), Duration::ZERO);

    manager.start();
    tokio::task::yield_now().await;
    manager.shutdown().await;

    assert!(!manager.is_running());
    assert_eq!(stage.cycles.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_double_start_and_double_shutdown_are_noops() {
    let stage = Arc::new(CountingStage::default());
    let mut manager =
        SchedulerManager::new(Duration::from_secs(3600)).with_stage(stage.clone(), Duration::ZERO);

    manager.start();
    manager.start();
    assert!(manager.is_running());

    manager.shutdown().await;
    manager.shutdown().await;
    assert!(!manager.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_manager_can_restart_after_shutdown() {
    let stage = Arc::new(CountingStage::default());
    let mut manager = SchedulerManager::new(Duration::from_secs(1)).with_stage(stage.clone(), Duration::ZERO);

    manager.start();
    manager.shutdown().await;
    assert!(!stage.flag.is_running());

    manager.start();
    assert!(stage.flag.is_running());
    tokio::time::sleep(Duration::from_millis(2500)).await;
    manager.shutdown().await;

    assert!(stage.cycles.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_stage_is_reported_not_propagated() {
    let stage = Arc::new(PanickingStage::default());
    let mut manager = SchedulerManager::new(Duration::from_secs(1)).with_stage(stage, Duration::ZERO);

    manager.start();
    tokio::time::sleep(Duration::from_secs(2)).await;
    manager.shutdown().await;

    assert!(!manager.is_running());
}
