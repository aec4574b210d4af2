//! Lifecycle for the staggered scheduler tasks

use super::{run_aligned, ActualValueUpdater, ForecastScheduler, PerformanceAggregator, Stage};
use crate::align::until_next_boundary;
use crate::config::PipelineConfig;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Time from `now` until a stage with `offset` is next due
pub fn stage_delay(now: DateTime<Utc>, cycle: Duration, offset: Duration) -> Duration {
    until_next_boundary(now, cycle, offset)
}

/// Owns the scheduler tasks and the shutdown channel they listen on
pub struct SchedulerManager {
    cycle: Duration,
    stages: Vec<(Arc<dyn Stage>, Duration)>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SchedulerManager {
    pub fn new(cycle: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            cycle,
            stages: Vec::new(),
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Register a stage to run at `offset` into every cycle
    pub fn with_stage(mut self, stage: Arc<dyn Stage>, offset: Duration) -> Self {
        self.stages.push((stage, offset));
        self
    }

    /// Forecast, backfill and aggregation at their configured offsets
    pub fn from_config(
        forecast: Arc<ForecastScheduler>,
        backfill: Arc<ActualValueUpdater>,
        aggregate: Arc<PerformanceAggregator>,
        config: &PipelineConfig,
    ) -> Self {
        Self::new(config.cycle())
            .with_stage(forecast, Duration::from_secs(config.forecast_offset_secs))
            .with_stage(backfill, Duration::from_secs(config.backfill_offset_secs))
            .with_stage(aggregate, Duration::from_secs(config.aggregate_offset_secs))
    }

    /// Delay before each registered stage would first run
    pub fn stage_delays(&self, now: DateTime<Utc>) -> Vec<(&'static str, Duration)> {
        self.stages
            .iter()
            .map(|(stage, offset)| (stage.name(), stage_delay(now, self.cycle, *offset)))
            .collect()
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawn one task per stage. Does nothing if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Schedulers already running, ignoring start");
            return;
        }

        self.shutdown_tx.send_replace(false);
        let now = Utc::now();
        for (stage, offset) in &self.stages {
            stage.run_flag().reset();
            let name = stage.name();
            info!(
                stage = name,
                offset = ?offset,
                first_run_in = ?stage_delay(now, self.cycle, *offset),
                "Starting scheduler"
            );
            let handle = tokio::spawn(run_aligned(
                Arc::clone(stage),
                self.cycle,
                *offset,
                self.shutdown_tx.subscribe(),
            ));
            self.tasks.push((name, handle));
        }
    }

    /// Signal every stage to stop and wait for in-flight cycles to finish.
    /// A second call is a no-op.
    pub async fn shutdown(&mut self) {
        if !self.is_running() {
            debug!("Schedulers not running, nothing to shut down");
            return;
        }

        info!(tasks = self.tasks.len(), "Stopping schedulers");
        for (stage, _) in &self.stages {
            stage.stop();
        }
        self.shutdown_tx.send_replace(true);

        for (name, handle) in self.tasks.drain(..) {
            match handle.await {
                Ok(()) => debug!(stage = name, "Scheduler task joined"),
                Err(e) if e.is_panic() => error!(stage = name, "Scheduler task panicked"),
                Err(e) => warn!(stage = name, error = %e, "Scheduler task cancelled"),
            }
        }
        info!("All schedulers stopped");
    }
}
