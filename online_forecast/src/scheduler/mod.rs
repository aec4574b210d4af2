//! The three pipeline stages and the loop that drives them
//!
//! Each stage runs one cycle at a time on its own tokio task. The loop
//! sleeps until the stage's next wall-clock slot and wakes early when the
//! shutdown signal fires.

use crate::align::until_next_boundary;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, Instrument};

pub mod aggregate;
pub mod backfill;
pub mod forecast;
pub mod manager;
pub mod player_cache;

pub use aggregate::{AggregationReport, PerformanceAggregator};
pub use backfill::{ActualValueUpdater, BackfillReport};
pub use forecast::{CycleReport, ForecastScheduler, IntervalSource};
pub use manager::{stage_delay, SchedulerManager};

/// Cooperative stop flag checked between units of work
#[derive(Debug)]
pub struct RunFlag {
    running: AtomicBool,
}

impl Default for RunFlag {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
        }
    }
}

impl RunFlag {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.running.store(true, Ordering::SeqCst);
    }
}

/// A scheduler that can be driven on a fixed cycle
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn run_flag(&self) -> &RunFlag;

    /// Run one cycle as of `now`. Errors are logged by the loop and never
    /// stop it.
    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<()>;

    fn stop(&self) {
        self.run_flag().stop();
    }
}

/// Instant a cycle due at `slot` runs as. The wall clock can read slightly
/// behind the timer that woke the task; clamping keeps that wake-up on its
/// own slot instead of the previous one.
pub fn cycle_instant(now: DateTime<Utc>, slot: DateTime<Utc>) -> DateTime<Utc> {
    now.max(slot)
}

fn after(now: DateTime<Utc>, wait: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(wait.as_millis() as i64)
}

/// Drive `stage` at `offset` into every `cycle` until shutdown
pub async fn run_aligned<S>(
    stage: Arc<S>,
    cycle: Duration,
    offset: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Stage + ?Sized,
{
    let name = stage.name();
    if *shutdown.borrow() {
        return;
    }

    let started = Utc::now();
    let first = until_next_boundary(started, cycle, offset);
    let mut slot = after(started, first);
    info!(stage = name, first_run_in = ?first, "Scheduler waiting for its first slot");
    tokio::select! {
        _ = tokio::time::sleep(first) => {}
        _ = shutdown.changed() => {
            debug!(stage = name, "Shutdown before first cycle");
            return;
        }
    }

    while stage.run_flag().is_running() && !*shutdown.borrow() {
        let now = cycle_instant(Utc::now(), slot);
        let span = info_span!("cycle", stage = name, started_at = %now);
        if let Err(e) = stage.run_cycle(now).instrument(span).await {
            error!(stage = name, error = %e, "Cycle failed, retrying next slot");
        }

        let finished = cycle_instant(Utc::now(), slot);
        let wait = until_next_boundary(finished, cycle, offset);
        slot = after(finished, wait);
        debug!(stage = name, next_run_in = ?wait, "Cycle complete");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!(stage = name, "Scheduler loop stopped");
}
