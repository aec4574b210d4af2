use anyhow::Context;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use online_forecast::store::pool::create_pool;
use online_forecast::{
    replay, ActualValueUpdater, Config, ForecastScheduler, ForecastStore, PerformanceAggregator,
    PgForecastStore, SchedulerManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OnceStage {
    Forecast,
    Backfill,
    Aggregate,
    All,
}

/// Forecast scheduling, actual-value backfill and accuracy aggregation
#[derive(Debug, Parser)]
#[command(name = "online-forecast", version, about)]
struct Args {
    /// Run a single cycle of the chosen stage and exit
    #[arg(long, value_enum)]
    once: Option<OnceStage>,

    /// Backtest over a `tag_name,ts,value` CSV file instead of the database
    #[arg(long, env = "FORECAST_REPLAY_CSV", conflicts_with = "once")]
    replay_csv: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "online_forecast=info,interval_math=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        cycle_secs = config.pipeline.cycle_secs,
        horizons = ?config.pipeline.default_horizons,
        "Configuration loaded"
    );

    if let Some(path) = args.replay_csv {
        let summary = replay::replay_csv(&path, &config.pipeline)
            .await
            .with_context(|| format!("replaying {}", path.display()))?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let pool = create_pool(&config.database)
        .await
        .context("connecting to the database")?;
    tracing::info!("Database connection pool established");

    let store: Arc<dyn ForecastStore> = Arc::new(PgForecastStore::new(pool, &config.pipeline));
    let forecast = Arc::new(ForecastScheduler::new(store.clone(), config.pipeline.clone()));
    let backfill = Arc::new(ActualValueUpdater::new(store.clone(), config.pipeline.clone()));
    let aggregate = Arc::new(PerformanceAggregator::new(store, config.pipeline.clone()));

    if let Some(stage) = args.once {
        let now = Utc::now();
        if matches!(stage, OnceStage::Forecast | OnceStage::All) {
            let report = forecast.run_once(now).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        if matches!(stage, OnceStage::Backfill | OnceStage::All) {
            let report = backfill.run_once(now).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        if matches!(stage, OnceStage::Aggregate | OnceStage::All) {
            let report = aggregate.run_once(now).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        return Ok(());
    }

    let mut manager = SchedulerManager::from_config(forecast, backfill, aggregate, &config.pipeline);
    for (stage, delay) in manager.stage_delays(Utc::now()) {
        tracing::info!(stage, first_run_in = ?delay, "Scheduled");
    }
    manager.start();

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    manager.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
