//! payflowd: runs the worker pool, reaper and scheduler of one node

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use payflow::config::{validate_config, ConfigLoader, ENV_PREFIX};
use payflow::metrics::{init_tracing, MetricsCollector, MetricsServer};
use payflow::orchestrator::TracingNotifier;
use payflow::queue::SqliteQueue;
use payflow::store::SqliteStore;
use payflow::types::{Clock, SystemClock};
use payflow::{
    reaper_config, scheduler_config, static_pricing, worker_config, PipelineContext, Scheduler,
    SimulatedLedger, WorkerPool,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON); `PAYFLOW_*` variables override it
    #[arg(long, default_value = "config/local.toml")]
    config: PathBuf,

    /// Settle against the in-process simulated ledger
    #[arg(long)]
    simulated_ledger: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::from_file_with_env(&args.config, ENV_PREFIX)
        .with_context(|| format!("loading {}", args.config.display()))?;
    validate_config(&config)?;
    init_tracing(&config.service.log_level, config.service.json_logs)?;

    info!(
        config = %args.config.display(),
        environment = ?config.service.environment,
        "Starting payflowd"
    );

    if !args.simulated_ledger {
        bail!("no ledger backend configured; run with --simulated-ledger");
    }
    warn!("Using the simulated ledger: no funds move");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(MetricsCollector::new());

    let store = Arc::new(
        SqliteStore::new(&config.store.database_path)
            .await
            .with_context(|| format!("opening {}", config.store.database_path))?,
    );
    let queue = Arc::new(
        SqliteQueue::new(
            store.pool().clone(),
            clock.clone(),
            config.queue.max_redeliveries,
        )
        .await?,
    );

    let ctx = PipelineContext {
        store: store.clone(),
        queue: queue.clone(),
        ledger: Arc::new(SimulatedLedger::new()),
        pricing: Arc::new(static_pricing(&config, clock.clone())),
        notifier: Arc::new(TracingNotifier),
        clock: clock.clone(),
        metrics: metrics.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    if config.service.metrics_enabled {
        let addr = format!("0.0.0.0:{}", config.service.metrics_port);
        let mut rx = shutdown_rx.clone();
        let server = MetricsServer::new(metrics.clone(), addr);
        background.push(tokio::spawn(async move {
            let stop = async move {
                let _ = rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = server.serve_until(stop).await {
                error!(error = %e, "Metrics server failed");
            }
        }));
    }

    if config.scheduler.enabled {
        let scheduler = Scheduler::new(
            store.clone(),
            queue.clone(),
            clock.clone(),
            metrics.clone(),
            scheduler_config(&config),
        );
        background.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    }

    let pool = WorkerPool::new(
        ctx,
        worker_config(&config),
        config.worker.concurrency,
        config.service.worker_id_prefix.clone(),
    )
    .with_reaper(reaper_config(&config))
    .spawn(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("Shutdown requested; finishing in-flight steps");
    let _ = shutdown_tx.send(true);

    pool.join().await;
    for task in background {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    info!("payflowd stopped");
    Ok(())
}
