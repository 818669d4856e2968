//! Job Store Daemon - Main Entry Point
//! Partitioning, chunk scheduling and result intake behind a JSON-RPC server

mod config;
mod logging;
mod wiring;

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use config::DaemonConfig;
use jobstore_api_rpc::{RpcServer, RpcServerConfig};
use jobstore_core::application::shutdown_channel;
use jobstore_infra_sqlite::{create_pool, run_migrations};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (logging settings live in it)
    let config = DaemonConfig::load()?;

    // 2. Initialize logging
    let _log_guard = logging::init(&config)?;
    info!("Job Store v{} starting...", VERSION);

    // 3. Initialize database
    let database_url = config.database_url();
    info!(database = %database_url, "Initializing database...");
    let pool = create_pool(&database_url)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    // 4. Setup dependencies (DI wiring)
    let services = wiring::build(&config, pool);
    info!(
        bindings = config.bindings.len(),
        destinations = ?services.destinations,
        "Services wired"
    );

    // 5. Restore queue state before any sweep runs
    info!("Running recovery...");
    let report = services
        .recovery
        .recover()
        .await
        .context("Recovery failed")?;
    info!(
        job_queue_reset = report.job_queue_reset,
        reruns_reset = report.reruns_reset,
        queue_entries = report.queue_entries,
        "Recovery completed"
    );

    // 6. Start sweep loops
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let scheduler_config = &config.scheduler;
    let loops = vec![
        tokio::spawn(
            services
                .watcher
                .clone()
                .run(scheduler_config.job_queue_tick(), shutdown_rx),
        ),
        tokio::spawn(services.bulk.clone().run(shutdown_tx.token())),
        tokio::spawn(
            services
                .reruns
                .clone()
                .run(scheduler_config.rerun_tick(), shutdown_tx.token()),
        ),
    ];

    // 7. Start JSON-RPC server
    let rpc_config = RpcServerConfig {
        host: config.rpc_host.clone(),
        port: config.rpc_port,
    };
    let (rpc_handle, rpc_addr) = RpcServer::new(rpc_config, services.rpc.clone())
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %rpc_addr, "System ready");
    info!("Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 9. Graceful shutdown
    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    for handle in loops {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            tracing::warn!("Sweep loop did not stop in time");
        }
    }

    info!("Shutdown complete.");

    Ok(())
}
