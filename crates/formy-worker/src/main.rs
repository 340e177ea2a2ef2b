//! Image job worker binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use formy_engine::EngineKind;
use formy_pipeline::PipelineRegistry;
use formy_queue::QueueConfig;
use formy_worker::{init_tracing, metrics, JobExecutor, WorkerConfig, WorkerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting formy-worker");

    let config = WorkerConfig::from_env();
    config.validate().context("Invalid worker configuration")?;
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::install_exporter(port)?;
    }

    let queue_config = QueueConfig::from_env()?;
    let store = queue_config.connect()?;
    if let Err(e) = store.health_check().await {
        error!(backend = store.backend(), "Task store unreachable: {}", e);
        return Err(e).context("Task store health check failed");
    }
    info!(backend = store.backend(), "Connected to task store");

    let engine_kind = EngineKind::from_env()?;
    let engine = engine_kind.connect()?;
    match engine.health_check().await {
        Ok(true) => info!(kind = ?engine_kind, url = engine.endpoint(), "Engine reachable"),
        Ok(false) => warn!(kind = ?engine_kind, url = engine.endpoint(), "Engine reports unhealthy"),
        Err(e) => warn!(kind = ?engine_kind, url = engine.endpoint(), "Engine not reachable: {}", e),
    }

    let registry = PipelineRegistry::with_default_pipelines();
    info!(job_types = ?registry.job_types(), "Pipelines registered");

    let ctx = WorkerContext::new(store, Arc::new(registry), engine, config);
    let executor = JobExecutor::new(ctx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!("worker ready");
    executor.run(shutdown_rx).await?;

    info!("Worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
