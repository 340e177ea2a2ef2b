use formy_engine::EngineKind;
use formy_queue::{QueueConfig, StoreBackend};
use formy_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    println!(
        "worker-selfcheck: starting with concurrency={} max_retries={}",
        config.concurrency, config.max_retries
    );
    config.validate()?;
    ensure_env_present(&["ENGINE_URL"])?;

    let queue_config = QueueConfig::from_env()?;
    if queue_config.backend == StoreBackend::Redis {
        ensure_env_present(&["REDIS_URL"])?;
    }
    let store = queue_config.connect()?;
    store
        .health_check()
        .await
        .map_err(|e| anyhow::anyhow!("{} store not reachable: {}", store.backend(), e))?;
    println!("worker-selfcheck: {} store ok", store.backend());

    ensure_engine().await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_engine() -> anyhow::Result<()> {
    let kind = EngineKind::from_env()?;
    let engine = kind.connect()?;
    let healthy = engine
        .health_check()
        .await
        .map_err(|e| anyhow::anyhow!("engine at {} not reachable: {}", engine.endpoint(), e))?;

    if !healthy {
        return Err(anyhow::anyhow!(
            "engine at {} reports unhealthy",
            engine.endpoint()
        ));
    }
    println!("worker-selfcheck: {:?} engine ok", kind);
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
