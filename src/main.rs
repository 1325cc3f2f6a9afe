use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use browser_pool::{LoadBalancer, ProcessPool};
use browserhive::config::Config;
use browserhive::server::{self, AppState};
use session_registry::{RegistryConfig, SessionRegistry};
use session_store::{MemoryStore, RedisStore, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::load().context("loading configuration")?;
    info!(
        chromium = %cfg.chromium_path.display(),
        server_port = cfg.server_port,
        pool_size = cfg.pool_size,
        session_ttl = ?cfg.session_ttl,
        "configuration loaded"
    );

    let store: Arc<dyn SessionStore> = match cfg.redis_url() {
        Some(url) => {
            let store = RedisStore::connect(&url, cfg.session_ttl)
                .await
                .context("connecting to the durable session store")?;
            info!(addr = %cfg.redis_addr, "durable session store connected");
            Arc::new(store)
        }
        None => {
            warn!("REDIS_ADDR is empty; using the in-memory store, sessions will not survive a restart");
            Arc::new(MemoryStore::new(cfg.session_ttl))
        }
    };

    let pool = ProcessPool::new(cfg.chromium_path.clone(), cfg.pool_size)
        .await
        .context("starting the browser pool")?;
    let balancer = Arc::new(LoadBalancer::new(Arc::clone(&pool)));

    let registry = SessionRegistry::new(
        Some(store),
        RegistryConfig {
            idle_timeout: cfg.idle_timeout,
            sweep_interval: cfg.sweep_interval,
            ..RegistryConfig::default()
        },
    );
    registry.start_sweeper();

    let state = AppState::new(Arc::clone(&registry), Some(balancer));
    info!(port = cfg.server_port, workers = cfg.pool_size, "service ready");

    if let Err(err) = server::serve(state, cfg.server_port, shutdown_signal()).await {
        error!(%err, "http server error");
    }

    // Shutdown ordering: the server has drained; close the registry (sweeper
    // and protocol clients), then stop the workers.
    info!("shutdown initiated");
    registry.close().await;
    if let Err(err) = pool.shutdown().await {
        error!(%err, "browser pool shutdown incomplete");
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%err, "failed to install SIGTERM handler, relying on ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
    info!("shutdown signal received");
}
