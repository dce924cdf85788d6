//! pairlink-relay binary entry point.
//!
//! Usage:
//! ```bash
//! pairlink-relay --config pairlink.toml
//! ```

use anyhow::{Context, Result};
use pairlink_relay::auth::StaticAuthenticator;
use pairlink_relay::cleanup::spawn_cleanup_task;
use pairlink_relay::config::Config;
use pairlink_relay::http::{build_router, health};
use pairlink_relay::server::PairLink;
use pairlink_relay::storage::{MemoryQueueBackend, SqlitePairingStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        tracing::warn!(
            "Config file {} not found, using defaults",
            config_path.display()
        );
        Config::default()
    };

    tracing::info!("pairlink-relay v{}", env!("CARGO_PKG_VERSION"));
    health::init_start_time();

    let store = SqlitePairingStore::new(&config.storage.database)
        .await
        .with_context(|| format!("opening {}", config.storage.database.display()))?;
    let auth = StaticAuthenticator::from_entries(&config.principals)?;
    if auth.is_empty() {
        tracing::warn!("No principals configured; every request will be unauthorized");
    }

    let bind_address = config.server.bind_address.clone();
    let cleanup_every = Duration::from_secs(config.limits.cleanup_interval_secs);
    let link = Arc::new(PairLink::new(
        config,
        Arc::new(store),
        Arc::new(MemoryQueueBackend::new()),
        Arc::new(auth),
    )?);

    let cleanup = spawn_cleanup_task(link.service().limits().clone(), cleanup_every);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    tracing::info!("Listening on {}", bind_address);

    let stopping = link.clone();
    axum::serve(listener, build_router(link))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            // Wake requesters blocked on pending pairing requests.
            stopping.shutdown();
        })
        .await
        .context("serving HTTP")?;

    cleanup.abort();
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("pairlink.toml"))
}
