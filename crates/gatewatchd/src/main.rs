use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod bootstrap;
mod config;
mod engine;
mod monitor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("gatewatchd starting");

    let cfg = config::Config::from_env();

    // The camera registry is the one resource we cannot run without.
    let registry = gatewatch_store::Registry::open(&cfg.registry_db_path())
        .await
        .context("failed to open camera registry")?;

    let engine = match bootstrap::init_recognition(&cfg).await {
        Ok(handle) => {
            tracing::info!("face recognition ready");
            Some(handle)
        }
        Err(err) => {
            tracing::warn!(
                error = %err,
                "face recognition unavailable; monitoring camera connectivity only"
            );
            None
        }
    };

    let monitor = Arc::new(monitor::Monitor::new(registry, &cfg, engine));
    tokio::spawn(Arc::clone(&monitor).run());

    tracing::info!("gatewatchd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("gatewatchd shutting down");

    Ok(())
}
