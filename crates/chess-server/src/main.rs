use std::sync::Arc;

use anyhow::Context;
use chess_server::{config, open_store, profile::ProfileBook, reaper, routes};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env();
    let store = open_store(&config).await?;
    let profiles = Arc::new(ProfileBook::new());

    reaper::spawn(store.clone(), config.reap_policy(), config.reap_interval);
    tracing::info!(
        idle_secs = config.idle_timeout.as_secs(),
        keep_finished_secs = config.finished_retention.as_secs(),
        every_secs = config.reap_interval.as_secs(),
        "Idle session reaper started"
    );

    let app = routes::router(store, profiles, config.clone());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
