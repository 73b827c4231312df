pub mod config;
pub mod error;
pub mod matchmaker;
pub mod profile;
pub mod reaper;
pub mod routes;
pub mod store;
pub mod sync;

use std::sync::Arc;

use crate::config::Config;
use crate::store::{MemoryStore, PgStore, SessionStore};

/// Postgres when `DATABASE_URL` is set, otherwise the in-process store.
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn SessionStore>> {
    match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let store = PgStore::connect(url, config.poll_interval).await?;
            tracing::info!("Running migrations...");
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("DATABASE_URL not set - using in-memory session store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
