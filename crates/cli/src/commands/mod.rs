pub mod ask;
pub mod check;
pub mod clear;
pub mod maintenance;
pub mod onboard;
pub mod serve;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use threadsage_config::AppConfig;
use threadsage_core::channel::ChatAdapter;
use threadsage_engine::SessionEngine;
use threadsage_store::SqliteStore;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Open the configured store. Exhausting the retries is fatal.
pub async fn open_store(config: &AppConfig) -> Result<Arc<SqliteStore>, Box<dyn std::error::Error>> {
    if let Some(dir) = config.store.path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = SqliteStore::connect_with_retry(
        &config.store.path,
        config.store.connect_attempts,
        Duration::from_millis(config.store.retry_delay_ms),
    )
    .await
    .map_err(|e| format!("Session store unavailable at {}: {e}", config.store.path.display()))?;
    Ok(Arc::new(store))
}

/// Wire store, provider tiers and a chat adapter into an engine.
pub fn build_engine(
    config: &AppConfig,
    store: Arc<SqliteStore>,
    adapter: Arc<dyn ChatAdapter>,
) -> SessionEngine {
    let router = threadsage_providers::build_from_config(config, store.clone());
    SessionEngine::new(config, store, Arc::new(router), adapter)
}
