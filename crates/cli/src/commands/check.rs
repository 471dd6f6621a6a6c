//! `threadsage check` — Store row counts and size.

use std::sync::Arc;

use threadsage_channels::ConsoleAdapter;
use threadsage_config::AppConfig;

use super::{CmdResult, build_engine, load_config, open_store};

pub async fn run() -> CmdResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let engine = build_engine(&config, store, Arc::new(ConsoleAdapter::new("local")));

    let stats = engine
        .check()
        .await
        .map_err(|e| format!("Store check failed: {e}"))?;

    println!("🩺 threadsage check");
    println!("==================");
    println!("  Config dir:  {}", AppConfig::config_dir().display());
    println!("  Store:       {}", config.store.path.display());
    println!("  Providers:   {}", config.providers.len());
    println!("  Users:       {}", stats.users);
    println!("  Threads:     {}", stats.threads);
    println!("  Messages:    {}", stats.messages);
    println!("  Size:        {:.1} KiB", stats.size_bytes as f64 / 1024.0);

    Ok(())
}
