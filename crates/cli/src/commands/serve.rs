//! `threadsage serve` — Admin gateway plus the maintenance scheduler.

use std::sync::Arc;

use tracing::{error, info};

use threadsage_channels::{DiscordAdapter, DiscordConfig};
use threadsage_engine::MaintenanceSweeper;
use threadsage_gateway::run_maintenance;
use threadsage_workflow::MaintenanceScheduler;

use super::{CmdResult, build_engine, load_config, open_store};

pub async fn run(port_override: Option<u16>) -> CmdResult {
    let mut config = load_config()?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let store = open_store(&config).await?;
    let adapter = Arc::new(DiscordAdapter::new(DiscordConfig {
        bot_token: config.discord.bot_token.clone().unwrap_or_default(),
        allowed_channels: config.discord.allowed_channels.clone(),
    }));
    let engine = Arc::new(build_engine(&config, store.clone(), adapter));
    let sweeper = MaintenanceSweeper::new(store);

    let scheduler = MaintenanceScheduler::from_config(&config.schedule)
        .map_err(|e| format!("Invalid schedule: {e}"))?;

    println!("💬 threadsage — serving");
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Store:     {}", config.store.path.display());
    println!("   Sweep:     {}", config.schedule.sweep);
    println!("   Monthly:   {}", config.schedule.reset_monthly);
    println!("   Tokens:    {}", config.schedule.reset_daily_tokens);

    let (mut job_rx, _scheduler_handle) = scheduler.start();
    info!("Maintenance scheduler started");

    {
        let sweeper = sweeper.clone();
        tokio::spawn(async move {
            while let Some(triggered) = job_rx.recv().await {
                match run_maintenance(&sweeper, triggered.job).await {
                    Ok(report) => info!(
                        job = %report.job,
                        affected = report.affected,
                        "Scheduled maintenance finished"
                    ),
                    Err(e) => error!(job = %triggered.job, error = %e, "Scheduled maintenance failed"),
                }
            }
        });
    }

    // Start gateway (this blocks)
    threadsage_gateway::start(&config, engine, sweeper).await?;

    Ok(())
}
