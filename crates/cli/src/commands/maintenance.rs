//! `threadsage sweep | reset-monthly | reset-tokens` — Run one maintenance job now.

use threadsage_engine::MaintenanceSweeper;
use threadsage_gateway::run_maintenance;
use threadsage_workflow::MaintenanceJob;

use super::{CmdResult, load_config, open_store};

pub async fn run(job: MaintenanceJob) -> CmdResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let sweeper = MaintenanceSweeper::new(store);

    let report = run_maintenance(&sweeper, job)
        .await
        .map_err(|e| format!("{job} failed: {e}"))?;

    let what = match job {
        MaintenanceJob::SweepExpired => "expired thread(s) deleted",
        MaintenanceJob::ResetMonthly => "user(s) reset",
        MaintenanceJob::ResetDailyTokens => "token counter(s) cleared",
    };
    println!("✅ {job}: {} {what}", report.affected);

    Ok(())
}
