//! Maintenance sweeper — bulk housekeeping invoked by a scheduler.
//!
//! Every operation is an idempotent bulk statement; none depends on another
//! having run first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use threadsage_core::error::SessionError;
use threadsage_core::store::SessionStore;

#[derive(Clone)]
pub struct MaintenanceSweeper {
    store: Arc<dyn SessionStore>,
}

impl MaintenanceSweeper {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Delete threads that expired before `now`, messages included.
    pub async fn sweep_expired_threads(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, SessionError> {
        let deleted = self.store.sweep_expired(now).await?;
        info!(deleted = deleted.len(), "Swept expired threads");
        Ok(deleted)
    }

    /// Zero everyone's monthly points. Total points are untouched.
    pub async fn reset_monthly_points(&self, now: DateTime<Utc>) -> Result<u64, SessionError> {
        let users = self.store.reset_monthly_points(now).await?;
        info!(users, "Reset monthly points");
        Ok(users)
    }

    /// Clear every per-user daily token counter.
    pub async fn reset_daily_token_usage(&self) -> Result<u64, SessionError> {
        let rows = self.store.reset_daily_usage().await?;
        info!(rows, "Reset daily token usage");
        Ok(rows)
    }
}
