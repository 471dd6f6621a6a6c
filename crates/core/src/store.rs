//! Session Store traits.
//!
//! Every multi-step write goes through a [`StoreTx`]: begin, stage writes,
//! commit. Dropping a transaction without committing discards its writes.
//! Read-only queries live on [`SessionStore`] and run outside a transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::session::{NewMessage, RankEntry, StoreStats, StoredMessage, Thread, User};

/// Points granted for one completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsAward {
    pub user_id: String,
    pub thread_id: String,
    pub points: i64,
    /// Counts towards the user's created-thread total.
    pub new_thread: bool,
}

/// Per-user daily token counter.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Atomically add `amount` to the user's counter for `date` if the result
    /// stays within `limit`. Returns whether the tokens were reserved.
    async fn try_consume(
        &self,
        user_id: &str,
        date: NaiveDate,
        amount: u64,
        limit: u64,
    ) -> Result<bool, StoreError>;

    /// Add `delta` (possibly negative) without a limit. The counter never
    /// drops below zero.
    async fn adjust(&self, user_id: &str, date: NaiveDate, delta: i64) -> Result<(), StoreError>;

    async fn daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<u64, StoreError>;

    /// Clear every counter. Returns the number of rows removed.
    async fn reset_daily_usage(&self) -> Result<u64, StoreError>;
}

/// A write transaction.
#[async_trait]
pub trait StoreTx: Send {
    /// Create the user or refresh their display name.
    async fn upsert_user(&mut self, id: &str, display_name: &str) -> Result<(), StoreError>;

    /// Create the thread or overwrite its fields.
    ///
    /// `expires_at` never moves backwards and accumulated `points` are kept.
    async fn upsert_thread(&mut self, thread: &Thread) -> Result<(), StoreError>;

    async fn get_thread(&mut self, id: &str) -> Result<Option<Thread>, StoreError>;

    /// Insert a message, returning its id. Fails with
    /// [`StoreError::ConstraintViolation`] when the thread does not exist.
    async fn insert_message(&mut self, message: &NewMessage) -> Result<i64, StoreError>;

    /// Delete every message of a thread, keeping the thread row.
    async fn clear_messages(&mut self, thread_id: &str) -> Result<u64, StoreError>;

    /// Delete a thread and, through the cascade, its messages.
    async fn delete_thread(&mut self, thread_id: &str) -> Result<bool, StoreError>;

    async fn set_language(&mut self, thread_id: &str, language: &str)
    -> Result<bool, StoreError>;

    async fn award_points(&mut self, award: &PointsAward) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// The durable store behind the session engine.
#[async_trait]
pub trait SessionStore: TokenLedger {
    /// Human-readable backend name (e.g., "sqlite").
    fn name(&self) -> &str;

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>, StoreError>;

    /// All messages of a thread in creation order.
    async fn thread_messages(&self, thread_id: &str) -> Result<Vec<StoredMessage>, StoreError>;

    /// Users ordered by monthly points, highest first.
    async fn monthly_ranking(&self, limit: usize) -> Result<Vec<RankEntry>, StoreError>;

    /// `(position, total users)` for the user, 1-based.
    async fn user_rank(&self, user_id: &str) -> Result<Option<(u64, u64)>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Delete threads whose `expires_at` is before `now`. Returns their ids.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError>;

    /// Zero monthly points for everyone. Returns the number of users touched.
    async fn reset_monthly_points(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
