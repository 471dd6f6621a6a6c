//! Daily token budget.
//!
//! The counter itself lives in a [`TokenLedger`] so that concurrent requests
//! from the same user see one shared, atomically updated value.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::warn;

use threadsage_core::error::StoreError;
use threadsage_core::message::ContextEntry;
use threadsage_core::store::TokenLedger;

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(entries: &[ContextEntry]) -> u64 {
    let chars: usize = entries.iter().map(|e| e.content.chars().count()).sum();
    chars.div_ceil(4) as u64
}

/// Whether a request of `estimate` tokens may go to a budgeted provider.
pub fn within_budget(daily_usage: u64, estimate: u64, limit: u64) -> bool {
    daily_usage
        .checked_add(estimate)
        .is_some_and(|total| total <= limit)
}

/// A per-user daily token budget backed by a ledger.
#[derive(Clone)]
pub struct TokenBudget {
    ledger: Arc<dyn TokenLedger>,
    daily_limit: u64,
}

impl TokenBudget {
    pub fn new(ledger: Arc<dyn TokenLedger>, daily_limit: u64) -> Self {
        Self {
            ledger,
            daily_limit,
        }
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    /// Reserve `estimate` tokens if the user stays within the limit.
    pub async fn try_reserve(
        &self,
        user_id: &str,
        date: NaiveDate,
        estimate: u64,
    ) -> Result<bool, StoreError> {
        self.ledger
            .try_consume(user_id, date, estimate, self.daily_limit)
            .await
    }

    /// Replace a reservation with what the provider actually reported.
    pub async fn settle(&self, user_id: &str, date: NaiveDate, reserved: u64, reported: u64) {
        let delta = reported as i64 - reserved as i64;
        if delta != 0 {
            self.adjust_or_warn(user_id, date, delta).await;
        }
    }

    /// Give back a reservation whose call failed.
    pub async fn refund(&self, user_id: &str, date: NaiveDate, reserved: u64) {
        self.adjust_or_warn(user_id, date, -(reserved as i64)).await;
    }

    /// Record usage of an ungated provider.
    pub async fn record(&self, user_id: &str, date: NaiveDate, tokens: u64) {
        self.adjust_or_warn(user_id, date, tokens as i64).await;
    }

    pub async fn usage(&self, user_id: &str, date: NaiveDate) -> Result<u64, StoreError> {
        self.ledger.daily_usage(user_id, date).await
    }

    async fn adjust_or_warn(&self, user_id: &str, date: NaiveDate, delta: i64) {
        if let Err(e) = self.ledger.adjust(user_id, date, delta).await {
            warn!(user_id, delta, error = %e, "Failed to update token usage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use threadsage_store::InMemoryStore;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(&[]), 0);
        assert_eq!(estimate_tokens(&[ContextEntry::user("abc")]), 1);
        assert_eq!(estimate_tokens(&[ContextEntry::user("abcd")]), 1);
        assert_eq!(
            estimate_tokens(&[ContextEntry::user("abcd"), ContextEntry::assistant("e")]),
            2
        );
    }

    #[test]
    fn estimate_counts_characters_not_bytes() {
        // Eight characters, twenty-four bytes.
        assert_eq!(estimate_tokens(&[ContextEntry::user("日本語日本語日本")]), 2);
    }

    #[test]
    fn selection_rule_is_inclusive() {
        assert!(within_budget(0, 100, 100));
        assert!(within_budget(90, 10, 100));
        assert!(!within_budget(91, 10, 100));
        assert!(!within_budget(u64::MAX, 1, u64::MAX));
    }

    #[tokio::test]
    async fn settle_replaces_reservation_with_report() {
        let store = Arc::new(InMemoryStore::new());
        let budget = TokenBudget::new(store.clone(), 1000);
        let today = Utc::now().date_naive();

        assert!(budget.try_reserve("u1", today, 100).await.unwrap());
        budget.settle("u1", today, 100, 140).await;
        assert_eq!(budget.usage("u1", today).await.unwrap(), 140);

        assert!(budget.try_reserve("u1", today, 50).await.unwrap());
        budget.refund("u1", today, 50).await;
        assert_eq!(budget.usage("u1", today).await.unwrap(), 140);
    }
}
