//! In-memory store — useful for testing and ephemeral sessions.
//!
//! Threads live in an arena indexed by id, so creation is a plain
//! upsert-by-id. A transaction holds the state lock for its whole life and
//! restores a snapshot unless it commits; do not call the store's read
//! methods while holding one of its transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use threadsage_core::error::StoreError;
use threadsage_core::session::{NewMessage, RankEntry, StoreStats, StoredMessage, Thread, User};
use threadsage_core::store::{PointsAward, SessionStore, StoreTx, TokenLedger};

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<String, User>,
    threads: Vec<Thread>,
    thread_index: HashMap<String, usize>,
    messages: Vec<StoredMessage>,
    next_message_id: i64,
}

impl State {
    fn thread(&self, id: &str) -> Option<&Thread> {
        let slot = *self.thread_index.get(id)?;
        self.threads.get(slot)
    }

    fn thread_mut(&mut self, id: &str) -> Option<&mut Thread> {
        let slot = *self.thread_index.get(id)?;
        self.threads.get_mut(slot)
    }

    fn remove_thread(&mut self, id: &str) -> bool {
        let Some(slot) = self.thread_index.remove(id) else {
            return false;
        };
        self.threads.swap_remove(slot);
        if let Some(moved) = self.threads.get(slot) {
            self.thread_index.insert(moved.id.clone(), slot);
        }
        self.messages.retain(|m| m.thread_id != id);
        true
    }
}

/// A [`SessionStore`] kept entirely in process memory.
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    usage: Mutex<HashMap<(String, NaiveDate), u64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            usage: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A transaction over [`InMemoryStore`].
pub struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    snapshot: Option<State>,
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn upsert_user(&mut self, id: &str, display_name: &str) -> Result<(), StoreError> {
        self.guard
            .users
            .entry(id.to_string())
            .and_modify(|u| u.display_name = display_name.to_string())
            .or_insert_with(|| User::new(id, display_name));
        Ok(())
    }

    async fn upsert_thread(&mut self, thread: &Thread) -> Result<(), StoreError> {
        if !self.guard.users.contains_key(&thread.owner_id) {
            return Err(StoreError::ConstraintViolation(format!(
                "thread {} references unknown user {}",
                thread.id, thread.owner_id
            )));
        }

        let state = &mut *self.guard;
        match state.thread_mut(&thread.id) {
            Some(existing) => {
                let expires_at = existing.expires_at.max(thread.expires_at);
                let points = existing.points;
                *existing = Thread {
                    expires_at,
                    points,
                    ..thread.clone()
                };
            }
            None => {
                state
                    .thread_index
                    .insert(thread.id.clone(), state.threads.len());
                state.threads.push(Thread {
                    points: 0,
                    ..thread.clone()
                });
            }
        }
        Ok(())
    }

    async fn get_thread(&mut self, id: &str) -> Result<Option<Thread>, StoreError> {
        Ok(self.guard.thread(id).cloned())
    }

    async fn insert_message(&mut self, message: &NewMessage) -> Result<i64, StoreError> {
        if self.guard.thread(&message.thread_id).is_none() {
            return Err(StoreError::ConstraintViolation(format!(
                "message references unknown thread {}",
                message.thread_id
            )));
        }

        self.guard.next_message_id += 1;
        let id = self.guard.next_message_id;
        self.guard.messages.push(StoredMessage {
            id,
            thread_id: message.thread_id.clone(),
            author_id: message.author_id.clone(),
            body: message.body.clone(),
            is_prompt: message.is_prompt,
            ai_response_raw: message.ai_response_raw.clone(),
            timestamp: message.timestamp,
        });
        Ok(id)
    }

    async fn clear_messages(&mut self, thread_id: &str) -> Result<u64, StoreError> {
        let before = self.guard.messages.len();
        self.guard.messages.retain(|m| m.thread_id != thread_id);
        Ok((before - self.guard.messages.len()) as u64)
    }

    async fn delete_thread(&mut self, thread_id: &str) -> Result<bool, StoreError> {
        Ok(self.guard.remove_thread(thread_id))
    }

    async fn set_language(
        &mut self,
        thread_id: &str,
        language: &str,
    ) -> Result<bool, StoreError> {
        Ok(match self.guard.thread_mut(thread_id) {
            Some(thread) => {
                thread.language = language.to_string();
                true
            }
            None => false,
        })
    }

    async fn award_points(&mut self, award: &PointsAward) -> Result<(), StoreError> {
        let state = &mut *self.guard;
        let Some(thread) = state.thread_mut(&award.thread_id) else {
            return Err(StoreError::ConstraintViolation(format!(
                "award points: unknown thread {}",
                award.thread_id
            )));
        };
        thread.points += award.points;

        let Some(user) = state.users.get_mut(&award.user_id) else {
            return Err(StoreError::ConstraintViolation(format!(
                "award points: unknown user {}",
                award.user_id
            )));
        };
        user.total_points += award.points;
        user.monthly_points += award.points;
        if award.new_thread {
            user.total_threads += 1;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Dropping restores the snapshot.
        Ok(())
    }
}

#[async_trait]
impl TokenLedger for InMemoryStore {
    async fn try_consume(
        &self,
        user_id: &str,
        date: NaiveDate,
        amount: u64,
        limit: u64,
    ) -> Result<bool, StoreError> {
        let mut usage = self.usage.lock().await;
        let counter = usage.entry((user_id.to_string(), date)).or_insert(0);
        match counter.checked_add(amount) {
            Some(next) if next <= limit => {
                *counter = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn adjust(&self, user_id: &str, date: NaiveDate, delta: i64) -> Result<(), StoreError> {
        let mut usage = self.usage.lock().await;
        let counter = usage.entry((user_id.to_string(), date)).or_insert(0);
        *counter = counter.saturating_add_signed(delta);
        Ok(())
    }

    async fn daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<u64, StoreError> {
        let usage = self.usage.lock().await;
        Ok(usage
            .get(&(user_id.to_string(), date))
            .copied()
            .unwrap_or(0))
    }

    async fn reset_daily_usage(&self) -> Result<u64, StoreError> {
        let mut usage = self.usage.lock().await;
        let removed = usage.len() as u64;
        usage.clear();
        Ok(removed)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = Some(guard.clone());
        Ok(Box::new(InMemoryTx { guard, snapshot }))
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(id).cloned())
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>, StoreError> {
        Ok(self.state.lock().await.thread(id).cloned())
    }

    async fn thread_messages(&self, thread_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect())
    }

    async fn monthly_ranking(&self, limit: usize) -> Result<Vec<RankEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut users: Vec<&User> = state.users.values().collect();
        users.sort_by(|a, b| {
            b.monthly_points
                .cmp(&a.monthly_points)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(users
            .into_iter()
            .take(limit)
            .map(|u| RankEntry {
                user_id: u.id.clone(),
                display_name: u.display_name.clone(),
                monthly_points: u.monthly_points,
            })
            .collect())
    }

    async fn user_rank(&self, user_id: &str) -> Result<Option<(u64, u64)>, StoreError> {
        let state = self.state.lock().await;
        let Some(user) = state.users.get(user_id) else {
            return Ok(None);
        };
        let ahead = state
            .users
            .values()
            .filter(|u| u.monthly_points > user.monthly_points)
            .count() as u64;
        Ok(Some((ahead + 1, state.users.len() as u64)))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.state.lock().await;
        Ok(StoreStats {
            users: state.users.len() as u64,
            threads: state.threads.len() as u64,
            messages: state.messages.len() as u64,
            size_bytes: 0,
        })
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .threads
            .iter()
            .filter(|t| t.is_expired(now))
            .map(|t| t.id.clone())
            .collect();
        for id in &expired {
            state.remove_thread(id);
        }
        Ok(expired)
    }

    async fn reset_monthly_points(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        for user in state.users.values_mut() {
            user.monthly_points = 0;
            user.last_reset = Some(now);
        }
        Ok(state.users.len() as u64)
    }
}
