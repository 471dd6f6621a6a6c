//! Durable session entities: users, threads, messages, token usage.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A chat participant and their point totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub total_points: i64,
    pub monthly_points: i64,
    pub total_threads: i64,
    /// Last time monthly points were zeroed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reset: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            total_points: 0,
            monthly_points: 0,
            total_threads: 0,
            last_reset: None,
        }
    }
}

/// A multi-turn conversation scoped to one original question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub owner_id: String,
    pub original_prompt: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Points awarded through this thread.
    pub points: i64,
}

impl Thread {
    /// A thread opened at `now` that lives for `lifetime_days`.
    pub fn open(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        original_prompt: impl Into<String>,
        language: impl Into<String>,
        now: DateTime<Utc>,
        lifetime_days: u32,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            original_prompt: original_prompt.into(),
            language: language.into(),
            created_at: now,
            expires_at: now + Duration::days(i64::from(lifetime_days)),
            points: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether `user_id` may clear, renew or reconfigure this thread.
    pub fn can_manage(&self, user_id: &str, admin_id: Option<&str>) -> bool {
        self.owner_id == user_id || admin_id.is_some_and(|admin| admin == user_id)
    }
}

/// A persisted message row. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub thread_id: String,
    pub author_id: String,
    pub body: String,
    pub is_prompt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response_raw: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A message about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub thread_id: String,
    pub author_id: String,
    pub body: String,
    pub is_prompt: bool,
    pub ai_response_raw: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    pub fn prompt(
        thread_id: impl Into<String>,
        author_id: impl Into<String>,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            author_id: author_id.into(),
            body: body.into(),
            is_prompt: true,
            ai_response_raw: None,
            timestamp,
        }
    }

    pub fn reply(
        thread_id: impl Into<String>,
        author_id: impl Into<String>,
        body: impl Into<String>,
        raw: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            author_id: author_id.into(),
            body: body.into(),
            is_prompt: false,
            ai_response_raw: Some(raw.into()),
            timestamp,
        }
    }
}

/// Tokens consumed by one user on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub user_id: String,
    pub date: NaiveDate,
    pub tokens: u64,
}

/// Verbosity of a generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    Simple,
    Detailed,
}

impl ResponseStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStyle::Simple => "simple",
            ResponseStyle::Detailed => "detailed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Some(ResponseStyle::Simple),
            "detailed" => Some(ResponseStyle::Detailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResponseStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the monthly leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub user_id: String,
    pub display_name: String,
    pub monthly_points: i64,
}

/// Row counts and on-disk size of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub users: u64,
    pub threads: u64,
    pub messages: u64,
    pub size_bytes: u64,
}
