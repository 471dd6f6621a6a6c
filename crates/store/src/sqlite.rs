//! SQLite session store.
//!
//! One database file, four tables:
//! - `users` — point totals per participant
//! - `threads` — one row per conversation, owned by a user
//! - `messages` — prompt/reply rows, cascaded away with their thread
//! - `token_usage` — daily token counter, unique per (user, date)
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text so that string
//! comparison matches chronological order.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};

use threadsage_core::error::StoreError;
use threadsage_core::session::{NewMessage, RankEntry, StoreStats, StoredMessage, Thread, User};
use threadsage_core::store::{PointsAward, SessionStore, StoreTx, TokenLedger};

/// A SQLite-backed [`SessionStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite session store initialized at {}", path.display());
        Ok(store)
    }

    /// An ephemeral database living in a single connection (useful for tests).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// [`open`](Self::open) with up to `attempts` tries spaced by `delay`.
    pub async fn connect_with_retry(
        path: &Path,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, StoreError> {
        let attempts = attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match Self::open(path).await {
                Ok(store) => return Ok(store),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Session store not reachable");
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Unavailable("no connection attempt".into())))
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "users table",
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id              TEXT PRIMARY KEY,
                    display_name    TEXT NOT NULL,
                    total_points    INTEGER NOT NULL DEFAULT 0,
                    monthly_points  INTEGER NOT NULL DEFAULT 0,
                    total_threads   INTEGER NOT NULL DEFAULT 0,
                    last_reset      TEXT
                )
                "#,
            ),
            (
                "threads table",
                r#"
                CREATE TABLE IF NOT EXISTS threads (
                    id              TEXT PRIMARY KEY,
                    owner_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    original_prompt TEXT NOT NULL,
                    language        TEXT NOT NULL,
                    created_at      TEXT NOT NULL,
                    expires_at      TEXT NOT NULL,
                    points          INTEGER NOT NULL DEFAULT 0
                )
                "#,
            ),
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    id              INTEGER PRIMARY KEY AUTOINCREMENT,
                    thread_id       TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
                    author_id       TEXT NOT NULL,
                    body            TEXT NOT NULL,
                    is_prompt       INTEGER NOT NULL,
                    ai_response_raw TEXT,
                    timestamp       TEXT NOT NULL
                )
                "#,
            ),
            (
                "token_usage table",
                r#"
                CREATE TABLE IF NOT EXISTS token_usage (
                    user_id TEXT NOT NULL,
                    date    TEXT NOT NULL,
                    tokens  INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (user_id, date)
                )
                "#,
            ),
            (
                "messages index",
                "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, id)",
            ),
            (
                "expiry index",
                "CREATE INDEX IF NOT EXISTS idx_threads_expires_at ON threads(expires_at)",
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }
}

/// Fixed-width UTC timestamp, sortable as text.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

fn day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Map a sqlx error onto the store taxonomy.
fn store_err(context: &str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db)
            if db.is_foreign_key_violation() || db.is_unique_violation() =>
        {
            StoreError::ConstraintViolation(format!("{context}: {e}"))
        }
        sqlx::Error::Database(db) if is_busy(db.code().as_deref()) => {
            StoreError::Unavailable(format!("{context}: {e}"))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{context}: {e}"))
        }
        _ => StoreError::QueryFailed(format!("{context}: {e}")),
    }
}

/// SQLITE_BUSY and SQLITE_LOCKED, including their extended codes.
fn is_busy(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, 5 | 6))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn row_to_user(row: &SqliteRow) -> Result<User, StoreError> {
    let last_reset: Option<String> = column(row, "last_reset")?;
    Ok(User {
        id: column(row, "id")?,
        display_name: column(row, "display_name")?,
        total_points: column(row, "total_points")?,
        monthly_points: column(row, "monthly_points")?,
        total_threads: column(row, "total_threads")?,
        last_reset: last_reset
            .map(|raw| parse_ts(&raw, "last_reset"))
            .transpose()?,
    })
}

fn row_to_thread(row: &SqliteRow) -> Result<Thread, StoreError> {
    let created_at: String = column(row, "created_at")?;
    let expires_at: String = column(row, "expires_at")?;
    Ok(Thread {
        id: column(row, "id")?,
        owner_id: column(row, "owner_id")?,
        original_prompt: column(row, "original_prompt")?,
        language: column(row, "language")?,
        created_at: parse_ts(&created_at, "created_at")?,
        expires_at: parse_ts(&expires_at, "expires_at")?,
        points: column(row, "points")?,
    })
}

fn row_to_message(row: &SqliteRow) -> Result<StoredMessage, StoreError> {
    let timestamp: String = column(row, "timestamp")?;
    Ok(StoredMessage {
        id: column(row, "id")?,
        thread_id: column(row, "thread_id")?,
        author_id: column(row, "author_id")?,
        body: column(row, "body")?,
        is_prompt: column(row, "is_prompt")?,
        ai_response_raw: column(row, "ai_response_raw")?,
        timestamp: parse_ts(&timestamp, "timestamp")?,
    })
}

/// An open SQLite write transaction.
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn upsert_user(&mut self, id: &str, display_name: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name
            "#,
        )
        .bind(id)
        .bind(display_name)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_err("upsert user", e))?;
        Ok(())
    }

    async fn upsert_thread(&mut self, thread: &Thread) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO threads (id, owner_id, original_prompt, language, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                original_prompt = excluded.original_prompt,
                language = excluded.language,
                created_at = excluded.created_at,
                expires_at = MAX(threads.expires_at, excluded.expires_at)
            "#,
        )
        .bind(&thread.id)
        .bind(&thread.owner_id)
        .bind(&thread.original_prompt)
        .bind(&thread.language)
        .bind(ts(thread.created_at))
        .bind(ts(thread.expires_at))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_err("upsert thread", e))?;

        debug!(thread_id = %thread.id, "Upserted thread");
        Ok(())
    }

    async fn get_thread(&mut self, id: &str) -> Result<Option<Thread>, StoreError> {
        let row = sqlx::query("SELECT * FROM threads WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| store_err("get thread", e))?;
        row.as_ref().map(row_to_thread).transpose()
    }

    async fn insert_message(&mut self, message: &NewMessage) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (thread_id, author_id, body, is_prompt, ai_response_raw, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&message.thread_id)
        .bind(&message.author_id)
        .bind(&message.body)
        .bind(message.is_prompt)
        .bind(&message.ai_response_raw)
        .bind(ts(message.timestamp))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_err("insert message", e))?;
        Ok(result.last_insert_rowid())
    }

    async fn clear_messages(&mut self, thread_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE thread_id = ?1")
            .bind(thread_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_err("clear messages", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_thread(&mut self, thread_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM threads WHERE id = ?1")
            .bind(thread_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_err("delete thread", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_language(
        &mut self,
        thread_id: &str,
        language: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE threads SET language = ?2 WHERE id = ?1")
            .bind(thread_id)
            .bind(language)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_err("set language", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn award_points(&mut self, award: &PointsAward) -> Result<(), StoreError> {
        let user = sqlx::query(
            r#"
            UPDATE users SET
                total_points = total_points + ?2,
                monthly_points = monthly_points + ?2,
                total_threads = total_threads + ?3
            WHERE id = ?1
            "#,
        )
        .bind(&award.user_id)
        .bind(award.points)
        .bind(i64::from(award.new_thread))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_err("award user points", e))?;

        if user.rows_affected() == 0 {
            return Err(StoreError::ConstraintViolation(format!(
                "award points: unknown user {}",
                award.user_id
            )));
        }

        let thread = sqlx::query("UPDATE threads SET points = points + ?2 WHERE id = ?1")
            .bind(&award.thread_id)
            .bind(award.points)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_err("award thread points", e))?;

        if thread.rows_affected() == 0 {
            return Err(StoreError::ConstraintViolation(format!(
                "award points: unknown thread {}",
                award.thread_id
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| store_err("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| store_err("rollback", e))
    }
}

#[async_trait]
impl TokenLedger for SqliteStore {
    async fn try_consume(
        &self,
        user_id: &str,
        date: NaiveDate,
        amount: u64,
        limit: u64,
    ) -> Result<bool, StoreError> {
        let amount = i64::try_from(amount).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        // Single statement: the check and the increment cannot interleave.
        let result = sqlx::query(
            r#"
            INSERT INTO token_usage (user_id, date, tokens)
            SELECT ?1, ?2, ?3 WHERE ?3 <= ?4
            ON CONFLICT(user_id, date) DO UPDATE SET tokens = token_usage.tokens + excluded.tokens
            WHERE token_usage.tokens + excluded.tokens <= ?4
            "#,
        )
        .bind(user_id)
        .bind(day(date))
        .bind(amount)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("try consume tokens", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn adjust(&self, user_id: &str, date: NaiveDate, delta: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO token_usage (user_id, date, tokens) VALUES (?1, ?2, MAX(?3, 0))
            ON CONFLICT(user_id, date) DO UPDATE SET tokens = MAX(token_usage.tokens + ?3, 0)
            "#,
        )
        .bind(user_id)
        .bind(day(date))
        .bind(delta)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("adjust tokens", e))?;
        Ok(())
    }

    async fn daily_usage(&self, user_id: &str, date: NaiveDate) -> Result<u64, StoreError> {
        let tokens: Option<i64> =
            sqlx::query_scalar("SELECT tokens FROM token_usage WHERE user_id = ?1 AND date = ?2")
                .bind(user_id)
                .bind(day(date))
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_err("daily usage", e))?;
        Ok(tokens.map_or(0, |t| u64::try_from(t).unwrap_or(0)))
    }

    async fn reset_daily_usage(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM token_usage")
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("reset token usage", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    /// Write transactions take the write lock up front so that a read
    /// followed by a write never has to upgrade a WAL snapshot.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| store_err("begin transaction", e))?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err("get user", e))?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>, StoreError> {
        let row = sqlx::query("SELECT * FROM threads WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err("get thread", e))?;
        row.as_ref().map(row_to_thread).transpose()
    }

    async fn thread_messages(&self, thread_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query("SELECT * FROM messages WHERE thread_id = ?1 ORDER BY id ASC")
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("thread messages", e))?;
        rows.iter().map(row_to_message).collect()
    }

    async fn monthly_ranking(&self, limit: usize) -> Result<Vec<RankEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, display_name, monthly_points FROM users
            ORDER BY monthly_points DESC, id ASC
            LIMIT ?1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("monthly ranking", e))?;

        rows.iter()
            .map(|row| {
                Ok(RankEntry {
                    user_id: column(row, "id")?,
                    display_name: column(row, "display_name")?,
                    monthly_points: column(row, "monthly_points")?,
                })
            })
            .collect()
    }

    async fn user_rank(&self, user_id: &str) -> Result<Option<(u64, u64)>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users o WHERE o.monthly_points > u.monthly_points) + 1
                    AS position,
                (SELECT COUNT(*) FROM users) AS total
            FROM users u WHERE u.id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("user rank", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let position: i64 = column(&row, "position")?;
        let total: i64 = column(&row, "total")?;
        Ok(Some((position.max(0) as u64, total.max(0) as u64)))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let count = |sql: &'static str| {
            let pool = self.pool.clone();
            async move {
                sqlx::query_scalar::<_, i64>(sql)
                    .fetch_one(&pool)
                    .await
                    .map(|n| n.max(0) as u64)
                    .map_err(|e| store_err(sql, e))
            }
        };

        let page_count = count("PRAGMA page_count").await?;
        let page_size = count("PRAGMA page_size").await?;

        Ok(StoreStats {
            users: count("SELECT COUNT(*) FROM users").await?,
            threads: count("SELECT COUNT(*) FROM threads").await?,
            messages: count("SELECT COUNT(*) FROM messages").await?,
            size_bytes: page_count * page_size,
        })
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let cutoff = ts(now);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("begin sweep", e))?;

        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM threads WHERE expires_at < ?1")
            .bind(&cutoff)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| store_err("select expired threads", e))?;

        sqlx::query("DELETE FROM threads WHERE expires_at < ?1")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("delete expired threads", e))?;

        tx.commit().await.map_err(|e| store_err("commit sweep", e))?;
        Ok(ids)
    }

    async fn reset_monthly_points(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE users SET monthly_points = 0, last_reset = ?1")
            .bind(ts(now))
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("reset monthly points", e))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    async fn test_store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    fn make_thread(id: &str, owner: &str, prompt: &str) -> Thread {
        Thread::open(id, owner, prompt, "en", Utc::now(), 7)
    }

    async fn seed_thread(store: &SqliteStore, thread: &Thread) {
        let mut tx = store.begin().await.unwrap();
        tx.upsert_user(&thread.owner_id, "Owner").await.unwrap();
        tx.upsert_thread(thread).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn thread_upsert_is_idempotent_and_last_write_wins() {
        let store = test_store().await;
        seed_thread(&store, &make_thread("t1", "u1", "first")).await;
        seed_thread(&store, &make_thread("t1", "u1", "second")).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.threads, 1);
        let thread = store.get_thread("t1").await.unwrap().unwrap();
        assert_eq!(thread.original_prompt, "second");
    }

    #[tokio::test]
    async fn expiry_never_moves_backwards() {
        let store = test_store().await;
        let long = make_thread("t1", "u1", "q");
        seed_thread(&store, &long).await;

        let mut short = long.clone();
        short.expires_at = long.expires_at - ChronoDuration::days(3);
        seed_thread(&store, &short).await;

        let stored = store.get_thread("t1").await.unwrap().unwrap();
        assert_eq!(ts(stored.expires_at), ts(long.expires_at));
    }

    #[tokio::test]
    async fn deleting_thread_cascades_messages() {
        let store = test_store().await;
        seed_thread(&store, &make_thread("t1", "u1", "q")).await;

        let mut tx = store.begin().await.unwrap();
        let now = Utc::now();
        tx.insert_message(&NewMessage::prompt("t1", "u1", "q", now))
            .await
            .unwrap();
        tx.insert_message(&NewMessage::reply("t1", "bot", "a", "a", now))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.thread_messages("t1").await.unwrap().len(), 2);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.delete_thread("t1").await.unwrap());
        tx.commit().await.unwrap();

        assert!(store.thread_messages("t1").await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().messages, 0);
    }

    #[tokio::test]
    async fn message_for_missing_thread_violates_constraint() {
        let store = test_store().await;
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .insert_message(&NewMessage::prompt("ghost", "u1", "q", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_partial_state() {
        let store = test_store().await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.upsert_user("u1", "Owner").await.unwrap();
            tx.upsert_thread(&make_thread("t1", "u1", "q")).await.unwrap();
            tx.rollback().await.unwrap();
        }
        assert!(store.get_thread("t1").await.unwrap().is_none());
        assert!(store.get_user("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn messages_come_back_in_creation_order() {
        let store = test_store().await;
        seed_thread(&store, &make_thread("t1", "u1", "q")).await;
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();
        for body in ["one", "two", "three"] {
            tx.insert_message(&NewMessage::prompt("t1", "u1", body, now))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let bodies: Vec<String> = store
            .thread_messages("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn award_points_updates_user_and_thread() {
        let store = test_store().await;
        seed_thread(&store, &make_thread("t1", "u1", "q")).await;

        let mut tx = store.begin().await.unwrap();
        tx.award_points(&PointsAward {
            user_id: "u1".into(),
            thread_id: "t1".into(),
            points: 5,
            new_thread: true,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.total_points, 5);
        assert_eq!(user.monthly_points, 5);
        assert_eq!(user.total_threads, 1);
        assert_eq!(store.get_thread("t1").await.unwrap().unwrap().points, 5);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_threads() {
        let store = test_store().await;
        let mut old = make_thread("old", "u1", "q");
        old.created_at = Utc::now() - ChronoDuration::days(10);
        old.expires_at = Utc::now() - ChronoDuration::days(3);
        seed_thread(&store, &old).await;
        seed_thread(&store, &make_thread("fresh", "u1", "q")).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_message(&NewMessage::prompt("old", "u1", "q", Utc::now()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let swept = store.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(swept, vec!["old".to_string()]);
        assert!(store.get_thread("fresh").await.unwrap().is_some());
        assert_eq!(store.stats().await.unwrap().messages, 0);

        // Running again is a no-op.
        assert!(store.sweep_expired(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn monthly_reset_keeps_total_points() {
        let store = test_store().await;
        seed_thread(&store, &make_thread("t1", "u1", "q")).await;
        let mut tx = store.begin().await.unwrap();
        tx.award_points(&PointsAward {
            user_id: "u1".into(),
            thread_id: "t1".into(),
            points: 3,
            new_thread: false,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.reset_monthly_points(Utc::now()).await.unwrap(), 1);
        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.monthly_points, 0);
        assert_eq!(user.total_points, 3);
        assert!(user.last_reset.is_some());
    }

    #[tokio::test]
    async fn try_consume_respects_limit() {
        let store = test_store().await;
        let today = Utc::now().date_naive();
        assert!(store.try_consume("u1", today, 60, 100).await.unwrap());
        assert!(store.try_consume("u1", today, 40, 100).await.unwrap());
        assert!(!store.try_consume("u1", today, 1, 100).await.unwrap());
        assert_eq!(store.daily_usage("u1", today).await.unwrap(), 100);

        // A first request larger than the limit is refused outright.
        assert!(!store.try_consume("u2", today, 101, 100).await.unwrap());
        assert_eq!(store.daily_usage("u2", today).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn adjust_never_goes_negative() {
        let store = test_store().await;
        let today = Utc::now().date_naive();
        store.adjust("u1", today, 30).await.unwrap();
        store.adjust("u1", today, -50).await.unwrap();
        assert_eq!(store.daily_usage("u1", today).await.unwrap(), 0);
        store.adjust("u1", today, 12).await.unwrap();
        assert_eq!(store.daily_usage("u1", today).await.unwrap(), 12);

        assert_eq!(store.reset_daily_usage().await.unwrap(), 1);
        assert_eq!(store.daily_usage("u1", today).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ranking_orders_by_monthly_points() {
        let store = test_store().await;
        for (user, points) in [("a", 1), ("b", 9), ("c", 4)] {
            let thread = make_thread(&format!("t-{user}"), user, "q");
            seed_thread(&store, &thread).await;
            let mut tx = store.begin().await.unwrap();
            tx.award_points(&PointsAward {
                user_id: user.into(),
                thread_id: thread.id.clone(),
                points,
                new_thread: true,
            })
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let top: Vec<String> = store
            .monthly_ranking(2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(top, ["b", "c"]);
        assert_eq!(store.user_rank("c").await.unwrap(), Some((2, 3)));
        assert_eq!(store.user_rank("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            seed_thread(&store, &make_thread("t1", "u1", "persisted")).await;
        }
        let store = SqliteStore::connect_with_retry(&path, 2, Duration::from_millis(1))
            .await
            .unwrap();
        let thread = store.get_thread("t1").await.unwrap().unwrap();
        assert_eq!(thread.original_prompt, "persisted");
        assert!(store.stats().await.unwrap().size_bytes > 0);
    }

    #[test]
    fn busy_codes_are_recognized() {
        assert!(is_busy(Some("5")));
        assert!(is_busy(Some("517")));
        assert!(is_busy(Some("6")));
        assert!(!is_busy(Some("19")));
        assert!(!is_busy(None));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_read_then_write_transactions_all_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("busy.db")).await.unwrap());
        for t in 0..8 {
            seed_thread(&store, &make_thread(&format!("t{t}"), "owner", "q")).await;
        }

        let mut tasks = Vec::new();
        for i in 0..64 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let thread_id = format!("t{}", i % 8);
                let user_id = format!("u{i}");
                store.get_thread(&thread_id).await?;
                let mut tx = store.begin().await?;
                tx.upsert_user(&user_id, "Replier").await?;
                tx.insert_message(&NewMessage::prompt(&thread_id, &user_id, "hi", Utc::now()))
                    .await?;
                tx.commit().await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.stats().await.unwrap().messages, 64);
    }
}
