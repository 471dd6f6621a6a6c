//! The session engine — one gateway event in, one answered turn out.
//!
//! Flow per turn:
//!
//! 1. Validate the prompt and (for new threads) platform permissions
//! 2. Persist user, thread and prompt row in one transaction
//! 3. Negotiate the response style
//! 4. Assemble context and route to a provider
//! 5. Normalize and cap the answer
//! 6. Persist the reply row and points in a second transaction
//! 7. Chunk and send
//!
//! A provider failure aborts before step 6, so no reply row is written and
//! no points are awarded.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use threadsage_config::{AppConfig, SessionConfig};
use threadsage_core::channel::{ChatAdapter, Permission, ThreadHandle};
use threadsage_core::error::{Result, SessionError};
use threadsage_core::event::GatewayEvent;
use threadsage_core::message::ContextEntry;
use threadsage_core::provider::GenerateRequest;
use threadsage_core::session::{NewMessage, RankEntry, ResponseStyle, StoreStats, Thread};
use threadsage_core::store::{PointsAward, SessionStore};
use threadsage_providers::ProviderRouter;

use crate::context::{ContextAssembler, TurnInput, effective_prompt, is_supported_language};
use crate::format::{chunk, normalize, truncate_with_ellipsis};
use crate::style::StyleNegotiator;

/// Permissions the bot needs in a channel before opening a thread there.
pub const REQUIRED_PERMISSIONS: &[Permission] = &[
    Permission::SendMessages,
    Permission::CreateThreads,
    Permission::ManageMessages,
];

const TITLE_PREFIX: &str = "💬 ";
const TITLE_MAX_CHARS: usize = 90;

/// What a completed turn did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReport {
    pub thread_id: String,
    pub reply_id: i64,
    pub style: ResponseStyle,
    /// No qualifying style choice arrived before the deadline.
    pub timed_out: bool,
    pub provider: String,
    pub chunks_sent: usize,
    pub points_awarded: i64,
}

/// A user's points and leaderboard position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub display_name: String,
    pub total_points: i64,
    pub monthly_points: i64,
    pub total_threads: i64,
    /// `(position, total users)`, 1-based.
    pub rank: Option<(u64, u64)>,
}

/// Points and thread-count effect of a turn.
#[derive(Debug, Clone, Copy)]
struct Award {
    points: i64,
    new_thread: bool,
}

/// Orchestrates session flows over the store, router and chat adapter.
pub struct SessionEngine {
    /// Durable state
    store: Arc<dyn SessionStore>,

    /// Budget-gated provider tiers
    router: Arc<ProviderRouter>,

    /// Chat platform
    adapter: Arc<dyn ChatAdapter>,

    assembler: ContextAssembler,

    negotiator: StyleNegotiator,

    session: SessionConfig,

    /// Cap for Simple answers, in characters
    simple_max_chars: usize,

    /// Transport limit per message, in characters
    max_message_len: usize,
}

impl SessionEngine {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn SessionStore>,
        router: Arc<ProviderRouter>,
        adapter: Arc<dyn ChatAdapter>,
    ) -> Self {
        Self {
            store,
            router,
            adapter,
            assembler: ContextAssembler::new(config.session.max_history_turns),
            negotiator: StyleNegotiator::from_config(&config.style),
            session: config.session.clone(),
            simple_max_chars: config.style.simple_max_chars,
            max_message_len: config.formatter.max_message_len,
        }
    }

    /// Replace the style negotiator (e.g. a shorter wait for the console).
    pub fn with_negotiator(mut self, negotiator: StyleNegotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Dispatch a gateway event to the matching flow.
    ///
    /// Failures are reported in the chat as well as returned.
    pub async fn handle(&self, event: &GatewayEvent) -> Result<TurnReport> {
        match (&event.channel.thread_id, event.is_new_session) {
            (None, _) => self.ask(event).await,
            (Some(thread_id), true) => self.renew(event, thread_id).await,
            (Some(thread_id), false) => self.reply(event, thread_id).await,
        }
    }

    /// Open a new thread for a top-level question and answer it.
    pub async fn ask(&self, event: &GatewayEvent) -> Result<TurnReport> {
        let channel_id = event.channel.channel_id.as_str();
        let thread = match self.open_thread(event).await {
            Ok(thread) => thread,
            Err(e) => return Err(self.report(channel_id, e).await),
        };

        let award = Award {
            points: self.session.new_thread_points,
            new_thread: true,
        };
        let language = thread.language.clone();
        let prompt = thread.original_prompt.clone();
        match self.run_turn(&thread, event, &prompt, &language, award).await {
            Ok(report) => Ok(report),
            Err(e) => Err(self.report(&thread.id, e).await),
        }
    }

    /// Answer a follow-up inside an existing thread.
    pub async fn reply(&self, event: &GatewayEvent, thread_id: &str) -> Result<TurnReport> {
        let outcome: Result<TurnReport> = async {
            let prompt = effective_prompt(&event.text, event.image.as_ref())?;

            let mut tx = self.store.begin().await?;
            let thread = tx
                .get_thread(thread_id)
                .await?
                .ok_or_else(|| SessionError::NotFound(thread_id.to_string()))?;
            let language = match self.turn_language(event, &thread.language) {
                Ok(language) => language,
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e);
                }
            };
            tx.upsert_user(&event.user_id, &event.display_name).await?;
            tx.insert_message(&NewMessage::prompt(
                thread_id,
                &event.user_id,
                &prompt,
                Utc::now(),
            ))
            .await?;
            tx.commit().await?;

            let award = Award {
                points: self.session.reply_points,
                new_thread: false,
            };
            self.run_turn(&thread, event, &prompt, &language, award).await
        }
        .await;

        match outcome {
            Ok(report) => Ok(report),
            Err(e) => Err(self.report(thread_id, e).await),
        }
    }

    /// Reset a thread in place: wipe its messages, retitle it, and answer
    /// the new prompt as a fresh opening turn. Owner or admin only.
    pub async fn renew(&self, event: &GatewayEvent, thread_id: &str) -> Result<TurnReport> {
        let outcome: Result<TurnReport> = async {
            let prompt = effective_prompt(&event.text, event.image.as_ref())?;
            let existing = self
                .store
                .get_thread(thread_id)
                .await?
                .ok_or_else(|| SessionError::NotFound(thread_id.to_string()))?;
            self.require_manager(&existing, &event.user_id)?;
            let language = self.turn_language(event, &existing.language)?;

            let now = Utc::now();
            let mut tx = self.store.begin().await?;
            let current = tx
                .get_thread(thread_id)
                .await?
                .ok_or_else(|| SessionError::NotFound(thread_id.to_string()))?;
            let renewed = Thread::open(
                thread_id,
                &current.owner_id,
                &prompt,
                &language,
                now,
                self.session.thread_lifetime_days,
            );
            tx.upsert_user(&event.user_id, &event.display_name).await?;
            let cleared = tx.clear_messages(thread_id).await?;
            tx.upsert_thread(&renewed).await?;
            tx.insert_message(&NewMessage::prompt(thread_id, &event.user_id, &prompt, now))
                .await?;
            tx.commit().await?;
            info!(thread_id, user_id = %event.user_id, cleared, "Thread renewed");

            let title = self.title_for(&prompt).await;
            let handle = ThreadHandle {
                id: thread_id.to_string(),
                parent: event.channel.channel_id.clone(),
            };
            if let Err(e) = self.adapter.rename_thread(&handle, &title).await {
                warn!(thread_id, error = %e, "Could not rename thread");
            }

            let award = Award {
                points: self.session.new_thread_points,
                new_thread: true,
            };
            self.run_turn(&renewed, event, &prompt, &language, award).await
        }
        .await;

        match outcome {
            Ok(report) => Ok(report),
            Err(e) => Err(self.report(thread_id, e).await),
        }
    }

    /// Delete a thread and its messages. Owner or admin only.
    pub async fn clear_thread(&self, thread_id: &str, requestor_id: &str) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let thread = tx
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(thread_id.to_string()))?;
        self.require_manager(&thread, requestor_id)?;
        tx.delete_thread(thread_id).await?;
        tx.commit().await?;
        info!(thread_id, requestor_id, "Thread cleared");
        Ok(())
    }

    /// Change the answer language of a thread. Owner or admin only.
    pub async fn set_language(
        &self,
        thread_id: &str,
        requestor_id: &str,
        language: &str,
    ) -> Result<()> {
        if !is_supported_language(language) {
            return Err(SessionError::Validation(format!(
                "unsupported language '{language}'"
            )));
        }
        let mut tx = self.store.begin().await?;
        let thread = tx
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(thread_id.to_string()))?;
        self.require_manager(&thread, requestor_id)?;
        tx.set_language(thread_id, language).await?;
        tx.commit().await?;
        info!(thread_id, language, "Thread language changed");
        Ok(())
    }

    /// Points and rank for a user. `None` when unknown or the store fails.
    pub async fn get_stats(&self, user_id: &str) -> Option<UserStats> {
        let user = match self.store.get_user(user_id).await {
            Ok(user) => user?,
            Err(e) => {
                warn!(user_id, error = %e, "Stats lookup failed");
                return None;
            }
        };
        let rank = self.store.user_rank(user_id).await.unwrap_or_else(|e| {
            warn!(user_id, error = %e, "Rank lookup failed");
            None
        });
        Some(UserStats {
            user_id: user.id,
            display_name: user.display_name,
            total_points: user.total_points,
            monthly_points: user.monthly_points,
            total_threads: user.total_threads,
            rank,
        })
    }

    /// Monthly leaderboard; empty when the store fails.
    pub async fn ranking(&self, limit: usize) -> Vec<RankEntry> {
        self.store.monthly_ranking(limit).await.unwrap_or_else(|e| {
            warn!(error = %e, "Ranking query failed");
            Vec::new()
        })
    }

    /// Row counts and store size.
    pub async fn check(&self) -> Result<StoreStats> {
        Ok(self.store.stats().await?)
    }

    // ── Steps ──────────────────────────────────────────────────────────────

    async fn open_thread(&self, event: &GatewayEvent) -> Result<Thread> {
        let prompt = effective_prompt(&event.text, event.image.as_ref())?;
        let language = self.turn_language(event, &self.session.default_language)?;
        let channel_id = event.channel.channel_id.as_str();

        let missing = self
            .adapter
            .missing_permissions(channel_id, REQUIRED_PERMISSIONS)
            .await?;
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return Err(SessionError::Permission(format!(
                "the bot is missing permissions here: {}",
                names.join(", ")
            )));
        }

        let title = self.title_for(&prompt).await;
        let handle = self.adapter.create_thread(channel_id, &title).await?;

        let now = Utc::now();
        let thread = Thread::open(
            &handle.id,
            &event.user_id,
            &prompt,
            language,
            now,
            self.session.thread_lifetime_days,
        );

        let mut tx = self.store.begin().await?;
        tx.upsert_user(&event.user_id, &event.display_name).await?;
        tx.upsert_thread(&thread).await?;
        tx.insert_message(&NewMessage::prompt(&thread.id, &event.user_id, &prompt, now))
            .await?;
        tx.commit().await?;

        info!(
            thread_id = %thread.id,
            user_id = %event.user_id,
            channel_id,
            "Thread opened"
        );
        Ok(thread)
    }

    /// Negotiate, generate, persist and deliver one answer.
    async fn run_turn(
        &self,
        thread: &Thread,
        event: &GatewayEvent,
        prompt: &str,
        language: &str,
        award: Award,
    ) -> Result<TurnReport> {
        let qualifying = [thread.owner_id.as_str(), event.user_id.as_str()];
        let negotiated = self
            .negotiator
            .negotiate(self.adapter.as_ref(), &thread.id, &qualifying)
            .await;

        let turn = TurnInput {
            text: prompt,
            image: event.image.as_ref(),
            style: negotiated.style,
            language,
        };
        let entries = self.assembler.load(self.store.as_ref(), thread, &turn).await?;
        let routed = self
            .router
            .generate(&event.user_id, GenerateRequest::new(entries))
            .await?;

        let raw = routed.generation.text;
        let mut body = normalize(&raw);
        if negotiated.style == ResponseStyle::Simple {
            body = truncate_with_ellipsis(&body, self.simple_max_chars);
        }

        let reply_id = self
            .persist_reply(&thread.id, &event.user_id, &body, &raw, award)
            .await?;

        let chunks = chunk(&body, self.max_message_len);
        for piece in &chunks {
            self.adapter
                .send_chunk(&thread.id, &piece.content, piece.language.as_deref())
                .await?;
        }

        info!(
            thread_id = %thread.id,
            provider = %routed.provider,
            tokens = routed.tokens_charged,
            chunks = chunks.len(),
            "Turn answered"
        );

        Ok(TurnReport {
            thread_id: thread.id.clone(),
            reply_id,
            style: negotiated.style,
            timed_out: negotiated.timed_out,
            provider: routed.provider,
            chunks_sent: chunks.len(),
            points_awarded: award.points,
        })
    }

    async fn persist_reply(
        &self,
        thread_id: &str,
        user_id: &str,
        body: &str,
        raw: &str,
        award: Award,
    ) -> Result<i64> {
        let mut tx = self.store.begin().await?;
        if tx.get_thread(thread_id).await?.is_none() {
            tx.rollback().await?;
            return Err(SessionError::NotFound(thread_id.to_string()));
        }
        let reply_id = tx
            .insert_message(&NewMessage::reply(
                thread_id,
                &self.session.bot_id,
                body,
                raw,
                Utc::now(),
            ))
            .await?;
        tx.award_points(&PointsAward {
            user_id: user_id.to_string(),
            thread_id: thread_id.to_string(),
            points: award.points,
            new_thread: award.new_thread,
        })
        .await?;
        tx.commit().await?;
        Ok(reply_id)
    }

    /// A short thread title from the auxiliary provider, or the prompt itself.
    async fn title_for(&self, prompt: &str) -> String {
        let request = GenerateRequest::new(vec![ContextEntry::user(format!(
            "Write a VERY SHORT title (1-5 words, at most 25 characters) for this question: \"{prompt}\". Reply with the title only."
        ))])
        .with_max_tokens(32);

        let title = match self.router.generate_auxiliary(request).await {
            Ok(generation) => generation
                .text
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .trim_matches(|c| c == '"' || c == '*')
                .to_string(),
            Err(e) => {
                warn!(error = %e, "Title generation failed, using the prompt");
                String::new()
            }
        };
        let title = if title.is_empty() { prompt } else { title.as_str() };
        format!("{TITLE_PREFIX}{title}")
            .chars()
            .take(TITLE_MAX_CHARS)
            .collect()
    }

    fn turn_language(&self, event: &GatewayEvent, fallback: &str) -> Result<String> {
        match event.language.as_deref() {
            Some(code) if !is_supported_language(code) => Err(SessionError::Validation(format!(
                "unsupported language '{code}'"
            ))),
            Some(code) => Ok(code.to_string()),
            None => Ok(fallback.to_string()),
        }
    }

    fn require_manager(&self, thread: &Thread, user_id: &str) -> Result<()> {
        if thread.can_manage(user_id, self.session.admin_id.as_deref()) {
            Ok(())
        } else {
            Err(SessionError::Permission(
                "only the thread owner or an admin can do that".into(),
            ))
        }
    }

    /// Log `error`, tell the user in `target`, and hand the error back.
    async fn report(&self, target: &str, error: SessionError) -> SessionError {
        match &error {
            SessionError::Persistence(_) | SessionError::Channel(_) => {
                error!(channel = %target, error = %error, "Session flow failed")
            }
            _ => warn!(channel = %target, error = %error, "Session flow rejected"),
        }
        if let Err(e) = self.adapter.send(target, &error.user_message()).await {
            warn!(channel = %target, error = %e, "Could not report failure to the user");
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate};
    use threadsage_channels::{DiscordAdapter, DiscordConfig};
    use threadsage_core::error::{ProviderError, StoreError};
    use threadsage_core::session::{StoredMessage, User};
    use threadsage_core::store::{StoreTx, TokenLedger};
    use threadsage_core::provider::{GenerativeProvider, Generation};
    use threadsage_providers::TokenBudget;
    use threadsage_store::InMemoryStore;

    struct FixedProvider(&'static str);

    #[async_trait]
    impl GenerativeProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(
            &self,
            _request: GenerateRequest,
        ) -> std::result::Result<Generation, ProviderError> {
            Ok(Generation {
                text: self.0.to_string(),
                tokens_used: Some(12),
                model: "mock".into(),
            })
        }
    }

    fn engine(
        answer: &'static str,
        config: AppConfig,
    ) -> (SessionEngine, Arc<InMemoryStore>, Arc<DiscordAdapter>) {
        let store = Arc::new(InMemoryStore::new());
        let adapter = Arc::new(DiscordAdapter::new(DiscordConfig::default()));
        let router = ProviderRouter::new(TokenBudget::new(store.clone(), 10_000)).add(
            Arc::new(FixedProvider(answer)),
            Duration::from_secs(5),
            true,
        );
        let engine = SessionEngine::new(&config, store.clone(), Arc::new(router), adapter.clone());
        (engine, store, adapter)
    }

    #[tokio::test]
    async fn simple_answers_are_normalized_and_capped() {
        let mut config = AppConfig::default();
        config.style.simple_max_chars = 10;
        let (engine, store, adapter) = engine(r"x^2 \times y is long enough", config);

        adapter.script_selection("u1", "simple");
        let report = engine
            .handle(&GatewayEvent::ask("u1", "Ann", "c1", "question"))
            .await
            .unwrap();
        assert_eq!(report.style, ResponseStyle::Simple);

        let rows = store.thread_messages(&report.thread_id).await.unwrap();
        assert_eq!(rows[1].body, "x² × y is ...");
        assert_eq!(rows[1].ai_response_raw.as_deref(), Some(r"x^2 \times y is long enough"));
        assert_eq!(adapter.contents_in(&report.thread_id), ["x² × y is ..."]);
    }

    #[tokio::test]
    async fn long_answers_are_sent_in_chunks() {
        let mut config = AppConfig::default();
        config.formatter.max_message_len = 20;
        let (engine, _store, adapter) =
            engine("one two three four five six seven eight nine ten", config);

        adapter.script_selection("u1", "detailed");
        let report = engine
            .handle(&GatewayEvent::ask("u1", "Ann", "c1", "count"))
            .await
            .unwrap();
        assert!(report.chunks_sent > 1);
        let sent = adapter.contents_in(&report.thread_id);
        assert_eq!(sent.concat(), "one two three four five six seven eight nine ten");
        assert!(sent.iter().all(|s| s.chars().count() <= 20));
    }

    #[tokio::test]
    async fn missing_permission_stops_before_thread_creation() {
        let (engine, store, adapter) = engine("answer", AppConfig::default());
        adapter.deny(Permission::CreateThreads);

        let err = engine
            .handle(&GatewayEvent::ask("u1", "Ann", "c1", "question"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Permission(_)));
        assert_eq!(store.stats().await.unwrap().threads, 0);
        assert_eq!(adapter.contents_in("c1").len(), 1);
    }

    #[tokio::test]
    async fn empty_question_is_a_validation_error() {
        let (engine, _store, adapter) = engine("answer", AppConfig::default());
        let err = engine
            .handle(&GatewayEvent::ask("u1", "Ann", "c1", "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        assert!(adapter.contents_in("c1")[0].starts_with("⚠️"));
    }

    #[tokio::test]
    async fn unsupported_language_is_rejected() {
        let (engine, _store, _adapter) = engine("answer", AppConfig::default());
        let event = GatewayEvent::ask("u1", "Ann", "c1", "question").with_language("tlh");
        assert!(matches!(
            engine.handle(&event).await,
            Err(SessionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn set_language_is_owner_only_and_validated() {
        let (engine, store, adapter) = engine("answer", AppConfig::default());
        adapter.script_selection("u1", "simple");
        let report = engine
            .handle(&GatewayEvent::ask("u1", "Ann", "c1", "question"))
            .await
            .unwrap();
        let id = report.thread_id.as_str();

        assert!(matches!(
            engine.set_language(id, "u2", "en").await,
            Err(SessionError::Permission(_))
        ));
        assert!(matches!(
            engine.set_language(id, "u1", "tlh").await,
            Err(SessionError::Validation(_))
        ));
        engine.set_language(id, "u1", "en").await.unwrap();
        assert_eq!(store.get_thread(id).await.unwrap().unwrap().language, "en");
    }

    #[tokio::test]
    async fn title_falls_back_to_prompt_prefix() {
        let (engine, _store, _adapter) = engine("", AppConfig::default());
        let long = "q".repeat(200);
        let title = engine.title_for(&long).await;
        assert!(title.starts_with(TITLE_PREFIX));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS);
    }

    #[tokio::test]
    async fn title_uses_first_line_of_generation() {
        let (engine, _store, _adapter) = engine("\"Simple Sums\"\nextra", AppConfig::default());
        assert_eq!(engine.title_for("What is 2+2?").await, "💬 Simple Sums");
    }

    #[tokio::test]
    async fn rejected_follow_up_language_leaves_thread_untouched() {
        let (engine, store, adapter) = engine("answer", AppConfig::default());
        adapter.script_selection("u1", "simple");
        let report = engine
            .handle(&GatewayEvent::ask("u1", "Ann", "c1", "question"))
            .await
            .unwrap();
        let id = report.thread_id.as_str();
        assert_eq!(store.thread_messages(id).await.unwrap().len(), 2);

        let follow_up = GatewayEvent::reply("u2", "Bob", "c1", id, "hi").with_language("tlh");
        assert!(matches!(
            engine.handle(&follow_up).await,
            Err(SessionError::Validation(_))
        ));
        assert_eq!(store.thread_messages(id).await.unwrap().len(), 2);
        assert!(store.get_user("u2").await.unwrap().is_none());
    }

    /// Reads pass through; every write transaction fails to open.
    struct ReadOnlyStore(Arc<InMemoryStore>);

    #[async_trait]
    impl TokenLedger for ReadOnlyStore {
        async fn try_consume(
            &self,
            user_id: &str,
            date: NaiveDate,
            tokens: u64,
            limit: u64,
        ) -> std::result::Result<bool, StoreError> {
            self.0.try_consume(user_id, date, tokens, limit).await
        }

        async fn adjust(
            &self,
            user_id: &str,
            date: NaiveDate,
            delta: i64,
        ) -> std::result::Result<(), StoreError> {
            self.0.adjust(user_id, date, delta).await
        }

        async fn daily_usage(
            &self,
            user_id: &str,
            date: NaiveDate,
        ) -> std::result::Result<u64, StoreError> {
            self.0.daily_usage(user_id, date).await
        }

        async fn reset_daily_usage(&self) -> std::result::Result<u64, StoreError> {
            self.0.reset_daily_usage().await
        }
    }

    #[async_trait]
    impl SessionStore for ReadOnlyStore {
        fn name(&self) -> &str {
            "read-only"
        }

        async fn begin(&self) -> std::result::Result<Box<dyn StoreTx>, StoreError> {
            Err(StoreError::Unavailable("database is locked".into()))
        }

        async fn get_user(&self, id: &str) -> std::result::Result<Option<User>, StoreError> {
            self.0.get_user(id).await
        }

        async fn get_thread(&self, id: &str) -> std::result::Result<Option<Thread>, StoreError> {
            self.0.get_thread(id).await
        }

        async fn thread_messages(
            &self,
            thread_id: &str,
        ) -> std::result::Result<Vec<StoredMessage>, StoreError> {
            self.0.thread_messages(thread_id).await
        }

        async fn monthly_ranking(
            &self,
            limit: usize,
        ) -> std::result::Result<Vec<RankEntry>, StoreError> {
            self.0.monthly_ranking(limit).await
        }

        async fn user_rank(
            &self,
            user_id: &str,
        ) -> std::result::Result<Option<(u64, u64)>, StoreError> {
            self.0.user_rank(user_id).await
        }

        async fn stats(&self) -> std::result::Result<StoreStats, StoreError> {
            self.0.stats().await
        }

        async fn sweep_expired(
            &self,
            now: DateTime<Utc>,
        ) -> std::result::Result<Vec<String>, StoreError> {
            self.0.sweep_expired(now).await
        }

        async fn reset_monthly_points(
            &self,
            now: DateTime<Utc>,
        ) -> std::result::Result<u64, StoreError> {
            self.0.reset_monthly_points(now).await
        }
    }

    #[tokio::test]
    async fn failed_renew_leaves_thread_name_alone() {
        let store = Arc::new(InMemoryStore::new());
        let mut tx = store.begin().await.unwrap();
        tx.upsert_user("u1", "Ann").await.unwrap();
        tx.upsert_thread(&Thread::open("t1", "u1", "old question", "en", Utc::now(), 7))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let adapter = Arc::new(DiscordAdapter::new(DiscordConfig::default()));
        let router = ProviderRouter::new(TokenBudget::new(store.clone(), 10_000)).add(
            Arc::new(FixedProvider("New Title")),
            Duration::from_secs(5),
            true,
        );
        let engine = SessionEngine::new(
            &AppConfig::default(),
            Arc::new(ReadOnlyStore(store.clone())),
            Arc::new(router),
            adapter.clone(),
        );

        let event = GatewayEvent::reply("u1", "Ann", "c1", "t1", "new question").renewing();
        assert!(matches!(
            engine.handle(&event).await,
            Err(SessionError::Persistence(_))
        ));
        assert_eq!(adapter.thread_name("t1"), None);
        let thread = store.get_thread("t1").await.unwrap().unwrap();
        assert_eq!(thread.original_prompt, "old question");
    }

    #[tokio::test]
    async fn sliced_code_block_arrives_tagged() {
        let mut config = AppConfig::default();
        config.formatter.max_message_len = 30;
        let answer: &'static str =
            "Try this:\n```python\nx = 1\nx = 2\nx = 3\nx = 4\nx = 5\nx = 6\nx = 7\n```\nDone.";
        let (engine, _store, adapter) = engine(answer, config);

        adapter.script_selection("u1", "detailed");
        let report = engine
            .handle(&GatewayEvent::ask("u1", "Ann", "c1", "code please"))
            .await
            .unwrap();

        let sent: Vec<_> = adapter
            .sent()
            .into_iter()
            .filter(|m| m.handle.target == report.thread_id && m.choices.is_empty())
            .collect();
        let tagged: Vec<_> = sent
            .iter()
            .filter(|m| m.language.as_deref() == Some("python"))
            .collect();
        assert!(tagged.len() > 1);
        assert!(tagged.iter().any(|m| !m.content.contains("```python")));
        let joined: String = sent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(joined, answer);
    }
}
