//! Discord adapter (stub).
//!
//! Implements [`ChatAdapter`] with in-process bookkeeping instead of a
//! gateway connection: sent messages, threads and deletions are recorded,
//! and button presses are injected through [`DiscordAdapter::press`].

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use threadsage_core::channel::{
    ChatAdapter, Choice, MessageHandle, Permission, Selection, ThreadHandle,
};
use threadsage_core::error::ChannelError;

use crate::selection::{Delivery, SelectionHub};

/// Discord adapter configuration.
#[derive(Clone, Default)]
pub struct DiscordConfig {
    /// Bot token from the Discord Developer Portal.
    pub bot_token: String,
    /// Channel IDs the bot may post in. Empty = all channels.
    pub allowed_channels: Vec<String>,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &"[REDACTED]")
            .field("allowed_channels", &self.allowed_channels)
            .finish()
    }
}

/// A message as the adapter delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub handle: MessageHandle,
    pub content: String,
    pub choices: Vec<Choice>,
    /// Code language the message is rendered with, if any.
    pub language: Option<String>,
}

#[derive(Default)]
struct Ledger {
    sent: Vec<SentMessage>,
    threads: HashMap<String, (ThreadHandle, String)>,
    deleted: Vec<MessageHandle>,
    denied: Vec<Permission>,
    scripted: VecDeque<Selection>,
}

/// Discord adapter.
pub struct DiscordAdapter {
    config: DiscordConfig,
    hub: SelectionHub,
    next_id: AtomicU64,
    ledger: Mutex<Ledger>,
}

impl DiscordAdapter {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            hub: SelectionHub::new(),
            next_id: AtomicU64::new(1),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snowflake(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn record(
        &self,
        target: &str,
        content: &str,
        choices: &[Choice],
        language: Option<&str>,
    ) -> MessageHandle {
        let handle = MessageHandle {
            target: target.to_string(),
            id: self.snowflake(),
        };
        self.ledger().sent.push(SentMessage {
            handle: handle.clone(),
            content: content.to_string(),
            choices: choices.to_vec(),
            language: language.map(str::to_string),
        });
        handle
    }

    /// Inject a button press on a prompt message, as the gateway would.
    pub fn press(&self, prompt: &MessageHandle, user_id: &str, choice: &str) -> Delivery {
        self.hub.deliver(
            &prompt.id,
            Selection {
                user_id: user_id.into(),
                choice: choice.into(),
            },
        )
    }

    /// Queue a press that answers the next selection wait immediately.
    pub fn script_selection(&self, user_id: &str, choice: &str) {
        self.ledger().scripted.push_back(Selection {
            user_id: user_id.into(),
            choice: choice.into(),
        });
    }

    /// Pretend the bot lacks `permission` everywhere.
    pub fn deny(&self, permission: Permission) {
        self.ledger().denied.push(permission);
    }

    pub fn hub(&self) -> &SelectionHub {
        &self.hub
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.ledger().sent.clone()
    }

    /// Contents sent to `target`, in order, excluding deleted messages.
    pub fn contents_in(&self, target: &str) -> Vec<String> {
        let ledger = self.ledger();
        ledger
            .sent
            .iter()
            .filter(|m| m.handle.target == target && !ledger.deleted.contains(&m.handle))
            .map(|m| m.content.clone())
            .collect()
    }

    pub fn thread_name(&self, thread_id: &str) -> Option<String> {
        self.ledger()
            .threads
            .get(thread_id)
            .map(|(_, name)| name.clone())
    }

    pub fn deleted(&self) -> Vec<MessageHandle> {
        self.ledger().deleted.clone()
    }

    fn channel_allowed(&self, channel: &str) -> bool {
        self.config.allowed_channels.is_empty()
            || self.config.allowed_channels.iter().any(|c| c == channel)
    }
}

#[async_trait]
impl ChatAdapter for DiscordAdapter {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, target: &str, content: &str) -> Result<MessageHandle, ChannelError> {
        self.send_chunk(target, content, None).await
    }

    async fn send_chunk(
        &self,
        target: &str,
        content: &str,
        language: Option<&str>,
    ) -> Result<MessageHandle, ChannelError> {
        if content.chars().count() > crate::DISCORD_MESSAGE_LIMIT {
            return Err(ChannelError::SendFailed {
                target: target.into(),
                reason: format!(
                    "message exceeds {} characters",
                    crate::DISCORD_MESSAGE_LIMIT
                ),
            });
        }
        let handle = self.record(target, content, &[], language);
        info!(
            channel = %target,
            message_id = %handle.id,
            content_len = content.len(),
            language = language.unwrap_or("-"),
            "Discord send (stub)"
        );
        Ok(handle)
    }

    async fn send_prompt(
        &self,
        target: &str,
        content: &str,
        choices: &[Choice],
    ) -> Result<MessageHandle, ChannelError> {
        let handle = self.record(target, content, choices, None);
        info!(channel = %target, message_id = %handle.id, buttons = choices.len(), "Discord prompt (stub)");
        Ok(handle)
    }

    async fn create_thread(
        &self,
        parent: &str,
        title: &str,
    ) -> Result<ThreadHandle, ChannelError> {
        let handle = ThreadHandle {
            id: self.snowflake(),
            parent: parent.to_string(),
        };
        self.ledger()
            .threads
            .insert(handle.id.clone(), (handle.clone(), title.to_string()));
        info!(parent = %parent, thread_id = %handle.id, "Discord thread created (stub)");
        Ok(handle)
    }

    async fn rename_thread(&self, thread: &ThreadHandle, name: &str) -> Result<(), ChannelError> {
        let mut ledger = self.ledger();
        let entry = ledger
            .threads
            .entry(thread.id.clone())
            .or_insert_with(|| (thread.clone(), String::new()));
        entry.1 = name.to_string();
        Ok(())
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        let mut ledger = self.ledger();
        if !ledger.sent.iter().any(|m| &m.handle == handle) {
            return Err(ChannelError::NotFound(handle.id.clone()));
        }
        ledger.deleted.push(handle.clone());
        Ok(())
    }

    async fn await_selection(
        &self,
        prompt: &MessageHandle,
        valid_choices: &[String],
        timeout: Duration,
    ) -> Result<Option<Selection>, ChannelError> {
        let scripted = self.ledger().scripted.pop_front();
        if let Some(selection) = scripted {
            return Ok(Some(selection));
        }
        Ok(self.hub.wait(&prompt.id, valid_choices, timeout).await)
    }

    async fn missing_permissions(
        &self,
        channel: &str,
        required: &[Permission],
    ) -> Result<Vec<Permission>, ChannelError> {
        if !self.channel_allowed(channel) {
            return Ok(required.to_vec());
        }
        let ledger = self.ledger();
        Ok(required
            .iter()
            .copied()
            .filter(|p| ledger.denied.contains(p))
            .collect())
    }
}
