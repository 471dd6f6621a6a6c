//! ChatAdapter trait — the abstraction over the chat platform.
//!
//! The engine never talks to a platform SDK directly. It sends messages,
//! creates and renames threads, and waits for button selections through
//! this trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// A message the adapter sent on our behalf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    /// Where the message lives (channel or thread id).
    pub target: String,
    /// Platform message id.
    pub id: String,
}

/// A thread the adapter created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadHandle {
    pub id: String,
    pub parent: String,
}

/// A selectable option attached to a prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Stable identifier returned in a [`Selection`].
    pub id: String,
    pub label: String,
}

impl Choice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// A user's pick on a prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub user_id: String,
    pub choice: String,
}

/// Platform permissions the engine needs before starting a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    SendMessages,
    CreateThreads,
    ManageMessages,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Permission::SendMessages => "send messages",
            Permission::CreateThreads => "create threads",
            Permission::ManageMessages => "manage messages",
        };
        f.write_str(name)
    }
}

/// The chat platform capability used by the session engine.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Human-readable name of this adapter (e.g., "discord").
    fn name(&self) -> &str;

    /// Send a plain message to a channel or thread.
    async fn send(&self, target: &str, content: &str) -> Result<MessageHandle, ChannelError>;

    /// Send one chunk of a longer reply.
    ///
    /// `language` is the code-fence tag the chunk belongs to, so adapters with
    /// rich code rendering can keep highlighting continuation slices that no
    /// longer contain the opening fence.
    async fn send_chunk(
        &self,
        target: &str,
        content: &str,
        _language: Option<&str>,
    ) -> Result<MessageHandle, ChannelError> {
        self.send(target, content).await
    }

    /// Send a message carrying selectable choices.
    ///
    /// Adapters without native buttons fall back to listing the choices.
    async fn send_prompt(
        &self,
        target: &str,
        content: &str,
        choices: &[Choice],
    ) -> Result<MessageHandle, ChannelError> {
        let listed: Vec<String> = choices
            .iter()
            .map(|c| format!("[{}] {}", c.id, c.label))
            .collect();
        self.send(target, &format!("{content}\n{}", listed.join("\n")))
            .await
    }

    /// Open a new thread under `parent`.
    async fn create_thread(&self, parent: &str, title: &str)
    -> Result<ThreadHandle, ChannelError>;

    async fn rename_thread(&self, thread: &ThreadHandle, name: &str) -> Result<(), ChannelError>;

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), ChannelError>;

    /// Wait for one selection on `prompt`, `Ok(None)` once `timeout` elapses.
    async fn await_selection(
        &self,
        prompt: &MessageHandle,
        valid_choices: &[String],
        timeout: Duration,
    ) -> Result<Option<Selection>, ChannelError>;

    /// Which of `required` the bot lacks in `channel`.
    async fn missing_permissions(
        &self,
        _channel: &str,
        _required: &[Permission],
    ) -> Result<Vec<Permission>, ChannelError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_display_is_readable() {
        assert_eq!(Permission::CreateThreads.to_string(), "create threads");
    }

    #[test]
    fn selection_roundtrips_json() {
        let sel = Selection {
            user_id: "42".into(),
            choice: "simple".into(),
        };
        let json = serde_json::to_string(&sel).unwrap();
        let back: Selection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sel);
    }
}
