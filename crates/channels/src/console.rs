//! Console adapter — drive a session from the terminal.
//!
//! Messages go to stdout. Threads are simulated by prefixing output with the
//! thread id, and a selection is answered by typing the choice id on stdin.
//! Thread ids are random so follow-ups can target them in later runs.
//! Used by `threadsage ask`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::debug;

use threadsage_core::channel::{ChatAdapter, Choice, MessageHandle, Selection, ThreadHandle};
use threadsage_core::error::ChannelError;

/// Terminal adapter for a single local user.
pub struct ConsoleAdapter {
    user_id: String,
    next_id: AtomicU64,
}

impl ConsoleAdapter {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> String {
        format!("console-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Map typed input to a choice id: the id itself or its 1-based position.
fn match_choice(input: &str, valid: &[String]) -> Option<String> {
    let input = input.trim().to_ascii_lowercase();
    if let Some(found) = valid.iter().find(|v| v.to_ascii_lowercase() == input) {
        return Some(found.clone());
    }
    input
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| valid.get(i).cloned())
}

#[async_trait]
impl ChatAdapter for ConsoleAdapter {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, target: &str, content: &str) -> Result<MessageHandle, ChannelError> {
        println!("[{target}] {content}");
        Ok(MessageHandle {
            target: target.to_string(),
            id: self.next_id(),
        })
    }

    async fn send_prompt(
        &self,
        target: &str,
        content: &str,
        choices: &[Choice],
    ) -> Result<MessageHandle, ChannelError> {
        println!("[{target}] {content}");
        for (i, choice) in choices.iter().enumerate() {
            println!("  {}. {} ({})", i + 1, choice.label, choice.id);
        }
        Ok(MessageHandle {
            target: target.to_string(),
            id: self.next_id(),
        })
    }

    async fn create_thread(
        &self,
        parent: &str,
        title: &str,
    ) -> Result<ThreadHandle, ChannelError> {
        let handle = ThreadHandle {
            id: format!("thread-{}", uuid::Uuid::new_v4().simple()),
            parent: parent.to_string(),
        };
        println!("== {title} ({}) ==", handle.id);
        Ok(handle)
    }

    async fn rename_thread(&self, thread: &ThreadHandle, name: &str) -> Result<(), ChannelError> {
        println!("== {name} ({}) ==", thread.id);
        Ok(())
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        debug!(message_id = %handle.id, "Console messages cannot be deleted");
        Ok(())
    }

    async fn await_selection(
        &self,
        _prompt: &MessageHandle,
        valid_choices: &[String],
        timeout: Duration,
    ) -> Result<Option<Selection>, ChannelError> {
        let mut lines = BufReader::new(io::stdin()).lines();
        let read = async {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(choice) = match_choice(&line, valid_choices) {
                            return Ok(Some(choice));
                        }
                        println!("Please pick one of: {}", valid_choices.join(", "));
                    }
                    Ok(None) => return Ok(None),
                    Err(e) => return Err(ChannelError::ConnectionLost(e.to_string())),
                }
            }
        };

        match tokio::time::timeout(timeout, read).await {
            Ok(Ok(Some(choice))) => Ok(Some(Selection {
                user_id: self.user_id.clone(),
                choice,
            })),
            Ok(Ok(None)) | Err(_) => Ok(None),
            Ok(Err(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Vec<String> {
        vec!["simple".into(), "detailed".into()]
    }

    #[test]
    fn choices_match_by_id_or_position() {
        assert_eq!(match_choice("simple", &valid()).as_deref(), Some("simple"));
        assert_eq!(match_choice(" DETAILED ", &valid()).as_deref(), Some("detailed"));
        assert_eq!(match_choice("2", &valid()).as_deref(), Some("detailed"));
        assert_eq!(match_choice("0", &valid()), None);
        assert_eq!(match_choice("3", &valid()), None);
        assert_eq!(match_choice("verbose", &valid()), None);
    }

    #[tokio::test]
    async fn handles_are_unique() {
        let adapter = ConsoleAdapter::new("local");
        assert_eq!(adapter.name(), "console");
        let a = adapter.send("c", "one").await.unwrap();
        let b = adapter.send("c", "two").await.unwrap();
        assert_ne!(a.id, b.id);
        let thread = adapter.create_thread("c", "title").await.unwrap();
        assert_eq!(thread.parent, "c");
        assert!(thread.id.starts_with("thread-"));
    }
}
