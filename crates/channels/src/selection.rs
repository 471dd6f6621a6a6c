//! Selection hub — one-shot waiters keyed by prompt id.
//!
//! An adapter registers a waiter when the engine asks it to await a choice on
//! a prompt message, and routes incoming button presses to [`SelectionHub::deliver`].
//! The first valid delivery completes the waiter; later ones find no waiter.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use threadsage_core::channel::Selection;

/// What happened to a delivered selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A waiter received it.
    Accepted,
    /// A waiter exists but the choice is not one it accepts.
    InvalidChoice,
    /// Nobody is waiting on this prompt (timed out or already answered).
    NoWaiter,
}

struct Waiter {
    valid: Vec<String>,
    tx: oneshot::Sender<Selection>,
}

#[derive(Default)]
pub struct SelectionHub {
    pending: Mutex<HashMap<String, Waiter>>,
}

impl SelectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Waiter>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait up to `timeout` for one valid selection on `prompt_id`.
    pub async fn wait(
        &self,
        prompt_id: &str,
        valid: &[String],
        timeout: Duration,
    ) -> Option<Selection> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            prompt_id.to_string(),
            Waiter {
                valid: valid.to_vec(),
                tx,
            },
        );

        let outcome = tokio::time::timeout(timeout, rx).await;
        self.lock().remove(prompt_id);

        match outcome {
            Ok(Ok(selection)) => Some(selection),
            Ok(Err(_)) | Err(_) => {
                debug!(prompt_id, "Selection wait ended without a choice");
                None
            }
        }
    }

    /// Route a user's pick to the waiter on `prompt_id`.
    pub fn deliver(&self, prompt_id: &str, selection: Selection) -> Delivery {
        let mut pending = self.lock();
        match pending.get(prompt_id) {
            None => Delivery::NoWaiter,
            Some(waiter) if !waiter.valid.contains(&selection.choice) => Delivery::InvalidChoice,
            Some(_) => match pending.remove(prompt_id) {
                Some(waiter) => {
                    if waiter.tx.send(selection).is_ok() {
                        Delivery::Accepted
                    } else {
                        Delivery::NoWaiter
                    }
                }
                None => Delivery::NoWaiter,
            },
        }
    }

    /// Number of prompts currently awaiting a choice.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    pub fn is_waiting(&self, prompt_id: &str) -> bool {
        self.lock().contains_key(prompt_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn choices() -> Vec<String> {
        vec!["simple".into(), "detailed".into()]
    }

    fn pick(user: &str, choice: &str) -> Selection {
        Selection {
            user_id: user.into(),
            choice: choice.into(),
        }
    }

    async fn until_waiting(hub: &SelectionHub, prompt_id: &str) {
        while !hub.is_waiting(prompt_id) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn first_valid_delivery_wins() {
        let hub = Arc::new(SelectionHub::new());
        let waiter = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.wait("p1", &choices(), Duration::from_secs(5)).await })
        };
        until_waiting(&hub, "p1").await;

        assert_eq!(hub.deliver("p1", pick("u1", "verbose")), Delivery::InvalidChoice);
        assert_eq!(hub.deliver("p1", pick("u1", "simple")), Delivery::Accepted);
        assert_eq!(hub.deliver("p1", pick("u1", "detailed")), Delivery::NoWaiter);

        assert_eq!(waiter.await.unwrap(), Some(pick("u1", "simple")));
        assert_eq!(hub.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_and_cleans_up() {
        let hub = SelectionHub::new();
        let outcome = hub.wait("p1", &choices(), Duration::from_millis(100)).await;
        assert!(outcome.is_none());
        assert_eq!(hub.pending(), 0);
        assert_eq!(hub.deliver("p1", pick("u1", "simple")), Delivery::NoWaiter);
    }

    #[tokio::test]
    async fn delivery_after_receiver_dropped_finds_no_waiter() {
        let hub = Arc::new(SelectionHub::new());
        let waiter = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.wait("p2", &choices(), Duration::from_secs(5)).await })
        };
        until_waiting(&hub, "p2").await;
        waiter.abort();
        let _ = waiter.await;

        // An aborted wait may leave its entry behind; delivery must not panic.
        let outcome = hub.deliver("p2", pick("u1", "simple"));
        assert_eq!(outcome, Delivery::NoWaiter);
        assert!(!hub.is_waiting("p2"));
    }

    #[test]
    fn delivery_without_waiter() {
        let hub = SelectionHub::new();
        assert_eq!(hub.deliver("nope", pick("u1", "simple")), Delivery::NoWaiter);
    }
}
