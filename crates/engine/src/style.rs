//! Style negotiation — a bounded wait for the requester's verbosity choice.
//!
//! `AwaitingChoice -> {Chosen(Simple), Chosen(Detailed), TimedOut}`. Only
//! selections from qualifying users (thread owner, current requester) move
//! the machine; anything else is ignored until the deadline. On timeout the
//! configured default style applies and the outcome is marked `timed_out`.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use threadsage_config::StyleConfig;
use threadsage_core::channel::{ChatAdapter, Choice, Selection};
use threadsage_core::session::ResponseStyle;

const PROMPT_TEXT: &str = "How detailed should the answer be?";

/// Negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    AwaitingChoice,
    Chosen(ResponseStyle),
    TimedOut,
}

impl Negotiation {
    /// Apply one selection. Terminal states ignore further input.
    pub fn select(self, selection: &Selection, qualifying: &[&str]) -> Self {
        match self {
            Negotiation::AwaitingChoice => {
                if !qualifying.contains(&selection.user_id.as_str()) {
                    return self;
                }
                ResponseStyle::parse(&selection.choice).map_or(self, Negotiation::Chosen)
            }
            terminal => terminal,
        }
    }

    pub fn time_out(self) -> Self {
        match self {
            Negotiation::AwaitingChoice => Negotiation::TimedOut,
            terminal => terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Negotiation::AwaitingChoice)
    }
}

/// Result of a finished negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationOutcome {
    pub style: ResponseStyle,
    pub timed_out: bool,
}

/// Runs style negotiations against a chat adapter.
#[derive(Debug, Clone)]
pub struct StyleNegotiator {
    timeout: Duration,
    default_on_timeout: ResponseStyle,
}

impl StyleNegotiator {
    pub fn new(timeout: Duration, default_on_timeout: ResponseStyle) -> Self {
        Self {
            timeout,
            default_on_timeout,
        }
    }

    pub fn from_config(config: &StyleConfig) -> Self {
        Self::new(
            Duration::from_secs(config.timeout_secs),
            config.default_on_timeout,
        )
    }

    pub fn choices() -> Vec<Choice> {
        vec![
            Choice::new(ResponseStyle::Simple.as_str(), "Simple"),
            Choice::new(ResponseStyle::Detailed.as_str(), "Detailed"),
        ]
    }

    /// Ask in `target` and wait for a qualifying choice.
    ///
    /// Adapter failures are logged and resolve like a timeout; the
    /// generation goes ahead either way.
    pub async fn negotiate(
        &self,
        adapter: &dyn ChatAdapter,
        target: &str,
        qualifying: &[&str],
    ) -> NegotiationOutcome {
        let choices = Self::choices();
        let valid: Vec<String> = choices.iter().map(|c| c.id.clone()).collect();

        let prompt = match adapter.send_prompt(target, PROMPT_TEXT, &choices).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(channel = %target, error = %e, "Could not send style prompt, using default");
                return self.resolve(Negotiation::TimedOut);
            }
        };

        let deadline = Instant::now() + self.timeout;
        let mut state = Negotiation::AwaitingChoice;

        while !state.is_terminal() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                state = state.time_out();
                break;
            }
            match adapter.await_selection(&prompt, &valid, remaining).await {
                Ok(Some(selection)) => {
                    let next = state.select(&selection, qualifying);
                    if next == state {
                        debug!(
                            user_id = %selection.user_id,
                            choice = %selection.choice,
                            "Ignoring selection from non-qualifying user or unknown choice"
                        );
                    }
                    state = next;
                }
                Ok(None) => state = state.time_out(),
                Err(e) => {
                    warn!(channel = %target, error = %e, "Selection wait failed, using default");
                    state = state.time_out();
                }
            }
        }

        if let Err(e) = adapter.delete_message(&prompt).await {
            debug!(message_id = %prompt.id, error = %e, "Could not delete style prompt");
        }

        let outcome = self.resolve(state);
        info!(
            channel = %target,
            style = %outcome.style,
            timed_out = outcome.timed_out,
            "Style negotiation finished"
        );
        outcome
    }

    fn resolve(&self, state: Negotiation) -> NegotiationOutcome {
        match state {
            Negotiation::Chosen(style) => NegotiationOutcome {
                style,
                timed_out: false,
            },
            Negotiation::AwaitingChoice | Negotiation::TimedOut => NegotiationOutcome {
                style: self.default_on_timeout,
                timed_out: true,
            },
        }
    }
}
