//! Chat adapters for threadsage.
//!
//! Each adapter implements [`threadsage_core::ChatAdapter`] so the session
//! engine stays platform-agnostic.
//!
//! Available adapters:
//! - **Discord** — thread-per-question bot (stub, needs serenity in production)
//! - **Console** — interactive terminal session (stdin/stdout)
//!
//! [`SelectionHub`] routes button presses to the prompt awaiting them.

pub mod console;
pub mod discord;
pub mod selection;

pub use console::ConsoleAdapter;
pub use discord::{DiscordAdapter, DiscordConfig, SentMessage};
pub use selection::{Delivery, SelectionHub};

/// Hard per-message character limit on Discord.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
