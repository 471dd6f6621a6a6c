//! # threadsage core
//!
//! Domain types, traits, and error definitions for the threadsage
//! conversational session engine. Every collaborator (store, provider,
//! chat adapter) is a trait here; implementations live in their own crates.

pub mod channel;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod session;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use channel::{ChatAdapter, Choice, MessageHandle, Permission, Selection, ThreadHandle};
pub use error::{ChannelError, ProviderError, Result, SessionError, StoreError};
pub use event::{ChannelContext, GatewayEvent};
pub use message::{ContextEntry, ImageRef, Role};
pub use provider::{GenerateRequest, GenerativeProvider, Generation};
pub use session::{
    NewMessage, RankEntry, ResponseStyle, StoreStats, StoredMessage, Thread, TokenUsage, User,
};
pub use store::{PointsAward, SessionStore, StoreTx, TokenLedger};
