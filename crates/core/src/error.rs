//! Error types for the threadsage domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `SessionError` is the
//! taxonomy a session flow reports back to the user.

use thiserror::Error;

/// The error a session flow (ask, reply, renew, clear) surfaces.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad context or missing prompt.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Missing platform permission, or the requester may not act on the thread.
    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// The thread row is gone (expired, cleared, or raced with a sweep).
    #[error("Thread not found: {0}")]
    NotFound(String),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl SessionError {
    /// The text shown to the requester in the chat.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Validation(reason) => format!("⚠️ {reason}"),
            SessionError::Permission(reason) => format!("🚫 {reason}"),
            SessionError::Provider(_) => {
                "⏳ The assistant could not answer right now. Please try again later.".into()
            }
            SessionError::NotFound(_) => {
                "🔍 This conversation no longer exists. Please start a new session.".into()
            }
            SessionError::Persistence(_) | SessionError::Channel(_) => {
                "❌ Something went wrong while handling your request.".into()
            }
        }
    }
}

/// Result type alias for session flows.
pub type Result<T> = std::result::Result<T, SessionError>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned no content: {0}")]
    EmptyResponse(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Message delivery failed to {target}: {reason}")]
    SendFailed { target: String, reason: String },

    #[error("Missing permission on {channel}: {permission}")]
    PermissionDenied { channel: String, permission: String },

    #[error("Unknown handle: {0}")]
    NotFound(String),

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}
