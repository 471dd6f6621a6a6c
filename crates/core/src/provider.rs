//! GenerativeProvider trait — the abstraction over AI backends.
//!
//! A provider turns an ordered context into a single text answer.
//! Implementations: OpenAI-compatible endpoints, Gemini.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::ContextEntry;

/// A request to generate one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Ordered context: original prompt, history, current turn.
    pub entries: Vec<ContextEntry>,

    /// Preferred model; the provider's own default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl GenerateRequest {
    pub fn new(entries: Vec<ContextEntry>) -> Self {
        Self {
            entries,
            model_hint: None,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_hint = model;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A provider's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,

    /// Tokens the provider reports for the call, if it reports any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,

    /// Which model actually responded.
    pub model: String,
}

/// The core GenerativeProvider trait.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Human-readable name of this provider (e.g., "gemini").
    fn name(&self) -> &str;

    /// Generate one complete answer for the context.
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError>;

    /// Check if the provider is reachable and configured.
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
