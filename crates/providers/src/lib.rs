//! Generative provider implementations for threadsage.
//!
//! All providers implement `threadsage_core::GenerativeProvider`.
//! The router picks one per request under the daily token budget.

pub mod budget;
pub mod gemini;
pub mod openai_compat;
pub mod router;

pub use budget::{TokenBudget, estimate_tokens, within_budget};
pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, Routed, build_from_config};
