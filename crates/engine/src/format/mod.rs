//! Response formatting: notation normalization and transport chunking.

pub mod chunk;
pub mod fence;
pub mod notation;

pub use chunk::{Chunk, chunk};
pub use notation::normalize;

/// Cut `text` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
