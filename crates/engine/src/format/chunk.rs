//! Fence-aware message chunking.
//!
//! Packs text greedily into chunks of at most `limit` characters. A fenced
//! code block that fits in one chunk is never split; one that does not fit
//! is sliced raw, each slice carrying the block's language. Prose breaks at
//! the last newline, else the last space, else mid-word. Concatenating the
//! chunks always reproduces the input exactly.

use serde::{Deserialize, Serialize};

use super::fence::{Segment, segments};

/// One transport-sized piece of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    /// Language tag of the first code block in this chunk, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

struct Packer {
    limit: usize,
    chunks: Vec<Chunk>,
    current: String,
    current_len: usize,
    language: Option<String>,
}

impl Packer {
    fn room(&self) -> usize {
        self.limit - self.current_len
    }

    fn push(&mut self, text: &str, len: usize) {
        self.current.push_str(text);
        self.current_len += len;
    }

    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        self.chunks.push(Chunk {
            content: std::mem::take(&mut self.current),
            language: self.language.take(),
        });
        self.current_len = 0;
    }

    fn fence(&mut self, text: &str, language: Option<&str>) {
        let len = text.chars().count();
        if len <= self.limit {
            if len > self.room() {
                self.flush();
            }
            if self.language.is_none() {
                self.language = language.map(str::to_string);
            }
            self.push(text, len);
            return;
        }

        self.flush();
        let mut rest = text;
        while !rest.is_empty() {
            let cut = byte_offset(rest, self.limit);
            self.chunks.push(Chunk {
                content: rest[..cut].to_string(),
                language: language.map(str::to_string),
            });
            rest = &rest[cut..];
        }
    }

    fn prose(&mut self, mut rest: &str) {
        while !rest.is_empty() {
            let rest_len = rest.chars().count();
            if rest_len <= self.room() {
                self.push(rest, rest_len);
                return;
            }

            let hard = byte_offset(rest, self.room());
            let window = &rest[..hard];
            let soft = window
                .rfind('\n')
                .or_else(|| window.rfind(' '))
                .map(|i| i + 1);

            let cut = match soft {
                Some(cut) => cut,
                // Give a partly filled chunk a fresh start before cutting mid-word.
                None if self.current_len > 0 => {
                    self.flush();
                    continue;
                }
                None => hard,
            };
            let piece = &rest[..cut];
            self.push(piece, piece.chars().count());
            self.flush();
            rest = &rest[cut..];
        }
    }
}

/// Byte offset of the `chars`-th character, or the end of `text`.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(i, _)| i)
}

/// Split `text` into chunks of at most `limit` characters.
pub fn chunk(text: &str, limit: usize) -> Vec<Chunk> {
    let mut packer = Packer {
        limit: limit.max(1),
        chunks: Vec::new(),
        current: String::new(),
        current_len: 0,
        language: None,
    };

    for segment in segments(text) {
        match segment {
            Segment::Fence { text, language } => packer.fence(text, language),
            Segment::Prose(text) => packer.prose(text),
        }
    }
    packer.flush();
    packer.chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.content.as_str()).collect()
    }

    fn sample() -> String {
        let mut text = String::from("Here is an explanation of the algorithm.\n\n");
        text.push_str("```rust\nfn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n```\n");
        text.push_str("And some closing words about why it works so well in practice.\n");
        text.push_str("```python\nprint('hi')\n```\nThe end.");
        text
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk("hello", 2000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "hello");
        assert_eq!(chunks[0].language, None);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk("", 10).is_empty());
    }

    #[test]
    fn prose_breaks_at_whitespace() {
        let chunks = chunk("alpha beta gamma delta", 11);
        assert_eq!(
            chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>(),
            ["alpha beta ", "gamma delta"]
        );
    }

    #[test]
    fn prefers_newline_over_space() {
        let chunks = chunk("one two\nthree four", 12);
        assert_eq!(chunks[0].content, "one two\n");
    }

    #[test]
    fn long_word_is_cut_hard() {
        let chunks = chunk("abcdefghij", 4);
        assert_eq!(
            chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>(),
            ["abcd", "efgh", "ij"]
        );
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "ệệệệệ ệệệệệ";
        let chunks = chunk(text, 6);
        assert_eq!(chunks[0].content, "ệệệệệ ");
        assert!(chunks.iter().all(|c| c.len() <= 6));
        assert_eq!(joined(&chunks), text);
    }

    #[test]
    fn fitting_fence_stays_whole_and_tagged() {
        let text = sample();
        for limit in [60, 80, 120, 500] {
            let chunks = chunk(&text, limit);
            assert_eq!(joined(&chunks), text, "limit {limit}");
            assert!(chunks.iter().all(|c| c.len() <= limit), "limit {limit}");

            let rust = chunks
                .iter()
                .find(|c| c.content.contains("```rust"))
                .expect("rust block present");
            assert!(rust.content.contains("a + b\n}\n```\n"), "limit {limit}");
            assert_eq!(rust.language.as_deref(), Some("rust"));
        }
    }

    #[test]
    fn oversized_fence_is_sliced_with_language() {
        let body = "x = 1\n".repeat(20);
        let text = format!("intro\n```python\n{body}```\noutro");
        let chunks = chunk(&text, 30);

        assert_eq!(joined(&chunks), text);
        assert!(chunks.iter().all(|c| c.len() <= 30));
        let sliced: Vec<_> = chunks
            .iter()
            .filter(|c| c.language.as_deref() == Some("python"))
            .collect();
        assert!(sliced.len() > 1);
        assert_eq!(chunks.first().map(|c| c.content.as_str()), Some("intro\n"));
    }

    #[test]
    fn zero_limit_is_treated_as_one() {
        let chunks = chunk("abc", 0);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn round_trip_holds_across_limits() {
        let texts = [
            sample(),
            "no fences at all, just a long run of words ".repeat(30),
            "```\nunclosed block\nwith lines\n".to_string(),
            "a\n\n\n\nb    c".to_string(),
        ];
        for text in &texts {
            for limit in [1, 2, 7, 16, 33, 100, 2000] {
                let chunks = chunk(text, limit);
                assert_eq!(&joined(&chunks), text, "limit {limit}");
                assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= limit));
            }
        }
    }
}
