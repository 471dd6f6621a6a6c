//! Fenced code block detection.
//!
//! Splits text into prose and fenced segments whose concatenation is the
//! input. A fence opens on a line starting (after at most three spaces) with
//! three or more backticks and closes on a line carrying at least as many
//! backticks and nothing else. An unclosed fence runs to the end of the text.

/// A contiguous piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Prose(&'a str),
    Fence {
        /// Opening line through closing line, newline included.
        text: &'a str,
        /// First word of the info string, e.g. `rust`.
        language: Option<&'a str>,
    },
}

impl<'a> Segment<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            Segment::Prose(text) | Segment::Fence { text, .. } => text,
        }
    }
}

struct OpenFence<'a> {
    start: usize,
    ticks: usize,
    language: Option<&'a str>,
}

pub fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut prose_start = 0;
    let mut offset = 0;
    let mut open: Option<OpenFence<'_>> = None;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        match &open {
            None => {
                if let Some((ticks, language)) = opening_fence(line) {
                    if prose_start < line_start {
                        out.push(Segment::Prose(&text[prose_start..line_start]));
                    }
                    open = Some(OpenFence {
                        start: line_start,
                        ticks,
                        language,
                    });
                }
            }
            Some(fence) => {
                if is_closing_fence(line, fence.ticks) {
                    out.push(Segment::Fence {
                        text: &text[fence.start..offset],
                        language: fence.language,
                    });
                    open = None;
                    prose_start = offset;
                }
            }
        }
    }

    match open {
        Some(fence) => out.push(Segment::Fence {
            text: &text[fence.start..],
            language: fence.language,
        }),
        None if prose_start < text.len() => out.push(Segment::Prose(&text[prose_start..])),
        None => {}
    }
    out
}

/// Backtick count and the rest of the line, if the line is a fence line.
fn fence_ticks(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let ticks = trimmed.bytes().take_while(|b| *b == b'`').count();
    (ticks >= 3).then(|| (ticks, &trimmed[ticks..]))
}

fn opening_fence(line: &str) -> Option<(usize, Option<&str>)> {
    let (ticks, info) = fence_ticks(line)?;
    let info = info.trim();
    if info.contains('`') {
        return None;
    }
    Some((ticks, info.split_whitespace().next()))
}

fn is_closing_fence(line: &str, open_ticks: usize) -> bool {
    matches!(fence_ticks(line), Some((ticks, rest)) if ticks >= open_ticks && rest.trim().is_empty())
}

/// Call `f` for each run of `prose`, flagging inline code spans.
///
/// A span opens with a run of N backticks and closes at the next run of
/// exactly N. Unmatched runs stay in the surrounding text.
pub fn for_each_inline<'a>(prose: &'a str, mut f: impl FnMut(&'a str, bool)) {
    let bytes = prose.as_bytes();
    let mut i = 0;
    let mut plain_start = 0;

    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let run = backtick_run(&bytes[i..]);
        match find_run(&bytes[i + run..], run) {
            Some(close) => {
                let end = i + run + close + run;
                if plain_start < i {
                    f(&prose[plain_start..i], false);
                }
                f(&prose[i..end], true);
                i = end;
                plain_start = end;
            }
            None => i += run,
        }
    }

    if plain_start < prose.len() {
        f(&prose[plain_start..], false);
    }
}

fn backtick_run(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| **b == b'`').count()
}

fn find_run(bytes: &[u8], len: usize) -> Option<usize> {
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            let run = backtick_run(&bytes[i..]);
            if run == len {
                return Some(i);
            }
            i += run;
        } else {
            i += 1;
        }
    }
    None
}
