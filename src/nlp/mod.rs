use anyhow::Result;
use serde::Serialize;

mod bundled;
mod gazetteer;
mod gliner;
mod loader;

pub use bundled::install_bundled_models;
pub use gazetteer::GazetteerRecognizer;
pub use loader::{DEFAULT_FALLBACK_MODEL, DEFAULT_PREFERRED_MODEL, PipelineConfig, PipelineLoader};

/// A labelled span with char offsets into the analysed text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognizedSpan {
    pub text: String,
    pub label: String,
    pub start_char: usize,
    pub end_char: usize,
}

/// Entity recognition over raw text.
///
/// Implementations return spans ordered by `start_char` with no overlaps, and
/// `text` must equal the chars `[start_char, end_char)` of the input.
pub trait Recognizer {
    fn name(&self) -> &str;

    fn recognize(&self, text: &str) -> Result<Vec<RecognizedSpan>>;
}

/// A labelled match in byte offsets, before overlap resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    start: usize,
    end: usize,
    label: String,
}

/// Keeps leftmost, then longest, non-overlapping candidates and converts byte
/// offsets into char offsets.
fn resolve_spans(text: &str, mut candidates: Vec<Candidate>) -> Vec<RecognizedSpan> {
    candidates.sort_by(|left, right| {
        left.start
            .cmp(&right.start)
            .then_with(|| (right.end - right.start).cmp(&(left.end - left.start)))
    });

    let mut spans = Vec::<RecognizedSpan>::new();
    let mut last_end_byte = 0usize;
    let mut cursor_byte = 0usize;
    let mut cursor_char = 0usize;

    for Candidate { start, end, label } in candidates {
        if start < last_end_byte || start >= end {
            continue;
        }
        let (Some(before), Some(matched)) = (text.get(cursor_byte..start), text.get(start..end))
        else {
            continue;
        };

        cursor_char += before.chars().count();
        let start_char = cursor_char;
        let end_char = start_char + matched.chars().count();
        cursor_byte = end;
        cursor_char = end_char;
        last_end_byte = end;

        spans.push(RecognizedSpan {
            text: matched.to_string(),
            label,
            start_char,
            end_char,
        });
    }

    spans
}
