//! GLiNER span models run through ONNX Runtime.
//!
//! A pretrained model is a directory holding `model.onnx` and `tokenizer.json`.
//! Loading one needs the `gliner` cargo feature; without it the loader reports
//! the model as unavailable and the pipeline falls back to the next tier.
#![cfg_attr(not(feature = "gliner"), allow(dead_code))]

use std::path::Path;

use anyhow::Result;

use super::Recognizer;

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// GLiNER prompt classes and the recognizer label each one reports as.
pub const CLASS_LABELS: &[(&str, &str)] = &[
    ("person", "PERSON"),
    ("city", "GPE"),
    ("country", "GPE"),
    ("location", "LOC"),
    ("building", "FAC"),
    ("organization", "ORG"),
    ("product", "PRODUCT"),
    ("event", "EVENT"),
    ("work of art", "WORK_OF_ART"),
    ("nationality", "NORP"),
];

const MAX_CHUNK_BYTES: usize = 480;
const BATCH_SIZE: usize = 32;

pub fn is_pretrained_dir(dir: &Path) -> bool {
    dir.join(MODEL_FILE).is_file()
}

fn class_label(class: &str) -> Option<&'static str> {
    CLASS_LABELS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(class))
        .map(|(_, label)| *label)
}

/// Splits `text` into trimmed pieces of at most `max_bytes`, preferring to cut
/// after sentence punctuation, then at whitespace. Each piece carries its byte
/// offset.
fn chunk_text(text: &str, max_bytes: usize) -> Vec<(usize, &str)> {
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut last_break = None::<usize>;
    let mut last_space = None::<usize>;

    for (index, ch) in text.char_indices() {
        let next = index + ch.len_utf8();
        if next - start > max_bytes {
            let cut = last_break
                .filter(|at| *at > start)
                .or(last_space.filter(|at| *at > start))
                .unwrap_or(index);
            if cut > start {
                push_chunk(&mut chunks, text, start, cut);
                start = cut;
            }
            last_break = None;
            last_space = None;
        }
        if matches!(ch, '.' | '!' | '?' | '\n') {
            last_break = Some(next);
        } else if ch.is_whitespace() {
            last_space = Some(index);
        }
    }
    push_chunk(&mut chunks, text, start, text.len());

    chunks
}

fn push_chunk<'a>(chunks: &mut Vec<(usize, &'a str)>, text: &'a str, start: usize, end: usize) {
    let Some(piece) = text.get(start..end) else {
        return;
    };
    let leading = piece.len() - piece.trim_start().len();
    let body = piece.trim();
    if !body.is_empty() {
        chunks.push((start + leading, body));
    }
}

/// Byte range of `surface` in `chunk`: the reported offsets when they hold it,
/// otherwise the occurrence nearest to them.
fn locate(chunk: &str, start: usize, end: usize, surface: &str) -> Option<(usize, usize)> {
    if surface.is_empty() {
        return None;
    }
    if chunk.get(start..end) == Some(surface) {
        return Some((start, end));
    }
    chunk
        .match_indices(surface)
        .map(|(at, _)| at)
        .min_by_key(|at| at.abs_diff(start))
        .map(|at| (at, at + surface.len()))
}

#[cfg(feature = "gliner")]
pub fn load(name: &str, dir: &Path) -> Result<Box<dyn Recognizer>> {
    Ok(Box::new(runtime::GlinerRecognizer::load(name, dir)?))
}

#[cfg(not(feature = "gliner"))]
pub fn load(name: &str, dir: &Path) -> Result<Box<dyn Recognizer>> {
    anyhow::bail!(
        "model {name} at {} is a GLiNER model; this build lacks the `gliner` feature",
        dir.display()
    )
}

#[cfg(feature = "gliner")]
mod runtime {
    use std::path::Path;

    use anyhow::{Result, anyhow};
    use gliner::model::{GLiNER, input::text::TextInput, pipeline::span::SpanMode};
    use orp::params::RuntimeParameters;
    use tracing::debug;

    use super::{
        BATCH_SIZE, CLASS_LABELS, MAX_CHUNK_BYTES, MODEL_FILE, TOKENIZER_FILE, chunk_text,
        class_label, locate,
    };
    use crate::nlp::{Candidate, RecognizedSpan, Recognizer, resolve_spans};

    pub struct GlinerRecognizer {
        name: String,
        model: GLiNER<SpanMode>,
    }

    impl GlinerRecognizer {
        pub fn load(name: &str, dir: &Path) -> Result<Self> {
            let threads = std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1);
            let model = GLiNER::<SpanMode>::new(
                Default::default(),
                RuntimeParameters::default().with_threads(threads),
                dir.join(TOKENIZER_FILE),
                dir.join(MODEL_FILE),
            )
            .map_err(|err| anyhow!("failed to load GLiNER model {}: {err}", dir.display()))?;

            Ok(Self {
                name: name.to_string(),
                model,
            })
        }
    }

    impl Recognizer for GlinerRecognizer {
        fn name(&self) -> &str {
            &self.name
        }

        fn recognize(&self, text: &str) -> Result<Vec<RecognizedSpan>> {
            let classes = CLASS_LABELS
                .iter()
                .map(|(class, _)| *class)
                .collect::<Vec<&str>>();
            let chunks = chunk_text(text, MAX_CHUNK_BYTES);
            let mut candidates = Vec::new();

            for batch in chunks.chunks(BATCH_SIZE) {
                let texts = batch.iter().map(|(_, chunk)| *chunk).collect::<Vec<&str>>();
                let input = TextInput::from_str(&texts, &classes)
                    .map_err(|err| anyhow!("failed to prepare GLiNER input: {err}"))?;
                let output = self
                    .model
                    .inference(input)
                    .map_err(|err| anyhow!("GLiNER inference failed: {err}"))?;

                for ((base, chunk), spans) in batch.iter().zip(output.spans.iter()) {
                    for span in spans {
                        let Some(label) = class_label(span.class()) else {
                            continue;
                        };
                        let (start, end) = span.offsets();
                        let Some((start, end)) = locate(chunk, start, end, span.text()) else {
                            continue;
                        };
                        candidates.push(Candidate {
                            start: base + start,
                            end: base + end,
                            label: label.to_string(),
                        });
                    }
                }
            }

            debug!(
                model = %self.name,
                chunks = chunks.len(),
                candidates = candidates.len(),
                "gliner inference finished"
            );
            Ok(resolve_spans(text, candidates))
        }
    }
}
