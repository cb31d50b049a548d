use std::cmp::Reverse;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Candidate, RecognizedSpan, Recognizer, resolve_spans};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazetteerModel {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub phrases: Vec<PhraseEntry>,
    #[serde(default)]
    pub patterns: Vec<PatternEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseEntry {
    pub text: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternEntry {
    pub pattern: String,
    pub label: String,
    #[serde(default)]
    pub group: Option<usize>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_case_sensitive() -> bool {
    true
}

impl GazetteerModel {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse model file {}", path.display()))
    }
}

struct CompiledPattern {
    regex: Regex,
    label: String,
    group: usize,
}

/// Phrase-list and regex recognizer backed by a JSON model file.
pub struct GazetteerRecognizer {
    name: String,
    version: String,
    language: String,
    phrase_matcher: Option<Regex>,
    // label of capture group `i + 1` in `phrase_matcher`
    phrase_labels: Vec<String>,
    patterns: Vec<CompiledPattern>,
}

impl GazetteerRecognizer {
    pub fn load(path: &Path) -> Result<Self> {
        let model = GazetteerModel::from_path(path)?;
        Self::from_model(model).with_context(|| format!("invalid model file {}", path.display()))
    }

    pub fn from_model(model: GazetteerModel) -> Result<Self> {
        if model.phrases.is_empty() && model.patterns.is_empty() {
            bail!("model {} defines no phrases or patterns", model.name);
        }

        let mut seen = HashSet::<&str>::new();
        let mut phrases = Vec::<(&str, &str)>::with_capacity(model.phrases.len());
        for entry in &model.phrases {
            let text = entry.text.trim();
            let label = entry.label.trim();
            if text.is_empty() || label.is_empty() {
                bail!("model {} has a phrase with empty text or label", model.name);
            }
            if seen.insert(text) {
                phrases.push((text, label));
            }
        }
        // longest first: the alternation is leftmost-first, not leftmost-longest
        phrases.sort_by_key(|(text, _)| Reverse(text.chars().count()));

        let phrase_matcher = if phrases.is_empty() {
            None
        } else {
            let alternation = phrases
                .iter()
                .map(|(text, _)| format!("({})", bounded_phrase(text)))
                .collect::<Vec<String>>()
                .join("|");
            let source = if model.case_sensitive {
                format!("(?:{alternation})")
            } else {
                format!("(?i:{alternation})")
            };
            Some(Regex::new(&source).with_context(|| {
                format!("failed to compile phrase matcher for model {}", model.name)
            })?)
        };
        let phrase_labels = phrases
            .iter()
            .map(|(_, label)| label.to_string())
            .collect::<Vec<String>>();

        let mut patterns = Vec::with_capacity(model.patterns.len());
        for entry in &model.patterns {
            if entry.label.trim().is_empty() {
                bail!(
                    "model {} has a pattern with an empty label: {}",
                    model.name,
                    entry.pattern
                );
            }
            let regex = Regex::new(&entry.pattern).with_context(|| {
                format!("invalid pattern in model {}: {}", model.name, entry.pattern)
            })?;
            let group = entry.group.unwrap_or(0);
            if group >= regex.captures_len() {
                bail!(
                    "pattern in model {} has no capture group {group}: {}",
                    model.name,
                    entry.pattern
                );
            }
            patterns.push(CompiledPattern {
                regex,
                label: entry.label.trim().to_string(),
                group,
            });
        }

        debug!(
            model = %model.name,
            phrases = phrase_labels.len(),
            patterns = patterns.len(),
            "compiled gazetteer model"
        );

        Ok(Self {
            name: model.name,
            version: model.version,
            language: model.language,
            phrase_matcher,
            phrase_labels,
            patterns,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn collect_candidates(&self, text: &str) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        if let Some(matcher) = &self.phrase_matcher {
            for captures in matcher.captures_iter(text) {
                // the branch that matched names the phrase, whatever case the text uses
                let branch = captures
                    .iter()
                    .skip(1)
                    .position(|group| group.is_some());
                let (Some(found), Some(index)) = (captures.get(0), branch) else {
                    continue;
                };
                candidates.push(Candidate {
                    start: found.start(),
                    end: found.end(),
                    label: self.phrase_labels[index].clone(),
                });
            }
        }

        for pattern in &self.patterns {
            for captures in pattern.regex.captures_iter(text) {
                let Some(found) = captures.get(pattern.group) else {
                    continue;
                };
                if found.as_str().trim().is_empty() {
                    continue;
                }
                candidates.push(Candidate {
                    start: found.start(),
                    end: found.end(),
                    label: pattern.label.clone(),
                });
            }
        }

        candidates
    }
}

impl Recognizer for GazetteerRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&self, text: &str) -> Result<Vec<RecognizedSpan>> {
        let candidates = self.collect_candidates(text);
        Ok(resolve_spans(text, candidates))
    }
}

fn bounded_phrase(phrase: &str) -> String {
    let is_word = |ch: char| ch.is_alphanumeric() || ch == '_';
    let leading = if phrase.chars().next().is_some_and(is_word) {
        r"\b"
    } else {
        ""
    };
    let trailing = if phrase.chars().last().is_some_and(is_word) {
        r"\b"
    } else {
        ""
    };
    format!("{leading}{}{trailing}", regex::escape(phrase))
}
