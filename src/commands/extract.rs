use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, error, info};

use crate::cli::ExtractArgs;
use crate::labels::map_label;
use crate::model::{ExtractionCounts, ExtractionReport, NewMention};
use crate::nlp::PipelineLoader;
use crate::store::{
    delete_mentions_for_chapter, find_entity_by_name, insert_entity, insert_mention, load_chapter,
    open_existing,
};
use crate::util::{
    CharIndex, now_utc_string, preview, sha256_text, utc_compact_string, write_json_pretty,
};

/// Characters of surrounding text kept on each side of a mention.
pub const CONTEXT_RADIUS: usize = 50;

const SKIPPED_LOG_LIMIT: usize = 5;

pub fn run(args: ExtractArgs) -> Result<()> {
    let db_path = args.store.resolved_db_path();
    let mut connection = open_existing(&db_path)?;
    let loader = PipelineLoader::new(args.models.pipeline_config(&args.store));

    let report = process_chapter(&mut connection, &loader, args.chapter_id, &args.language)?;

    if let Some(report_path) = &args.report_path {
        write_json_pretty(report_path, &report)?;
        info!(path = %report_path.display(), "wrote extraction report");
    }

    Ok(())
}

/// Rebuilds every mention of `chapter_id` from the chapter's current text.
///
/// Clearing old mentions, creating entities and inserting new mentions share one
/// immediate transaction: a failure leaves the previous mention set untouched.
/// `language` is recorded but does not influence recognition.
pub fn process_chapter(
    connection: &mut Connection,
    loader: &PipelineLoader,
    chapter_id: i64,
    language: &str,
) -> Result<ExtractionReport> {
    let started = Instant::now();
    let started_at = now_utc_string();
    let run_id = format!("ner-{}-{}", chapter_id, utc_compact_string(Utc::now()));

    info!(chapter_id, language, run_id = %run_id, "entity extraction started");

    match extract_in_transaction(connection, loader, chapter_id, language, &run_id, started_at) {
        Ok(report) => {
            info!(
                chapter_id,
                model = %report.pipeline.model_name,
                entities_found = report.counts.entities_found,
                entities_created = report.counts.entities_created,
                mentions_created = report.counts.mentions_created,
                mentions_deleted = report.counts.mentions_deleted,
                skipped = report.counts.skipped_spans,
                duration_ms = started.elapsed().as_millis() as u64,
                "entity extraction completed"
            );
            if !report.skipped.is_empty() {
                let sample = report
                    .skipped
                    .iter()
                    .take(SKIPPED_LOG_LIMIT)
                    .map(String::as_str)
                    .collect::<Vec<&str>>()
                    .join(", ");
                info!(chapter_id, skipped = %sample, "skipped spans with unmapped labels");
            }
            Ok(report)
        }
        Err(err) => {
            error!(chapter_id, error = %format!("{err:#}"), "entity extraction failed, rolled back");
            Err(err)
        }
    }
}

fn extract_in_transaction(
    connection: &mut Connection,
    loader: &PipelineLoader,
    chapter_id: i64,
    language: &str,
    run_id: &str,
    started_at: String,
) -> Result<ExtractionReport> {
    // dropping the transaction on any early return rolls it back
    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to begin extraction transaction")?;

    let Some(chapter) = load_chapter(&tx, chapter_id)? else {
        bail!("chapter {chapter_id} not found");
    };

    let char_index = CharIndex::new(&chapter.content);
    let content_chars = char_index.char_count();
    info!(
        chapter_id,
        title = %chapter.title.as_deref().unwrap_or("Untitled"),
        project_id = chapter.project_id,
        content_chars,
        preview = %preview(&chapter.content, 100),
        "loaded chapter"
    );

    let mut counts = ExtractionCounts {
        content_chars,
        mentions_deleted: delete_mentions_for_chapter(&tx, chapter_id)?,
        ..ExtractionCounts::default()
    };
    debug!(chapter_id, cleared = counts.mentions_deleted, "cleared existing mentions");

    let pipeline = loader.get()?;
    let spans = pipeline.recognize(&chapter.content)?;
    counts.raw_spans = spans.len();
    debug!(chapter_id, raw_spans = spans.len(), "text processed");

    let mut skipped = Vec::<String>::new();

    for span in &spans {
        let Some(entity_type) = map_label(&span.label) else {
            skipped.push(format!("{} ({})", span.text, span.label));
            continue;
        };
        if span.end_char > content_chars || span.start_char >= span.end_char {
            bail!(
                "recognizer returned span {}..{} outside chapter {chapter_id} ({content_chars} chars)",
                span.start_char,
                span.end_char
            );
        }

        counts.entities_found += 1;

        let entity = match find_entity_by_name(&tx, chapter.project_id, &span.text)? {
            Some(existing) => {
                counts.entities_reused += 1;
                debug!(
                    name = %span.text,
                    stored_type = %existing.entity_type,
                    span_type = %entity_type,
                    "using existing entity"
                );
                existing
            }
            None => {
                let created = insert_entity(&tx, chapter.project_id, &span.text, entity_type)?;
                counts.entities_created += 1;
                debug!(name = %span.text, entity_type = %entity_type, "created entity");
                created
            }
        };

        let context = char_index.context_window(span.start_char, span.end_char, CONTEXT_RADIUS);
        insert_mention(
            &tx,
            &NewMention {
                entity_id: entity.id,
                chapter_id: chapter.id,
                start_pos: span.start_char,
                end_pos: span.end_char,
                context,
                mentioned_as: &span.text,
            },
        )?;
        counts.mentions_created += 1;
    }

    counts.skipped_spans = skipped.len();

    tx.commit()
        .with_context(|| format!("failed to commit extraction for chapter {chapter_id}"))?;

    Ok(ExtractionReport {
        report_version: 1,
        run_id: run_id.to_string(),
        chapter_id: chapter.id,
        project_id: chapter.project_id,
        chapter_title: chapter.title,
        language: language.to_string(),
        content_sha256: sha256_text(&chapter.content),
        started_at,
        completed_at: now_utc_string(),
        pipeline: pipeline.info().clone(),
        counts,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::anyhow;

    use super::*;
    use crate::model::EntityType;
    use crate::nlp::{PipelineConfig, RecognizedSpan, Recognizer};
    use crate::store::{insert_chapter, list_entities, list_mentions_for_chapter, open_in_memory};

    /// Labels every occurrence of the configured surface strings.
    struct FixedRecognizer {
        terms: Vec<(&'static str, &'static str)>,
        fail: bool,
    }

    impl FixedRecognizer {
        fn new(terms: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                terms,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                terms: Vec::new(),
                fail: true,
            }
        }
    }

    impl Recognizer for FixedRecognizer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn recognize(&self, text: &str) -> Result<Vec<RecognizedSpan>> {
            if self.fail {
                return Err(anyhow!("model crashed"));
            }

            let mut spans = Vec::new();
            for (term, label) in &self.terms {
                for (byte_start, matched) in text.match_indices(term) {
                    let start_char = text[..byte_start].chars().count();
                    spans.push(RecognizedSpan {
                        text: matched.to_string(),
                        label: label.to_string(),
                        start_char,
                        end_char: start_char + matched.chars().count(),
                    });
                }
            }
            spans.sort_by_key(|span| span.start_char);
            Ok(spans)
        }
    }

    /// Returns the same spans whatever the text.
    struct ScriptedRecognizer {
        spans: Vec<RecognizedSpan>,
    }

    impl Recognizer for ScriptedRecognizer {
        fn name(&self) -> &str {
            "scripted"
        }

        fn recognize(&self, _text: &str) -> Result<Vec<RecognizedSpan>> {
            Ok(self.spans.clone())
        }
    }

    fn span(text: &str, label: &str, start_char: usize, end_char: usize) -> RecognizedSpan {
        RecognizedSpan {
            text: text.to_string(),
            label: label.to_string(),
            start_char,
            end_char,
        }
    }

    fn loader(terms: Vec<(&'static str, &'static str)>) -> PipelineLoader {
        PipelineLoader::from_recognizer(Box::new(FixedRecognizer::new(terms)))
    }

    fn mention_rows(connection: &Connection, chapter_id: i64) -> Vec<(String, i64, i64, String)> {
        list_mentions_for_chapter(connection, chapter_id)
            .expect("mentions")
            .into_iter()
            .map(|mention| {
                (
                    mention.entity_name,
                    mention.start_pos,
                    mention.end_pos,
                    mention.mentioned_as,
                )
            })
            .collect()
    }

    #[test]
    fn extracts_characters_and_locations_with_full_sentence_context() {
        let mut connection = open_in_memory();
        let text = "Alice walked into Rivendell.";
        let chapter_id = insert_chapter(&connection, 1, Some("One"), text).expect("chapter");
        let loader = loader(vec![("Alice", "PERSON"), ("Rivendell", "GPE")]);

        let report = process_chapter(&mut connection, &loader, chapter_id, "en").expect("extract");
        assert_eq!(report.counts.entities_found, 2);
        assert_eq!(report.counts.entities_created, 2);
        assert_eq!(report.counts.mentions_created, 2);

        let entities = list_entities(&connection, 1).expect("entities");
        let mut kinds = entities
            .iter()
            .map(|summary| (summary.entity.name.as_str(), summary.entity.entity_type))
            .collect::<Vec<_>>();
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                ("Alice", EntityType::Character),
                ("Rivendell", EntityType::Location)
            ]
        );

        let mentions = list_mentions_for_chapter(&connection, chapter_id).expect("mentions");
        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[0].mentioned_as, "Alice");
        assert_eq!((mentions[0].start_pos, mentions[0].end_pos), (0, 5));
        assert_eq!(mentions[1].mentioned_as, "Rivendell");
        assert_eq!((mentions[1].start_pos, mentions[1].end_pos), (18, 27));
        assert!(mentions.iter().all(|mention| mention.context == text));
    }

    #[test]
    fn chapter_without_entities_clears_previous_mentions() {
        let mut connection = open_in_memory();
        let chapter_id =
            insert_chapter(&connection, 1, None, "Alice slept.").expect("chapter");
        process_chapter(&mut connection, &loader(vec![("Alice", "PERSON")]), chapter_id, "en")
            .expect("first run");
        assert_eq!(mention_rows(&connection, chapter_id).len(), 1);

        let report = process_chapter(&mut connection, &loader(Vec::new()), chapter_id, "en")
            .expect("second run");
        assert_eq!(report.counts.mentions_deleted, 1);
        assert_eq!(report.counts.mentions_created, 0);
        assert!(mention_rows(&connection, chapter_id).is_empty());
    }

    #[test]
    fn rerunning_an_unchanged_chapter_is_idempotent() {
        let mut connection = open_in_memory();
        let chapter_id = insert_chapter(
            &connection,
            1,
            None,
            "Frodo left the Shire. Later Frodo returned to the Shire.",
        )
        .expect("chapter");
        let loader = loader(vec![("Frodo", "PERSON"), ("Shire", "LOC")]);

        process_chapter(&mut connection, &loader, chapter_id, "en").expect("first run");
        let first_entities = list_entities(&connection, 1).expect("entities");
        let first_mentions = mention_rows(&connection, chapter_id);

        let report = process_chapter(&mut connection, &loader, chapter_id, "en").expect("rerun");
        assert_eq!(report.counts.entities_created, 0);
        assert_eq!(report.counts.entities_reused, 4);

        let second_entities = list_entities(&connection, 1).expect("entities");
        assert_eq!(
            first_entities
                .iter()
                .map(|summary| summary.entity.id)
                .collect::<Vec<i64>>(),
            second_entities
                .iter()
                .map(|summary| summary.entity.id)
                .collect::<Vec<i64>>()
        );
        assert_eq!(first_mentions, mention_rows(&connection, chapter_id));
        assert_eq!(first_mentions.len(), 4);
    }

    #[test]
    fn unmapped_labels_never_produce_entities_or_mentions() {
        let mut connection = open_in_memory();
        let chapter_id =
            insert_chapter(&connection, 1, None, "On Tuesday Sam paid 40 coins.").expect("chapter");
        let loader = loader(vec![("Tuesday", "DATE"), ("40", "CARDINAL"), ("Sam", "PERSON")]);

        let report = process_chapter(&mut connection, &loader, chapter_id, "en").expect("extract");
        assert_eq!(report.counts.raw_spans, 3);
        assert_eq!(report.counts.skipped_spans, 2);
        assert_eq!(
            report.skipped,
            vec!["Tuesday (DATE)".to_string(), "40 (CARDINAL)".to_string()]
        );

        let entities = list_entities(&connection, 1).expect("entities");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity.name, "Sam");
        assert_eq!(mention_rows(&connection, chapter_id).len(), 1);
    }

    #[test]
    fn case_variants_resolve_to_one_entity_keeping_first_type() {
        let mut connection = open_in_memory();
        let chapter_id = insert_chapter(
            &connection,
            1,
            None,
            "The Ring was heavy. Gollum hissed about the RING.",
        )
        .expect("chapter");
        let loader = loader(vec![("Ring", "PRODUCT"), ("RING", "WORK_OF_ART")]);

        let report = process_chapter(&mut connection, &loader, chapter_id, "en").expect("extract");
        assert_eq!(report.counts.entities_created, 1);
        assert_eq!(report.counts.entities_reused, 1);

        let entities = list_entities(&connection, 1).expect("entities");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity.name, "Ring");
        assert_eq!(entities[0].entity.entity_type, EntityType::Item);
        assert_eq!(entities[0].mention_count, 2);

        let surface = mention_rows(&connection, chapter_id)
            .into_iter()
            .map(|row| row.3)
            .collect::<Vec<String>>();
        assert_eq!(surface, vec!["Ring".to_string(), "RING".to_string()]);
    }

    #[test]
    fn entities_are_shared_across_chapters_but_not_projects() {
        let mut connection = open_in_memory();
        let first = insert_chapter(&connection, 1, None, "Bilbo sang.").expect("chapter");
        let second = insert_chapter(&connection, 1, None, "bilbo slept.").expect("chapter");
        let other = insert_chapter(&connection, 2, None, "Bilbo wrote.").expect("chapter");
        let loader = loader(vec![("Bilbo", "PERSON"), ("bilbo", "PERSON")]);

        for chapter_id in [first, second, other] {
            process_chapter(&mut connection, &loader, chapter_id, "en").expect("extract");
        }

        let project_one = list_entities(&connection, 1).expect("entities");
        assert_eq!(project_one.len(), 1);
        assert_eq!(project_one[0].chapter_count, 2);
        assert_eq!(list_entities(&connection, 2).expect("entities").len(), 1);
    }

    #[test]
    fn context_window_is_clamped_for_long_text() {
        let mut connection = open_in_memory();
        let padding = "x".repeat(80);
        let text = format!("Merry {padding} Pippin");
        let chapter_id = insert_chapter(&connection, 1, None, &text).expect("chapter");
        let loader = loader(vec![("Merry", "PERSON"), ("Pippin", "PERSON")]);

        process_chapter(&mut connection, &loader, chapter_id, "en").expect("extract");
        let mentions = list_mentions_for_chapter(&connection, chapter_id).expect("mentions");
        let text_chars = text.chars().count();

        assert_eq!(mentions[0].context, text.chars().take(55).collect::<String>());
        assert_eq!(
            mentions[1].context,
            text.chars().skip(text_chars - 56).collect::<String>()
        );
        for mention in &mentions {
            assert!(mention.context.chars().count() <= "Pippin".len() + 2 * CONTEXT_RADIUS);
            assert!(text.contains(&mention.context));
        }
    }

    #[test]
    fn missing_chapter_is_an_error_and_skips_model_loading() {
        let mut connection = open_in_memory();
        let loader = PipelineLoader::new(PipelineConfig {
            models_dir: PathBuf::from("/nonexistent/storyner-models"),
            preferred_model: "lg".to_string(),
            fallback_model: "sm".to_string(),
        });

        let err = process_chapter(&mut connection, &loader, 99, "en")
            .err()
            .expect("missing chapter should fail");
        assert!(format!("{err:#}").contains("chapter 99 not found"));
        assert!(!loader.is_loaded());
    }

    #[test]
    fn recognizer_failure_keeps_previous_mentions() {
        let mut connection = open_in_memory();
        let chapter_id =
            insert_chapter(&connection, 1, None, "Aragorn drew Anduril.").expect("chapter");
        process_chapter(
            &mut connection,
            &loader(vec![("Aragorn", "PERSON"), ("Anduril", "PRODUCT")]),
            chapter_id,
            "en",
        )
        .expect("first run");
        let before = mention_rows(&connection, chapter_id);

        let failing = PipelineLoader::from_recognizer(Box::new(FixedRecognizer::failing()));
        let err = process_chapter(&mut connection, &failing, chapter_id, "en")
            .err()
            .expect("run should fail");
        assert!(format!("{err:#}").contains("model crashed"));

        assert_eq!(before, mention_rows(&connection, chapter_id));
        assert_eq!(list_entities(&connection, 1).expect("entities").len(), 2);
    }

    #[test]
    fn out_of_range_span_rolls_back_entities_created_earlier_in_the_run() {
        let mut connection = open_in_memory();
        let chapter_id = insert_chapter(&connection, 1, None, "Sam cooked.").expect("chapter");
        process_chapter(
            &mut connection,
            &loader(vec![("cooked", "EVENT")]),
            chapter_id,
            "en",
        )
        .expect("first run");
        let mentions_before = mention_rows(&connection, chapter_id);
        let entities_before = list_entities(&connection, 1)
            .expect("entities")
            .into_iter()
            .map(|summary| (summary.entity.id, summary.entity.name))
            .collect::<Vec<_>>();

        let broken = PipelineLoader::from_recognizer(Box::new(ScriptedRecognizer {
            spans: vec![span("Sam", "PERSON", 0, 3), span("Zed", "PERSON", 50, 53)],
        }));
        let err = process_chapter(&mut connection, &broken, chapter_id, "en")
            .err()
            .expect("run should fail");
        assert_eq!(
            err.to_string(),
            "recognizer returned span 50..53 outside chapter 1 (11 chars)"
        );

        assert_eq!(mentions_before, mention_rows(&connection, chapter_id));
        let entities_after = list_entities(&connection, 1)
            .expect("entities")
            .into_iter()
            .map(|summary| (summary.entity.id, summary.entity.name))
            .collect::<Vec<_>>();
        assert_eq!(entities_before, entities_after);
        assert!(find_entity_by_name(&connection, 1, "Sam").expect("lookup").is_none());
    }

    #[test]
    fn inverted_spans_are_rejected() {
        let mut connection = open_in_memory();
        let chapter_id = insert_chapter(&connection, 1, None, "Sam cooked.").expect("chapter");
        let broken = PipelineLoader::from_recognizer(Box::new(ScriptedRecognizer {
            spans: vec![span("Sam", "PERSON", 3, 3)],
        }));

        let err = process_chapter(&mut connection, &broken, chapter_id, "en")
            .err()
            .expect("run should fail");
        assert!(err.to_string().contains("span 3..3 outside chapter"));
        assert!(mention_rows(&connection, chapter_id).is_empty());
    }

    #[test]
    fn repeated_runs_reuse_the_pipeline_and_record_language() {
        let mut connection = open_in_memory();
        let chapter_id = insert_chapter(&connection, 1, None, "Sam cooked.").expect("chapter");
        let recognizer = FixedRecognizer::new(vec![("Sam", "PERSON")]);
        let loader = PipelineLoader::from_recognizer(Box::new(recognizer));

        for _ in 0..3 {
            process_chapter(&mut connection, &loader, chapter_id, "fr").expect("extract");
        }
        let report = process_chapter(&mut connection, &loader, chapter_id, "fr").expect("extract");
        assert_eq!(report.language, "fr");
        assert_eq!(report.pipeline.model_name, "fixed");
        assert_eq!(report.counts.mentions_deleted, 1);
    }
}
