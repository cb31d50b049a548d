use std::io::{self, Write};

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use crate::cli::{ChapterAddArgs, ChapterUpdateArgs, ModelArgs, StoreArgs};
use crate::commands::extract::process_chapter;
use crate::nlp::PipelineLoader;
use crate::store::{insert_chapter, open_database, open_existing, update_chapter_content};
use crate::util::read_text_file;

pub fn add(args: ChapterAddArgs) -> Result<()> {
    let content = read_text_file(&args.text_file)?;
    let db_path = args.store.resolved_db_path();
    let mut connection = open_database(&db_path)?;

    let chapter_id = insert_chapter(
        &connection,
        args.project_id,
        args.title.as_deref(),
        &content,
    )?;
    info!(
        chapter_id,
        project_id = args.project_id,
        content_chars = content.chars().count(),
        "chapter saved"
    );
    writeln!(io::stdout().lock(), "{chapter_id}")?;

    if args.extract {
        extract_after_save(
            &mut connection,
            &args.store,
            &args.models,
            chapter_id,
            &args.language,
        )?;
    }

    Ok(())
}

pub fn update(args: ChapterUpdateArgs) -> Result<()> {
    let content = read_text_file(&args.text_file)?;
    let db_path = args.store.resolved_db_path();
    let mut connection = open_existing(&db_path)?;

    update_chapter_content(&connection, args.chapter_id, args.title.as_deref(), &content)?;
    info!(
        chapter_id = args.chapter_id,
        content_chars = content.chars().count(),
        "chapter updated"
    );

    if args.extract {
        extract_after_save(
            &mut connection,
            &args.store,
            &args.models,
            args.chapter_id,
            &args.language,
        )?;
    }

    Ok(())
}

fn extract_after_save(
    connection: &mut Connection,
    store: &StoreArgs,
    models: &ModelArgs,
    chapter_id: i64,
    language: &str,
) -> Result<()> {
    let loader = PipelineLoader::new(models.pipeline_config(store));
    process_chapter(connection, &loader, chapter_id, language)?;
    Ok(())
}
