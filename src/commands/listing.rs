use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::{EntitiesArgs, MentionsArgs};
use crate::store::{list_entities, list_mentions_for_chapter, load_chapter, open_existing};

pub fn entities(args: EntitiesArgs) -> Result<()> {
    let connection = open_existing(&args.store.resolved_db_path())?;
    let entities = list_entities(&connection, args.project_id)?;

    if args.json {
        return write_json(&entities);
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(
        output,
        "Project {}: {} entities",
        args.project_id,
        entities.len()
    )?;
    for summary in &entities {
        writeln!(
            output,
            "{}\t{}\t{}\tmentions={} chapters={}",
            summary.entity.id,
            summary.entity.entity_type,
            summary.entity.name,
            summary.mention_count,
            summary.chapter_count
        )?;
    }
    output.flush()?;
    Ok(())
}

pub fn mentions(args: MentionsArgs) -> Result<()> {
    let connection = open_existing(&args.store.resolved_db_path())?;
    let chapter = load_chapter(&connection, args.chapter_id)?
        .with_context(|| format!("chapter {} not found", args.chapter_id))?;
    let mentions = list_mentions_for_chapter(&connection, chapter.id)?;

    if args.json {
        return write_json(&mentions);
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(
        output,
        "Chapter {} ({}): {} mentions",
        chapter.id,
        chapter.title.as_deref().unwrap_or("Untitled"),
        mentions.len()
    )?;
    for mention in &mentions {
        writeln!(
            output,
            "{}..{}\t{}\t{} -> {}",
            mention.start_pos,
            mention.end_pos,
            mention.entity_type,
            mention.mentioned_as,
            mention.entity_name
        )?;
        writeln!(output, "\tcontext: {}", mention.context.replace('\n', " "))?;
    }
    output.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(value: &T) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, value).context("failed to serialize json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}
