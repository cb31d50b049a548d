use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};

use crate::model::{Chapter, Entity, EntityMention, EntitySummary, EntityType, NewMention};
use crate::util::{ensure_directory, now_utc_string};

pub const DB_SCHEMA_VERSION: &str = "0.1.0";

pub fn open_database(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        ensure_directory(parent)?;
    }

    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

/// Like `open_database`, but refuses to create a new database file.
pub fn open_existing(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        bail!(
            "database {} does not exist; run `storyner init` first",
            db_path.display()
        );
    }
    open_database(db_path)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys")?;
    Ok(())
}

pub fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chapters (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              project_id INTEGER NOT NULL,
              title TEXT,
              content TEXT NOT NULL,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              project_id INTEGER NOT NULL,
              name TEXT NOT NULL,
              name_key TEXT NOT NULL,
              entity_type TEXT NOT NULL,
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entity_mentions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              entity_id INTEGER NOT NULL,
              chapter_id INTEGER NOT NULL,
              start_pos INTEGER NOT NULL,
              end_pos INTEGER NOT NULL,
              context TEXT NOT NULL,
              mentioned_as TEXT NOT NULL,
              created_at TEXT NOT NULL,
              FOREIGN KEY(entity_id) REFERENCES entities(id) ON DELETE CASCADE,
              FOREIGN KEY(chapter_id) REFERENCES chapters(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_chapters_project ON chapters(project_id);
            CREATE INDEX IF NOT EXISTS idx_entities_project_name_key ON entities(project_id, name_key);
            CREATE INDEX IF NOT EXISTS idx_mentions_chapter ON entity_mentions(chapter_id);
            CREATE INDEX IF NOT EXISTS idx_mentions_entity ON entity_mentions(entity_id);
            ",
        )
        .context("failed to create schema")?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

pub fn insert_chapter(
    connection: &Connection,
    project_id: i64,
    title: Option<&str>,
    content: &str,
) -> Result<i64> {
    let now = now_utc_string();
    connection
        .execute(
            "INSERT INTO chapters(project_id, title, content, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?4)",
            params![project_id, title, content, now],
        )
        .context("failed to insert chapter")?;
    Ok(connection.last_insert_rowid())
}

/// Replaces a chapter's text. A `None` title keeps the stored one.
pub fn update_chapter_content(
    connection: &Connection,
    chapter_id: i64,
    title: Option<&str>,
    content: &str,
) -> Result<()> {
    let updated = connection
        .execute(
            "UPDATE chapters
             SET content = ?2, title = COALESCE(?3, title), updated_at = ?4
             WHERE id = ?1",
            params![chapter_id, content, title, now_utc_string()],
        )
        .with_context(|| format!("failed to update chapter {chapter_id}"))?;

    if updated == 0 {
        bail!("chapter {chapter_id} not found");
    }
    Ok(())
}

pub fn load_chapter(connection: &Connection, chapter_id: i64) -> Result<Option<Chapter>> {
    connection
        .query_row(
            "SELECT id, project_id, title, content FROM chapters WHERE id = ?1",
            [chapter_id],
            |row| {
                Ok(Chapter {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    title: row.get(2)?,
                    content: row.get(3)?,
                })
            },
        )
        .optional()
        .with_context(|| format!("failed to load chapter {chapter_id}"))
}

pub fn delete_mentions_for_chapter(connection: &Connection, chapter_id: i64) -> Result<usize> {
    connection
        .execute(
            "DELETE FROM entity_mentions WHERE chapter_id = ?1",
            [chapter_id],
        )
        .with_context(|| format!("failed to clear mentions for chapter {chapter_id}"))
}

pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Project-scoped, case-insensitive lookup. The oldest entity wins if several match.
pub fn find_entity_by_name(
    connection: &Connection,
    project_id: i64,
    name: &str,
) -> Result<Option<Entity>> {
    let row = connection
        .query_row(
            "SELECT id, project_id, name, entity_type
             FROM entities
             WHERE project_id = ?1 AND name_key = ?2
             ORDER BY id
             LIMIT 1",
            params![project_id, name_key(name)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .with_context(|| format!("failed to look up entity {name}"))?;

    row.map(|(id, project_id, name, entity_type)| -> Result<Entity> {
        Ok(Entity {
            id,
            project_id,
            name,
            entity_type: entity_type.parse()?,
        })
    })
    .transpose()
}

pub fn insert_entity(
    connection: &Connection,
    project_id: i64,
    name: &str,
    entity_type: EntityType,
) -> Result<Entity> {
    connection
        .execute(
            "INSERT INTO entities(project_id, name, name_key, entity_type, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![
                project_id,
                name,
                name_key(name),
                entity_type.as_str(),
                now_utc_string()
            ],
        )
        .with_context(|| format!("failed to insert entity {name}"))?;

    Ok(Entity {
        id: connection.last_insert_rowid(),
        project_id,
        name: name.to_string(),
        entity_type,
    })
}

pub fn insert_mention(connection: &Connection, mention: &NewMention<'_>) -> Result<i64> {
    connection
        .execute(
            "INSERT INTO entity_mentions(
               entity_id, chapter_id, start_pos, end_pos, context, mentioned_as, created_at
             ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                mention.entity_id,
                mention.chapter_id,
                mention.start_pos as i64,
                mention.end_pos as i64,
                mention.context,
                mention.mentioned_as,
                now_utc_string()
            ],
        )
        .with_context(|| {
            format!(
                "failed to insert mention {} for chapter {}",
                mention.mentioned_as, mention.chapter_id
            )
        })?;
    Ok(connection.last_insert_rowid())
}

pub fn list_entities(connection: &Connection, project_id: i64) -> Result<Vec<EntitySummary>> {
    let mut statement = connection.prepare(
        "
        SELECT e.id, e.project_id, e.name, e.entity_type,
               COUNT(m.id), COUNT(DISTINCT m.chapter_id)
        FROM entities e
        LEFT JOIN entity_mentions m ON m.entity_id = e.id
        WHERE e.project_id = ?1
        GROUP BY e.id
        ORDER BY e.entity_type, e.name_key, e.id
        ",
    )?;

    let mut rows = statement.query([project_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let entity_type: String = row.get(3)?;
        out.push(EntitySummary {
            entity: Entity {
                id: row.get(0)?,
                project_id: row.get(1)?,
                name: row.get(2)?,
                entity_type: entity_type.parse()?,
            },
            mention_count: row.get(4)?,
            chapter_count: row.get(5)?,
        });
    }
    Ok(out)
}

pub fn list_mentions_for_chapter(
    connection: &Connection,
    chapter_id: i64,
) -> Result<Vec<EntityMention>> {
    let mut statement = connection.prepare(
        "
        SELECT m.id, m.entity_id, e.name, e.entity_type, m.chapter_id,
               m.start_pos, m.end_pos, m.context, m.mentioned_as
        FROM entity_mentions m
        JOIN entities e ON e.id = m.entity_id
        WHERE m.chapter_id = ?1
        ORDER BY m.start_pos, m.id
        ",
    )?;

    let mut rows = statement.query([chapter_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let entity_type: String = row.get(3)?;
        out.push(EntityMention {
            id: row.get(0)?,
            entity_id: row.get(1)?,
            entity_name: row.get(2)?,
            entity_type: entity_type.parse()?,
            chapter_id: row.get(4)?,
            start_pos: row.get(5)?,
            end_pos: row.get(6)?,
            context: row.get(7)?,
            mentioned_as: row.get(8)?,
        });
    }
    Ok(out)
}

pub fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let connection = Connection::open_in_memory().expect("in-memory DB should open");
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .expect("foreign keys should enable");
    ensure_schema(&connection).expect("schema should apply");
    connection
}
