use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::labels::known_labels;
use crate::nlp::PipelineLoader;
use crate::store::count_rows;

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args.store.resolved_db_path();
    let config = args.models.pipeline_config(&args.store);

    info!(data_root = %args.store.data_root.display(), "status requested");

    if db_path.exists() {
        let conn = Connection::open(&db_path)?;
        let schema_version = query_text(
            &conn,
            "SELECT value FROM metadata WHERE key = 'db_schema_version'",
        )
        .unwrap_or_default();
        let chapters = count_rows(&conn, "SELECT COUNT(*) FROM chapters").unwrap_or(0);
        let entities = count_rows(&conn, "SELECT COUNT(*) FROM entities").unwrap_or(0);
        let mentions = count_rows(&conn, "SELECT COUNT(*) FROM entity_mentions").unwrap_or(0);

        info!(
            path = %db_path.display(),
            schema_version = %schema_version,
            chapters,
            entities,
            mentions,
            "database status"
        );
    } else {
        warn!(path = %db_path.display(), "database file missing");
    }

    let loader = PipelineLoader::new(config.clone());
    match loader.get() {
        Ok(pipeline) => {
            let model = pipeline.info();
            info!(
                model = %model.model_name,
                version = %model.model_version,
                tier = pipeline.tier().as_str(),
                sha256 = %model.model_sha256,
                "recognition model available"
            );
        }
        Err(err) => warn!(
            models_dir = %config.models_dir.display(),
            error = %format!("{err:#}"),
            "no recognition model available"
        ),
    }

    info!(
        labels = %known_labels().collect::<Vec<&str>>().join(","),
        "mapped recognizer labels"
    );

    Ok(())
}

fn query_text(conn: &Connection, sql: &str) -> Result<String> {
    let value = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(value)
}
