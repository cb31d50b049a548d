use anyhow::Result;
use tracing::info;

use crate::cli::InitArgs;
use crate::nlp::install_bundled_models;
use crate::store::{DB_SCHEMA_VERSION, count_rows, open_database};

pub fn run(args: InitArgs) -> Result<()> {
    let db_path = args.store.resolved_db_path();
    let connection = open_database(&db_path)?;

    let chapters = count_rows(&connection, "SELECT COUNT(*) FROM chapters")?;
    info!(
        path = %db_path.display(),
        schema_version = DB_SCHEMA_VERSION,
        chapters,
        "database ready"
    );

    let models_dir = args.resolved_models_dir();
    let installed = install_bundled_models(&models_dir, args.refresh_models)?;
    info!(
        models_dir = %models_dir.display(),
        installed = installed.len(),
        "models ready"
    );

    Ok(())
}
