use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::util::ensure_directory;

/// Gazetteer models compiled into the binary, by model name.
pub const BUNDLED_MODELS: &[(&str, &str)] = &[
    ("en_story_lg", include_str!("../../models/en_story_lg.json")),
    ("en_story_sm", include_str!("../../models/en_story_sm.json")),
];

/// Writes the bundled models into `models_dir` as `<name>.json`. Existing files
/// are left alone unless `overwrite` is set. Returns the paths written.
pub fn install_bundled_models(models_dir: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    ensure_directory(models_dir)?;

    let mut written = Vec::new();
    for (name, body) in BUNDLED_MODELS {
        let path = models_dir.join(format!("{name}.json"));
        if path.exists() && !overwrite {
            debug!(model = *name, path = %path.display(), "model file already present");
            continue;
        }
        fs::write(&path, body)
            .with_context(|| format!("failed to write model file {}", path.display()))?;
        info!(model = *name, path = %path.display(), "installed bundled model");
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::{GazetteerRecognizer, Recognizer};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "storyner-bundled-{}-{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn installs_missing_models_and_keeps_edited_ones() {
        let dir = scratch_dir("install");

        let written = install_bundled_models(&dir, false).expect("install");
        assert_eq!(written.len(), BUNDLED_MODELS.len());

        let small = dir.join("en_story_sm.json");
        fs::write(&small, r#"{ "name": "en_story_sm", "phrases": [] }"#).expect("edit model");
        assert!(install_bundled_models(&dir, false).expect("reinstall").is_empty());
        assert!(fs::read_to_string(&small).expect("read").contains(r#""phrases": []"#));

        let refreshed = install_bundled_models(&dir, true).expect("refresh");
        assert_eq!(refreshed.len(), BUNDLED_MODELS.len());
        assert!(GazetteerRecognizer::load(&small).is_ok());
    }

    #[test]
    fn large_model_covers_titles_places_and_landmarks() {
        let dir = scratch_dir("large");
        install_bundled_models(&dir, false).expect("install");
        let recognizer =
            GazetteerRecognizer::load(&dir.join("en_story_lg.json")).expect("large model");

        let spans = recognizer
            .recognize("Inspector Lestrade met them at the Tower of London.")
            .expect("recognize");
        let found = spans
            .iter()
            .map(|span| (span.text.as_str(), span.label.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            found,
            vec![("Lestrade", "PERSON"), ("Tower of London", "FAC")]
        );
    }
}
