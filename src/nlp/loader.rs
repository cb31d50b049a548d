use std::cell::OnceCell;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};

use super::{GazetteerRecognizer, RecognizedSpan, Recognizer, gliner};
use crate::model::PipelineInfo;
use crate::util::sha256_file;

pub const DEFAULT_PREFERRED_MODEL: &str = "en_story_lg";
pub const DEFAULT_FALLBACK_MODEL: &str = "en_story_sm";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub models_dir: PathBuf,
    pub preferred_model: String,
    pub fallback_model: String,
}

/// Where a named model lives under the models directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// `<models_dir>/<name>/` holding a GLiNER `model.onnx` and `tokenizer.json`.
    Pretrained(PathBuf),
    /// `<models_dir>/<name>.json` gazetteer model.
    Gazetteer(PathBuf),
}

impl PipelineConfig {
    /// A pretrained model directory wins over a gazetteer file of the same name.
    pub fn resolve(&self, model_name: &str) -> Result<ModelSource> {
        let dir = self.models_dir.join(model_name);
        if gliner::is_pretrained_dir(&dir) {
            return Ok(ModelSource::Pretrained(dir));
        }

        let path = self.models_dir.join(format!("{model_name}.json"));
        if path.is_file() {
            return Ok(ModelSource::Gazetteer(path));
        }

        bail!(
            "model {model_name} not found: expected {} or {}",
            dir.join(gliner::MODEL_FILE).display(),
            path.display()
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModelTier {
    Preferred,
    Fallback,
    #[cfg(test)]
    Provided,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preferred => "preferred",
            Self::Fallback => "fallback",
            #[cfg(test)]
            Self::Provided => "provided",
        }
    }
}

pub struct Pipeline {
    recognizer: Box<dyn Recognizer>,
    tier: ModelTier,
    info: PipelineInfo,
}

impl Pipeline {
    pub fn info(&self) -> &PipelineInfo {
        &self.info
    }

    pub fn tier(&self) -> ModelTier {
        self.tier
    }

    pub fn recognize(&self, text: &str) -> Result<Vec<RecognizedSpan>> {
        self.recognizer
            .recognize(text)
            .with_context(|| format!("recognizer {} failed", self.recognizer.name()))
    }
}

/// Caller-owned, lazily initialized recognition pipeline.
///
/// The first `get` loads the preferred model and falls back to the lighter one;
/// every later call returns the same pipeline.
pub struct PipelineLoader {
    config: Option<PipelineConfig>,
    pipeline: OnceCell<Pipeline>,
}

impl PipelineLoader {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Some(config),
            pipeline: OnceCell::new(),
        }
    }

    #[cfg(test)]
    pub fn from_recognizer(recognizer: Box<dyn Recognizer>) -> Self {
        let info = PipelineInfo {
            model_name: recognizer.name().to_string(),
            model_version: "0.0.0".to_string(),
            model_tier: ModelTier::Provided.as_str().to_string(),
            model_sha256: String::new(),
        };
        let pipeline = OnceCell::new();
        let _ = pipeline.set(Pipeline {
            recognizer,
            tier: ModelTier::Provided,
            info,
        });
        Self {
            config: None,
            pipeline,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.pipeline.get().is_some()
    }

    pub fn get(&self) -> Result<&Pipeline> {
        if let Some(pipeline) = self.pipeline.get() {
            return Ok(pipeline);
        }

        let Some(config) = &self.config else {
            bail!("pipeline loader has neither a loaded pipeline nor a model config");
        };
        let loaded = load_pipeline(config)?;
        Ok(self.pipeline.get_or_init(|| loaded))
    }
}

fn load_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    info!(
        models_dir = %config.models_dir.display(),
        preferred = %config.preferred_model,
        "loading recognition model"
    );

    let preferred_err = match load_tier(config, ModelTier::Preferred) {
        Ok(pipeline) => return Ok(pipeline),
        Err(err) => err,
    };
    warn!(
        model = %config.preferred_model,
        error = %format!("{preferred_err:#}"),
        "could not load preferred model, trying fallback"
    );

    match load_tier(config, ModelTier::Fallback) {
        Ok(pipeline) => Ok(pipeline),
        Err(fallback_err) => {
            error!(
                model = %config.fallback_model,
                error = %format!("{fallback_err:#}"),
                "failed to load fallback model"
            );
            Err(fallback_err.context(format!(
                "no recognition model could be loaded (preferred {}: {preferred_err:#})",
                config.preferred_model
            )))
        }
    }
}

fn load_tier(config: &PipelineConfig, tier: ModelTier) -> Result<Pipeline> {
    let model_name = match tier {
        ModelTier::Fallback => &config.fallback_model,
        _ => &config.preferred_model,
    };

    let (recognizer, model_version, hashed_path): (Box<dyn Recognizer>, String, PathBuf) =
        match config.resolve(model_name)? {
            ModelSource::Pretrained(dir) => {
                let recognizer = gliner::load(model_name, &dir)?;
                (recognizer, "gliner".to_string(), dir.join(gliner::MODEL_FILE))
            }
            ModelSource::Gazetteer(path) => {
                let recognizer = GazetteerRecognizer::load(&path)?;
                debug!(
                    model = %model_name,
                    language = %recognizer.language(),
                    "parsed gazetteer model"
                );
                let version = recognizer.version().to_string();
                (Box::new(recognizer), version, path)
            }
        };
    let model_sha256 = sha256_file(&hashed_path)?;
    let info = PipelineInfo {
        model_name: model_name.clone(),
        model_version,
        model_tier: tier.as_str().to_string(),
        model_sha256,
    };

    info!(
        model = %info.model_name,
        version = %info.model_version,
        tier = tier.as_str(),
        path = %hashed_path.display(),
        "loaded recognition model"
    );

    Ok(Pipeline {
        recognizer,
        tier,
        info,
    })
}
