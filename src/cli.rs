use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::nlp::{DEFAULT_FALLBACK_MODEL, DEFAULT_PREFERRED_MODEL, PipelineConfig};

#[derive(Parser, Debug)]
#[command(
    name = "storyner",
    version,
    about = "Named entity extraction for manuscript chapters"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Init(InitArgs),
    Chapter(ChapterArgs),
    Extract(ExtractArgs),
    Entities(EntitiesArgs),
    Mentions(MentionsArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = ".cache/storyner")]
    pub data_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

impl StoreArgs {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_root.join("story_index.sqlite"))
    }

    pub fn default_models_dir(&self) -> PathBuf {
        self.data_root.join("models")
    }
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    #[arg(long)]
    pub models_dir: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_PREFERRED_MODEL)]
    pub preferred_model: String,

    #[arg(long, default_value = DEFAULT_FALLBACK_MODEL)]
    pub fallback_model: String,
}

impl ModelArgs {
    pub fn pipeline_config(&self, store: &StoreArgs) -> PipelineConfig {
        PipelineConfig {
            models_dir: self
                .models_dir
                .clone()
                .unwrap_or_else(|| store.default_models_dir()),
            preferred_model: self.preferred_model.clone(),
            fallback_model: self.fallback_model.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub models_dir: Option<PathBuf>,

    /// Rewrite bundled model files even when they already exist.
    #[arg(long, default_value_t = false)]
    pub refresh_models: bool,
}

impl InitArgs {
    pub fn resolved_models_dir(&self) -> PathBuf {
        self.models_dir
            .clone()
            .unwrap_or_else(|| self.store.default_models_dir())
    }
}

#[derive(Args, Debug)]
pub struct ChapterArgs {
    #[command(subcommand)]
    pub command: ChapterCommands,
}

#[derive(Subcommand, Debug)]
pub enum ChapterCommands {
    Add(ChapterAddArgs),
    Update(ChapterUpdateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ChapterAddArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub models: ModelArgs,

    #[arg(long)]
    pub project_id: i64,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub text_file: PathBuf,

    #[arg(long, default_value_t = false)]
    pub extract: bool,

    #[arg(long, default_value = "en")]
    pub language: String,
}

#[derive(Args, Debug, Clone)]
pub struct ChapterUpdateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub models: ModelArgs,

    #[arg(long)]
    pub chapter_id: i64,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub text_file: PathBuf,

    #[arg(long, default_value_t = false)]
    pub extract: bool,

    #[arg(long, default_value = "en")]
    pub language: String,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub models: ModelArgs,

    #[arg(long)]
    pub chapter_id: i64,

    #[arg(long, default_value = "en")]
    pub language: String,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EntitiesArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub project_id: i64,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MentionsArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub chapter_id: i64,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub models: ModelArgs,
}
