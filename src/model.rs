use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Character,
    Location,
    Organization,
    Item,
    Concept,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Location => "location",
            Self::Organization => "organization",
            Self::Item => "item",
            Self::Concept => "concept",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "character" => Ok(Self::Character),
            "location" => Ok(Self::Location),
            "organization" => Ok(Self::Organization),
            "item" => Ok(Self::Item),
            "concept" => Ok(Self::Concept),
            other => bail!("unknown entity type: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Chapter {
    pub id: i64,
    pub project_id: i64,
    pub title: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    #[serde(flatten)]
    pub entity: Entity,
    pub mention_count: i64,
    pub chapter_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMention<'a> {
    pub entity_id: i64,
    pub chapter_id: i64,
    pub start_pos: usize,
    pub end_pos: usize,
    pub context: &'a str,
    pub mentioned_as: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityMention {
    pub id: i64,
    pub entity_id: i64,
    pub entity_name: String,
    pub entity_type: EntityType,
    pub chapter_id: i64,
    pub start_pos: i64,
    pub end_pos: i64,
    pub context: String,
    pub mentioned_as: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineInfo {
    pub model_name: String,
    pub model_version: String,
    pub model_tier: String,
    pub model_sha256: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionCounts {
    pub content_chars: usize,
    pub raw_spans: usize,
    pub entities_found: usize,
    pub entities_created: usize,
    pub entities_reused: usize,
    pub mentions_deleted: usize,
    pub mentions_created: usize,
    pub skipped_spans: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub report_version: u32,
    pub run_id: String,
    pub chapter_id: i64,
    pub project_id: i64,
    pub chapter_title: Option<String>,
    pub language: String,
    pub content_sha256: String,
    pub started_at: String,
    pub completed_at: String,
    pub pipeline: PipelineInfo,
    pub counts: ExtractionCounts,
    pub skipped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::EntityType;

    #[test]
    fn entity_type_parses_its_own_names() {
        for entity_type in [
            EntityType::Character,
            EntityType::Location,
            EntityType::Organization,
            EntityType::Item,
            EntityType::Concept,
        ] {
            let parsed: EntityType = entity_type.as_str().parse().expect("known type");
            assert_eq!(parsed, entity_type);
        }
        assert!("person".parse::<EntityType>().is_err());
    }
}
