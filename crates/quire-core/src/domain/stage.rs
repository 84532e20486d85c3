//! Pipeline stages and the values that flow between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of the generation pipeline. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    WordSelection,
    Research,
    Draft,
    Conversion,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::WordSelection,
        Stage::Research,
        Stage::Draft,
        Stage::Conversion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::WordSelection => "word_selection",
            Stage::Research => "research",
            Stage::Draft => "draft",
            Stage::Conversion => "conversion",
        }
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::WordSelection => Some(Stage::Research),
            Stage::Research => Some(Stage::Draft),
            Stage::Draft => Some(Stage::Conversion),
            Stage::Conversion => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who wrote a history entry: the prompt we sent or the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the conversation the stages build up.
/// Entries are append-only: a stage never rewrites what earlier stages wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub stage: Stage,
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(stage: Stage, role: Role, content: impl Into<String>) -> Self {
        Self {
            stage,
            role,
            content: content.into(),
        }
    }
}

/// Token accounting reported by the generation capability for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageMetrics {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Stage-specific input, built from the artifacts of the stages before it.
#[derive(Debug, Clone, PartialEq)]
pub enum StageInput {
    /// Impression tasks carry a pre-drawn candidate list; RSS tasks leave the
    /// choice to the generation capability.
    WordSelection { candidates: Option<Vec<String>> },
    Research { words: Vec<String> },
    Draft { words: Vec<String>, sources: Vec<String> },
    Conversion { draft: String },
}

impl StageInput {
    pub fn stage(&self) -> Stage {
        match self {
            StageInput::WordSelection { .. } => Stage::WordSelection,
            StageInput::Research { .. } => Stage::Research,
            StageInput::Draft { .. } => Stage::Draft,
            StageInput::Conversion { .. } => Stage::Conversion,
        }
    }
}

/// What a stage produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StageArtifact {
    Words(Vec<String>),
    Sources(Vec<String>),
    Draft(String),
    /// Structured final document; validated against the article schema.
    Document(serde_json::Value),
}

impl StageArtifact {
    pub fn kind(&self) -> &'static str {
        match self {
            StageArtifact::Words(_) => "words",
            StageArtifact::Sources(_) => "sources",
            StageArtifact::Draft(_) => "draft",
            StageArtifact::Document(_) => "document",
        }
    }

    /// The stage that is allowed to produce this artifact.
    pub fn produced_by(&self) -> Stage {
        match self {
            StageArtifact::Words(_) => Stage::WordSelection,
            StageArtifact::Sources(_) => Stage::Research,
            StageArtifact::Draft(_) => Stage::Draft,
            StageArtifact::Document(_) => Stage::Conversion,
        }
    }
}

/// Result of one stage call: history delta, artifact, usage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub entries: Vec<HistoryEntry>,
    pub artifact: StageArtifact,
    pub usage: UsageMetrics,
}
