//! Checkpoint document: how far the pipeline got for one task.
//!
//! Stored in the task row as JSON. Shape (version 1):
//!
//! ```json
//! {
//!   "version": 1,
//!   "history": [ { "stage": "word_selection", "role": "assistant", "content": "..." } ],
//!   "usage": { "word_selection": { "input_tokens": 120, "output_tokens": 40 } },
//!   "artifacts": { "stage": "research", "words": ["..."], "sources": ["https://..."] }
//! }
//! ```
//!
//! `artifacts` is tagged by the last completed stage and carries only the
//! fields that exist at that point. `pending` means nothing has run yet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::QuireError;
use super::stage::{HistoryEntry, Stage, StageArtifact, StageInput, StageOutput, UsageMetrics};

/// Bump when the document shape changes incompatibly.
pub const CHECKPOINT_VERSION: u32 = 1;

/// What the task has produced so far, tagged by the last recorded stage.
/// Each variant carries everything the next stage needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageArtifacts {
    Pending {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate_words: Option<Vec<String>>,
    },
    WordSelection {
        words: Vec<String>,
    },
    Research {
        words: Vec<String>,
        sources: Vec<String>,
    },
    Draft {
        words: Vec<String>,
        sources: Vec<String>,
        draft: String,
    },
    Conversion {
        words: Vec<String>,
        sources: Vec<String>,
        draft: String,
        document: serde_json::Value,
    },
}

/// The executor's resumable progress, stored opaquely in the task row.
///
/// # Invariants
/// - `history` only grows.
/// - `usage` has one entry per recorded stage.
/// - `record` accepts exactly the stage `next_input` asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub usage: BTreeMap<Stage, UsageMetrics>,
    pub artifacts: StageArtifacts,
}

impl Checkpoint {
    /// Nothing run yet. Impression tasks embed their candidate words here.
    pub fn initial(candidate_words: Option<Vec<String>>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            history: Vec::new(),
            usage: BTreeMap::new(),
            artifacts: StageArtifacts::Pending { candidate_words },
        }
    }

    /// Decode the document stored in a task row.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, String> {
        match value.get("version").and_then(|v| v.as_u64()) {
            Some(v) if v == u64::from(CHECKPOINT_VERSION) => {}
            Some(v) => return Err(format!("unsupported checkpoint version {v}")),
            None => return Err("checkpoint has no version".to_string()),
        }
        serde_json::from_value(value.clone()).map_err(|e| format!("malformed checkpoint: {e}"))
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Last completed stage, `None` if the pipeline has not started.
    pub fn stage(&self) -> Option<Stage> {
        match &self.artifacts {
            StageArtifacts::Pending { .. } => None,
            StageArtifacts::WordSelection { .. } => Some(Stage::WordSelection),
            StageArtifacts::Research { .. } => Some(Stage::Research),
            StageArtifacts::Draft { .. } => Some(Stage::Draft),
            StageArtifacts::Conversion { .. } => Some(Stage::Conversion),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stage() == Some(Stage::Conversion)
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// The final structured document, once conversion has run.
    pub fn document(&self) -> Option<&serde_json::Value> {
        match &self.artifacts {
            StageArtifacts::Conversion { document, .. } => Some(document),
            _ => None,
        }
    }

    /// Input for the first stage that has not completed yet.
    pub fn next_input(&self) -> Option<StageInput> {
        match &self.artifacts {
            StageArtifacts::Pending { candidate_words } => Some(StageInput::WordSelection {
                candidates: candidate_words.clone(),
            }),
            StageArtifacts::WordSelection { words } => Some(StageInput::Research {
                words: words.clone(),
            }),
            StageArtifacts::Research { words, sources } => Some(StageInput::Draft {
                words: words.clone(),
                sources: sources.clone(),
            }),
            StageArtifacts::Draft { draft, .. } => Some(StageInput::Conversion {
                draft: draft.clone(),
            }),
            StageArtifacts::Conversion { .. } => None,
        }
    }

    /// Fold a stage's output into the document.
    ///
    /// Fails with `QuireError::Stage` if the artifact is of the wrong kind for
    /// the next stage or is empty.
    pub fn record(self, stage: Stage, output: StageOutput) -> Result<Self, QuireError> {
        let expected = self.stage().map_or(Some(Stage::WordSelection), Stage::next);
        if expected != Some(stage) {
            return Err(stage_error(
                stage,
                format!("checkpoint expects {expected:?} next, not {stage}"),
            ));
        }
        if output.artifact.produced_by() != stage {
            return Err(stage_error(
                stage,
                format!("returned a {} artifact", output.artifact.kind()),
            ));
        }

        let artifacts = match (self.artifacts, output.artifact) {
            (StageArtifacts::Pending { .. }, StageArtifact::Words(words)) => {
                if words.is_empty() {
                    return Err(stage_error(stage, "no words were selected".to_string()));
                }
                StageArtifacts::WordSelection { words }
            }
            (StageArtifacts::WordSelection { words }, StageArtifact::Sources(sources)) => {
                StageArtifacts::Research { words, sources }
            }
            (StageArtifacts::Research { words, sources }, StageArtifact::Draft(draft)) => {
                if draft.trim().is_empty() {
                    return Err(stage_error(stage, "draft is empty".to_string()));
                }
                StageArtifacts::Draft {
                    words,
                    sources,
                    draft,
                }
            }
            (
                StageArtifacts::Draft {
                    words,
                    sources,
                    draft,
                },
                StageArtifact::Document(document),
            ) => StageArtifacts::Conversion {
                words,
                sources,
                draft,
                document,
            },
            (_, artifact) => {
                return Err(stage_error(
                    stage,
                    format!("cannot apply a {} artifact here", artifact.kind()),
                ));
            }
        };

        let mut history = self.history;
        history.extend(output.entries);
        let mut usage = self.usage;
        usage.insert(stage, output.usage);

        Ok(Self {
            version: self.version,
            history,
            usage,
            artifacts,
        })
    }
}

fn stage_error(stage: Stage, message: String) -> QuireError {
    QuireError::Stage {
        stage,
        message,
        context: None,
    }
}
