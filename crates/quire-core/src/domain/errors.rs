//! Error taxonomy for the queue, the executor and the stores.

use thiserror::Error;

use super::ids::TaskId;
use super::stage::Stage;

/// Operational classification of an error.
///
/// - Transient: lost a race, try again.
/// - Permanent: retrying the same task cannot help; record it and move on.
/// - Infrastructure: the store is gone; stop and let the host restart us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Every error the core returns.
///
/// `kind()` decides what a caller does with it; `failure_context()` decides
/// what gets written to the failed row.
#[derive(Debug, Error)]
pub enum QuireError {
    /// Prerequisite data for an enqueue is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The conditional claim update matched no row; another worker won.
    #[error("claim conflict on {task_id} at version {expected_version}")]
    ClaimConflict {
        task_id: TaskId,
        expected_version: i64,
    },

    /// The generation capability failed or returned something unusable.
    #[error("stage {stage} failed: {message}")]
    Stage {
        stage: Stage,
        message: String,
        context: Option<serde_json::Value>,
    },

    /// The final document does not match the article schema.
    #[error("final document failed schema validation: {message}")]
    SchemaValidation {
        message: String,
        payload: serde_json::Value,
    },

    #[error("checkpoint of {task_id} is unreadable: {message}")]
    CheckpointCorrupt {
        task_id: TaskId,
        message: String,
        raw: serde_json::Value,
    },

    #[error("{0} not found")]
    NotFound(TaskId),

    /// A value could not be converted to or from its stored form.
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl QuireError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuireError::ClaimConflict { .. } => ErrorKind::Transient,
            QuireError::StorageUnavailable(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Permanent,
        }
    }

    /// Payload stored in `error_context` when this error fails a task.
    pub fn failure_context(&self) -> Option<serde_json::Value> {
        match self {
            QuireError::Stage { stage, context, .. } => Some(serde_json::json!({
                "kind": "stage",
                "stage": stage,
                "payload": context,
            })),
            QuireError::SchemaValidation { payload, .. } => Some(serde_json::json!({
                "kind": "schema_validation",
                "stage": Stage::Conversion,
                "payload": payload,
            })),
            QuireError::CheckpointCorrupt { raw, .. } => Some(serde_json::json!({
                "kind": "checkpoint_corrupt",
                "payload": raw,
            })),
            _ => None,
        }
    }
}
