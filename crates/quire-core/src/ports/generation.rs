//! GenerationClient port - the external AI capability behind every stage.
//!
//! One method for all four stages: the `StageInput` variant says which stage
//! is being asked for. Retries, timeouts and rate limiting of the underlying
//! calls are the implementation's business; the executor calls each stage
//! once per attempt.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{
    GenerationMode, HistoryEntry, ProfileId, StageInput, StageOutput, Task, TaskId,
};

/// Job parameters every stage may consult.
#[derive(Debug, Clone, PartialEq)]
pub struct StageContext {
    pub task_id: TaskId,
    pub date: NaiveDate,
    pub mode: GenerationMode,
    pub profile_id: Option<ProfileId>,
    pub llm_hint: Option<String>,
}

impl From<&Task> for StageContext {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            date: task.date,
            mode: task.mode,
            profile_id: task.profile_id,
            llm_hint: task.llm_hint.clone(),
        }
    }
}

/// The capability failed. `payload` carries whatever raw response is worth
/// keeping for an operator.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
    pub payload: Option<serde_json::Value>,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// The external text generator, one stage at a time.
///
/// # Contract
/// - `history` is everything earlier stages recorded; the client must not
///   assume it is empty on a resumed task.
/// - The returned `entries` are appended to the history as-is.
/// - The artifact kind must match `input.stage()`, otherwise the executor
///   fails the task.
/// - Calls can take minutes. The executor keeps the lease alive meanwhile.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn run_stage(
        &self,
        context: &StageContext,
        history: &[HistoryEntry],
        input: StageInput,
    ) -> Result<StageOutput, GenerationError>;
}
