//! Pipeline executor: runs the four generation stages of one claimed task.
//!
//! Flow per stage:
//!   checkpoint.next_input → run_stage (heartbeat running) → validate →
//!   checkpoint.record → save_checkpoint
//!
//! A reclaimed task resumes at the first stage its checkpoint does not
//! record, with the history it had so far.

mod heartbeat;


pub use heartbeat::Heartbeat;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{Article, Checkpoint, QuireError, Stage, StageArtifact, Task};
use crate::ports::{GenerationClient, StageContext};
use crate::queue::Queue;

/// How an execution ended, from the executor's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// All stages recorded and the task completed.
    Succeeded { stages_run: Vec<Stage> },
    /// The task was failed with this message.
    Failed { message: String },
    /// Another worker owns the task now. `stage` is the stage whose result
    /// or failure could not be written, `None` if the loss showed up at
    /// completion or before any stage ran.
    LeaseLost { stage: Option<Stage> },
}

/// Runs claimed tasks stage by stage against one generation client.
#[derive(Clone)]
pub struct PipelineExecutor {
    queue: Queue,
    client: Arc<dyn GenerationClient>,
    heartbeat_interval: Duration,
}

impl PipelineExecutor {
    /// The heartbeat interval comes from the queue's config.
    pub fn new(queue: Queue, client: Arc<dyn GenerationClient>) -> Self {
        let heartbeat_interval = queue.config().heartbeat_interval;
        Self {
            queue,
            client,
            heartbeat_interval,
        }
    }

    /// Run the remaining stages of a task this worker has just claimed.
    ///
    /// Stage and schema failures end the task through `fail_claimed` and come
    /// back as `Ok(Failed)`. Every write is guarded on `task.version`, so a
    /// worker whose task was reclaimed gets `Ok(LeaseLost)` and changes
    /// nothing. Store errors are returned as `Err` without touching the task.
    pub async fn execute(&self, task: Task) -> Result<ExecutionOutcome, QuireError> {
        let mut checkpoint = match Checkpoint::from_value(&task.checkpoint) {
            Ok(checkpoint) => checkpoint,
            Err(message) => {
                let err = QuireError::CheckpointCorrupt {
                    task_id: task.id,
                    message,
                    raw: task.checkpoint.clone(),
                };
                return self.abort(&task, None, err).await;
            }
        };

        if let Some(stage) = checkpoint.stage() {
            info!(task_id = %task.id, resumed_after = %stage, "resuming from checkpoint");
        }

        let context = StageContext::from(&task);
        let mut stages_run = Vec::new();

        while let Some(input) = checkpoint.next_input() {
            let stage = input.stage();
            info!(task_id = %task.id, %stage, "stage started");

            let heartbeat = Heartbeat::start(self.queue.clone(), task.id, self.heartbeat_interval);
            let result = self
                .client
                .run_stage(&context, checkpoint.history(), input)
                .await;
            heartbeat.stop().await;

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    let err = QuireError::Stage {
                        stage,
                        message: e.message,
                        context: e.payload,
                    };
                    return self.abort(&task, Some(stage), err).await;
                }
            };

            if stage == Stage::Conversion
                && let StageArtifact::Document(document) = &output.artifact
                && let Err(message) = Article::from_document(document)
            {
                let err = QuireError::SchemaValidation {
                    message,
                    payload: document.clone(),
                };
                return self.abort(&task, Some(stage), err).await;
            }

            let tokens = output.usage.total_tokens();
            checkpoint = match checkpoint.record(stage, output) {
                Ok(next) => next,
                Err(err) => return self.abort(&task, Some(stage), err).await,
            };

            if !self
                .queue
                .save_checkpoint(task.id, task.version, &checkpoint)
                .await?
            {
                return Ok(ExecutionOutcome::LeaseLost { stage: Some(stage) });
            }

            info!(task_id = %task.id, %stage, tokens, "stage finished");
            stages_run.push(stage);
        }

        if !self.queue.complete_claimed(task.id, task.version).await? {
            return Ok(ExecutionOutcome::LeaseLost { stage: None });
        }

        Ok(ExecutionOutcome::Succeeded { stages_run })
    }

    /// Fail the attempt this worker claimed. If the task has been reclaimed
    /// in the meantime the failure is dropped and the new owner keeps it.
    async fn abort(
        &self,
        task: &Task,
        stage: Option<Stage>,
        err: QuireError,
    ) -> Result<ExecutionOutcome, QuireError> {
        let message = err.to_string();
        warn!(task_id = %task.id, ?stage, error = %message, "aborting task");
        let failed = self
            .queue
            .fail_claimed(task.id, task.version, &message, err.failure_context())
            .await?;
        if !failed {
            return Ok(ExecutionOutcome::LeaseLost { stage });
        }
        Ok(ExecutionOutcome::Failed { message })
    }
}
