//! Drain loop: claim → execute until nothing is claimable.

use tracing::{error, info, warn};

use crate::domain::{ErrorKind, QuireError};
use crate::pipeline::{ExecutionOutcome, PipelineExecutor};
use crate::queue::Queue;

/// What one drain pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub lease_lost: usize,
}

/// One worker: claims and executes tasks back to back.
pub struct DrainLoop {
    queue: Queue,
    executor: PipelineExecutor,
}

impl DrainLoop {
    pub fn new(queue: Queue, executor: PipelineExecutor) -> Self {
        Self { queue, executor }
    }

    /// Run until `claim_task` finds nothing.
    ///
    /// A task that errors is failed and the loop moves on, even when the
    /// failure itself cannot be recorded (the row was deleted, say). Only
    /// storage outages end the loop; the host is expected to restart it.
    pub async fn run(&self) -> Result<DrainReport, QuireError> {
        let mut report = DrainReport::default();

        while let Some(task) = self.queue.claim_task().await? {
            report.claimed += 1;
            let (task_id, version) = (task.id, task.version);

            match self.executor.execute(task).await {
                Ok(ExecutionOutcome::Succeeded { .. }) => report.succeeded += 1,
                Ok(ExecutionOutcome::Failed { .. }) => report.failed += 1,
                Ok(ExecutionOutcome::LeaseLost { stage }) => {
                    warn!(task_id = %task_id, ?stage, "lease lost mid-run, leaving task to its new owner");
                    report.lease_lost += 1;
                }
                Err(e) if e.kind() == ErrorKind::Infrastructure => {
                    error!(task_id = %task_id, error = %e, "store unavailable, stopping drain");
                    return Err(e);
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "execution error, failing task");
                    match self
                        .queue
                        .fail_claimed(task_id, version, &e.to_string(), e.failure_context())
                        .await
                    {
                        Ok(_) => {}
                        Err(fail_err) if fail_err.kind() == ErrorKind::Infrastructure => {
                            error!(task_id = %task_id, error = %fail_err, "store unavailable, stopping drain");
                            return Err(fail_err);
                        }
                        Err(fail_err) => {
                            warn!(task_id = %task_id, error = %fail_err, "could not record failure, moving on");
                        }
                    }
                    report.failed += 1;
                }
            }
        }

        info!(
            claimed = report.claimed,
            succeeded = report.succeeded,
            failed = report.failed,
            lease_lost = report.lease_lost,
            "drain finished"
        );
        Ok(report)
    }
}
