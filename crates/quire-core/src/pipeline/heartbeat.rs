//! Lease renewal running beside a stage call.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::TaskId;
use crate::queue::Queue;

/// Background task that calls `keep_alive` every `interval` until stopped.
///
/// Dropping the handle cancels the timer too, so a stage future that is
/// itself dropped cannot leave an orphaned heartbeat extending the lease.
pub struct Heartbeat {
    cancel: CancellationToken,
    handle: Option<JoinHandle<u32>>,
}

impl Heartbeat {
    pub fn start(queue: Queue, task_id: TaskId, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick is immediate

            let mut beats = 0;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match queue.keep_alive(task_id).await {
                            Ok(true) => beats += 1,
                            Ok(false) => {
                                warn!(task_id = %task_id, "heartbeat found the task no longer running, stopping");
                                break;
                            }
                            Err(e) => warn!(task_id = %task_id, error = %e, "heartbeat failed"),
                        }
                    }
                }
            }
            beats
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel the timer and wait for it. Returns how many renewals landed.
    pub async fn stop(mut self) -> u32 {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        match handle.await {
            Ok(beats) => {
                debug!(beats, "heartbeat stopped");
                beats
            }
            Err(e) => {
                warn!(error = %e, "heartbeat task did not finish cleanly");
                0
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
