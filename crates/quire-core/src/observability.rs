//! Queue-level counters for status output and drain summaries.

use serde::{Deserialize, Serialize};

use crate::domain::TaskStatus;

/// Number of task rows per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
}

impl QueueCounts {
    pub fn record(&mut self, status: TaskStatus, n: usize) {
        match status {
            TaskStatus::Queued => self.queued += n,
            TaskStatus::Running => self.running += n,
            TaskStatus::Succeeded => self.succeeded += n,
            TaskStatus::Failed => self.failed += n,
            TaskStatus::Canceled => self.canceled += n,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.succeeded + self.failed + self.canceled
    }
}
