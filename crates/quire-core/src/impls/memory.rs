//! In-memory task store.
//!
//! Every operation runs under one lock, which stands in for the single
//! conditional statement the SQL store relies on.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{QuireError, Task, TaskId, TaskStatus};
use crate::observability::QueueCounts;
use crate::ports::{ClaimCandidate, TaskStore};

#[derive(Default)]
struct InMemoryState {
    /// All task rows (single source of truth).
    records: HashMap<TaskId, Task>,

    /// Insertion order, used to break `created_at` ties.
    order: Vec<TaskId>,
}

impl InMemoryState {
    fn has_live_lease(&self, now: DateTime<Utc>) -> bool {
        self.records.values().any(|t| t.holds_live_lease(now))
    }

    fn next_candidate(&self, now: DateTime<Utc>) -> Option<ClaimCandidate> {
        self.order
            .iter()
            .enumerate()
            .filter_map(|(seq, id)| self.records.get(id).map(|t| (seq, t)))
            .filter(|(_, t)| t.is_claimable(now))
            .min_by_key(|(seq, t)| (t.created_at, *seq))
            .map(|(_, t)| ClaimCandidate {
                id: t.id,
                version: t.version,
            })
    }

    fn counts_by_status(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for task in self.records.values() {
            counts.record(task.status, 1);
        }
        counts
    }
}

/// Task store kept in process memory. Clones share the same rows.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a row as-is. Used to set up states that the public
    /// operations cannot reach directly, like a crashed worker's lease.
    pub async fn put(&self, task: Task) {
        let mut state = self.state.lock().await;
        if !state.records.contains_key(&task.id) {
            state.order.push(task.id);
        }
        state.records.insert(task.id, task);
    }

    /// Delete a row outright.
    pub async fn remove(&self, id: TaskId) -> Option<Task> {
        let mut state = self.state.lock().await;
        state.order.retain(|o| *o != id);
        state.records.remove(&id)
    }

    pub async fn all(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_all(&self, tasks: &[Task]) -> Result<(), QuireError> {
        let mut state = self.state.lock().await;
        if let Some(dup) = tasks.iter().find(|t| state.records.contains_key(&t.id)) {
            return Err(QuireError::StorageUnavailable(format!(
                "duplicate task id {}",
                dup.id
            )));
        }
        for task in tasks {
            state.order.push(task.id);
            state.records.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, QuireError> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn has_live_lease(&self, now: DateTime<Utc>) -> Result<bool, QuireError> {
        Ok(self.state.lock().await.has_live_lease(now))
    }

    async fn next_candidate(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimCandidate>, QuireError> {
        Ok(self.state.lock().await.next_candidate(now))
    }

    async fn try_claim(
        &self,
        candidate: ClaimCandidate,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        let mut state = self.state.lock().await;
        if state.has_live_lease(now) {
            return Ok(false);
        }
        let Some(task) = state.records.get_mut(&candidate.id) else {
            return Ok(false);
        };
        if task.version != candidate.version || !task.is_claimable(now) {
            return Ok(false);
        }
        task.claim(now, locked_until);
        Ok(true)
    }

    async fn extend_lease(
        &self,
        id: TaskId,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        let mut state = self.state.lock().await;
        match state.records.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running => {
                task.extend_lease(locked_until);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_checkpoint(
        &self,
        id: TaskId,
        version: i64,
        checkpoint: &serde_json::Value,
    ) -> Result<bool, QuireError> {
        let mut state = self.state.lock().await;
        match state.records.get_mut(&id) {
            Some(task) if task.is_running_at(Some(version)) => {
                task.checkpoint = checkpoint.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_succeeded(
        &self,
        id: TaskId,
        version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        let mut state = self.state.lock().await;
        match state.records.get_mut(&id) {
            Some(task) if task.is_running_at(version) => {
                task.mark_succeeded(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        id: TaskId,
        version: Option<i64>,
        message: &str,
        context: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        let mut state = self.state.lock().await;
        match state.records.get_mut(&id) {
            Some(task) if task.is_running_at(version) => {
                task.mark_failed(message.to_string(), context.cloned(), now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, QuireError> {
        Ok(self.state.lock().await.counts_by_status())
    }
}
