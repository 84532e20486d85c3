//! TaskStore port - the relational store that is the queue's source of truth.
//!
//! Every method is one short round trip. The claim update has to be a single
//! atomic statement in the backing store: it is the only thing keeping two
//! workers from running at once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{QuireError, Task, TaskId};
use crate::observability::QueueCounts;

/// The row a claim will try to take, and the version it was read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimCandidate {
    pub id: TaskId,
    pub version: i64,
}

/// Persistence of task rows.
///
/// # Design rules
/// - Every update that acts for a claim is conditional on `status` and, where
///   given, `version`, and reports whether it matched with a `bool`.
/// - `try_claim` checks the global guard inside the same atomic step.
/// - A row that does not exist is `Ok(None)` / `Ok(false)`, never an error.
///   Only a failing backend produces `StorageUnavailable`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert new rows. Either all of them land or none do.
    async fn insert_all(&self, tasks: &[Task]) -> Result<(), QuireError>;

    /// `None` when no row has this id.
    async fn get(&self, id: TaskId) -> Result<Option<Task>, QuireError>;

    /// Is any task `running` with `locked_until > now`?
    async fn has_live_lease(&self, now: DateTime<Utc>) -> Result<bool, QuireError>;

    /// Oldest claimable row: `queued`, or `running` with an expired lease.
    /// Ties on `created_at` break by insertion order.
    async fn next_candidate(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimCandidate>, QuireError>;

    /// Compare-and-swap claim. Succeeds only if the row is still at
    /// `candidate.version`, still claimable, and no other row holds a live
    /// lease. On success the row is `running`, `version + 1`, leased until
    /// `locked_until`, with error fields cleared.
    ///
    /// Returns `false` when the update matched no row.
    async fn try_claim(
        &self,
        candidate: ClaimCandidate,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, QuireError>;

    /// Move `locked_until` forward if the row is `running`.
    async fn extend_lease(
        &self,
        id: TaskId,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, QuireError>;

    /// Replace the checkpoint if the row is `running` at `version`.
    async fn save_checkpoint(
        &self,
        id: TaskId,
        version: i64,
        checkpoint: &serde_json::Value,
    ) -> Result<bool, QuireError>;

    /// `running -> succeeded`, `published_at = finished_at = now`.
    ///
    /// With `version` set, the row must also still be at that version, so a
    /// worker whose task was reclaimed cannot finish it for the new owner.
    async fn mark_succeeded(
        &self,
        id: TaskId,
        version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, QuireError>;

    /// `running -> failed`, lease cleared. `version` guards the same way as
    /// in `mark_succeeded`.
    async fn mark_failed(
        &self,
        id: TaskId,
        version: Option<i64>,
        message: &str,
        context: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, QuireError>;

    /// Per-status row counts.
    async fn counts_by_status(&self) -> Result<QueueCounts, QuireError>;
}
