//! Task record: job parameters + lease + checkpoint.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::TaskStatus;
use super::ids::{ProfileId, TaskId};

/// What started the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Cron,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Cron => "cron",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerSource::Manual),
            "cron" => Ok(TriggerSource::Cron),
            other => Err(format!("unknown trigger source '{other}'")),
        }
    }
}

/// Where the job's vocabulary comes from.
///
/// - `Rss`: one task per active profile, fed by that date's ingested feed items.
/// - `Impression`: one profile-less task fed by a random draw of words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Rss,
    Impression,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::Rss => "rss",
            GenerationMode::Impression => "impression",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rss" => Ok(GenerationMode::Rss),
            "impression" => Ok(GenerationMode::Impression),
            other => Err(format!("unknown generation mode '{other}'")),
        }
    }
}

/// One persisted generation job.
///
/// Design:
/// - This is the single source of truth for the job; nothing else is shared
///   between workers.
/// - `checkpoint` belongs to the pipeline executor. The queue stores and
///   returns it without looking inside.
/// - All state transitions happen through the methods below, so the in-memory
///   store and the SQL store agree on what each operation writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub date: NaiveDate,
    pub trigger_source: TriggerSource,
    pub mode: GenerationMode,

    /// `None` only for impression tasks.
    pub profile_id: Option<ProfileId>,

    /// Free-text steering passed to every stage.
    pub llm_hint: Option<String>,

    pub status: TaskStatus,

    /// Bumped by exactly one on every successful claim and nowhere else.
    pub version: i64,

    /// Lease expiry. Only meaningful while `Running`.
    pub locked_until: Option<DateTime<Utc>>,

    pub checkpoint: serde_json::Value,

    pub error_message: Option<String>,
    pub error_context: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Immutable job parameters for a task that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub date: NaiveDate,
    pub trigger_source: TriggerSource,
    pub mode: GenerationMode,
    pub profile_id: Option<ProfileId>,
    pub llm_hint: Option<String>,
    pub checkpoint: serde_json::Value,
}

impl Task {
    /// Create a queued task at version 0.
    pub fn queued(id: TaskId, params: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            date: params.date,
            trigger_source: params.trigger_source,
            mode: params.mode,
            profile_id: params.profile_id,
            llm_hint: params.llm_hint,
            status: TaskStatus::Queued,
            version: 0,
            locked_until: None,
            checkpoint: params.checkpoint,
            error_message: None,
            error_context: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            published_at: None,
        }
    }

    /// Running with a lease that has not expired yet.
    pub fn holds_live_lease(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running && self.locked_until.is_some_and(|until| until > now)
    }

    /// Running, but the lease ran out: the worker is presumed dead.
    pub fn is_zombie(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running && self.locked_until.is_none_or(|until| until < now)
    }

    /// Eligible for `claim_task` (ignoring the global guard).
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Queued || self.is_zombie(now)
    }

    /// Running, and (when `version` is given) still owned by the attempt
    /// that claimed at `version`. Guards every write made on behalf of a
    /// claim.
    pub fn is_running_at(&self, version: Option<i64>) -> bool {
        self.status == TaskStatus::Running && version.is_none_or(|v| v == self.version)
    }

    /// Take the lease: bump the version, clear the previous attempt's error.
    /// The checkpoint is left alone so a reclaim resumes where it stopped.
    pub fn claim(&mut self, now: DateTime<Utc>, locked_until: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.version += 1;
        self.locked_until = Some(locked_until);
        self.error_message = None;
        self.error_context = None;
    }

    /// Heartbeat: push the lease deadline out. Status and version stay.
    pub fn extend_lease(&mut self, locked_until: DateTime<Utc>) {
        self.locked_until = Some(locked_until);
    }

    /// Success implies immediate publication.
    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Succeeded;
        self.finished_at = Some(now);
        self.published_at = Some(now);
        self.error_message = None;
        self.error_context = None;
    }

    /// Record the failure and release the lease. The row stays inert.
    pub fn mark_failed(
        &mut self,
        message: String,
        context: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        self.status = TaskStatus::Failed;
        self.error_message = Some(message);
        self.error_context = context;
        self.finished_at = Some(now);
        self.locked_until = None;
    }
}
