//! Queue / lease manager.
//!
//! A stateless service over an explicit store handle. Every worker builds its
//! own `Queue`; they coordinate only through the rows in the store.
//!
//! Design intent:
//! - The queue owns status, version and lease. It never looks inside the
//!   checkpoint document.
//! - At most one task holds a live lease at any instant (the global guard).
//! - A lost compare-and-swap is retried here and never reaches a task row.

mod config;
mod retry;

#[cfg(test)]
mod tests;

pub use config::QueueConfig;
pub use retry::ClaimRetryPolicy;

use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta};
use tracing::{debug, info, warn};

use crate::domain::{
    Checkpoint, GenerationMode, NewTask, QuireError, Task, TaskId, TriggerSource,
};
use crate::observability::QueueCounts;
use crate::ports::{
    Clock, IdGenerator, PreconditionSource, ProfileSource, TaskStore, WordSource,
};

/// Read-only collaborators consulted by `enqueue`.
#[derive(Clone)]
pub struct Catalog {
    pub profiles: Arc<dyn ProfileSource>,
    pub preconditions: Arc<dyn PreconditionSource>,
    pub words: Arc<dyn WordSource>,
}

impl Catalog {
    /// Bundle three separately implemented sources.
    pub fn new(
        profiles: Arc<dyn ProfileSource>,
        preconditions: Arc<dyn PreconditionSource>,
        words: Arc<dyn WordSource>,
    ) -> Self {
        Self {
            profiles,
            preconditions,
            words,
        }
    }

    /// Use one object for all three sources.
    pub fn from_shared<C>(catalog: Arc<C>) -> Self
    where
        C: ProfileSource + PreconditionSource + WordSource + 'static,
    {
        Self {
            profiles: catalog.clone(),
            preconditions: catalog.clone(),
            words: catalog,
        }
    }
}

/// Lease manager over one task store.
///
/// Clones share the store handle. Each method is a short, independent round
/// trip, so any number of workers can hold their own `Queue`.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn TaskStore>,
    catalog: Catalog,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: QueueConfig,
    lease: TimeDelta,
}

impl Queue {
    /// Validate `config` and build the queue. Fails with `Config` on a bad
    /// lease, heartbeat or retry setting.
    pub fn new(
        store: Arc<dyn TaskStore>,
        catalog: Catalog,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: QueueConfig,
    ) -> Result<Self, QuireError> {
        config.validate()?;
        let lease = TimeDelta::from_std(config.lease)
            .map_err(|e| QuireError::Config(format!("lease out of range: {e}")))?;
        Ok(Self {
            store,
            catalog,
            clock,
            ids,
            config,
            lease,
        })
    }

    /// The validated configuration this queue was built with.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create the tasks for one generation run.
    ///
    /// - `Rss`: one task per active profile. Creates a default profile when
    ///   none are active, and requires the feed dataset for `date`.
    /// - `Impression`: one task with `impression_word_count` random words.
    pub async fn enqueue(
        &self,
        date: NaiveDate,
        trigger_source: TriggerSource,
        llm_hint: Option<String>,
        mode: GenerationMode,
    ) -> Result<Vec<TaskId>, QuireError> {
        if mode == GenerationMode::Impression {
            let id = self
                .insert_impression(
                    date,
                    self.config.impression_word_count,
                    trigger_source,
                    llm_hint,
                )
                .await?;
            return Ok(vec![id]);
        }

        let mut profiles = self.catalog.profiles.active_profiles().await?;
        if profiles.is_empty() {
            let profile = self.catalog.profiles.create_default_profile().await?;
            info!(profile_id = %profile.id, name = %profile.name, "no active profiles, created default");
            profiles.push(profile);
        }

        if !self.catalog.preconditions.dataset_exists(date).await? {
            return Err(QuireError::Precondition(format!(
                "no feed dataset has been ingested for {date}"
            )));
        }

        let now = self.clock.now();
        let checkpoint = initial_checkpoint(None)?;
        let tasks: Vec<Task> = profiles
            .iter()
            .map(|profile| {
                let params = NewTask {
                    date,
                    trigger_source,
                    mode,
                    profile_id: Some(profile.id),
                    llm_hint: llm_hint.clone(),
                    checkpoint: checkpoint.clone(),
                };
                Task::queued(self.ids.generate_task_id(), params, now)
            })
            .collect();

        self.store.insert_all(&tasks).await?;

        info!(%date, %trigger_source, count = tasks.len(), "enqueued rss tasks");
        Ok(tasks.iter().map(|t| t.id).collect())
    }

    /// One profile-less task whose candidate words are drawn now and frozen
    /// into the initial checkpoint.
    pub async fn enqueue_impression(
        &self,
        date: NaiveDate,
        word_count: usize,
        trigger_source: TriggerSource,
    ) -> Result<TaskId, QuireError> {
        self.insert_impression(date, word_count, trigger_source, None)
            .await
    }

    async fn insert_impression(
        &self,
        date: NaiveDate,
        word_count: usize,
        trigger_source: TriggerSource,
        llm_hint: Option<String>,
    ) -> Result<TaskId, QuireError> {
        if word_count == 0 {
            return Err(QuireError::Precondition(
                "an impression task needs at least one candidate word".into(),
            ));
        }

        let words = self.catalog.words.random_words(word_count).await?;
        if words.is_empty() {
            return Err(QuireError::Precondition(format!(
                "word table is empty, cannot draw {word_count} candidate words for {date}"
            )));
        }
        if words.len() < word_count {
            warn!(requested = word_count, drawn = words.len(), "word table smaller than requested draw");
        }

        let params = NewTask {
            date,
            trigger_source,
            mode: GenerationMode::Impression,
            profile_id: None,
            llm_hint,
            checkpoint: initial_checkpoint(Some(words))?,
        };
        let task = Task::queued(self.ids.generate_task_id(), params, self.clock.now());
        self.store.insert_all(std::slice::from_ref(&task)).await?;

        info!(task_id = %task.id, %date, %trigger_source, "enqueued impression task");
        Ok(task.id)
    }

    /// Claim the oldest eligible task, or `None` if another task holds a live
    /// lease or nothing is claimable.
    ///
    /// A lost compare-and-swap re-runs selection, up to
    /// `claim_retry.max_attempts` rounds. Running out of rounds is reported as
    /// "none available".
    pub async fn claim_task(&self) -> Result<Option<Task>, QuireError> {
        let policy = &self.config.claim_retry;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_claim_once().await {
                Err(QuireError::ClaimConflict {
                    task_id,
                    expected_version,
                }) => {
                    if attempts >= policy.max_attempts {
                        warn!(%task_id, expected_version, attempts, "claim kept losing races, giving up for now");
                        return Ok(None);
                    }
                    let delay = policy.next_delay(attempts);
                    debug!(%task_id, expected_version, ?delay, "lost claim race, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn try_claim_once(&self) -> Result<Option<Task>, QuireError> {
        let now = self.clock.now();

        if self.store.has_live_lease(now).await? {
            debug!("another task holds a live lease");
            return Ok(None);
        }

        let Some(candidate) = self.store.next_candidate(now).await? else {
            return Ok(None);
        };

        let locked_until = now + self.lease;
        if !self.store.try_claim(candidate, now, locked_until).await? {
            return Err(QuireError::ClaimConflict {
                task_id: candidate.id,
                expected_version: candidate.version,
            });
        }

        let task = self
            .store
            .get(candidate.id)
            .await?
            .ok_or(QuireError::NotFound(candidate.id))?;

        info!(
            task_id = %task.id,
            version = task.version,
            reclaimed = task.version > 1,
            %locked_until,
            "claimed task"
        );
        Ok(Some(task))
    }

    /// Push the lease out to `now + lease`. Does nothing (and returns `false`)
    /// when the task is no longer running.
    pub async fn keep_alive(&self, id: TaskId) -> Result<bool, QuireError> {
        let locked_until = self.clock.now() + self.lease;
        let extended = self.store.extend_lease(id, locked_until).await?;
        if extended {
            debug!(task_id = %id, %locked_until, "lease extended");
        } else {
            debug!(task_id = %id, "keep-alive ignored, task is not running");
        }
        Ok(extended)
    }

    /// Persist the executor's checkpoint for the attempt that claimed at
    /// `version`. Returns `false` if the task was reclaimed since.
    pub async fn save_checkpoint(
        &self,
        id: TaskId,
        version: i64,
        checkpoint: &Checkpoint,
    ) -> Result<bool, QuireError> {
        let document = checkpoint
            .to_value()
            .map_err(|e| QuireError::Codec(e.to_string()))?;
        let saved = self.store.save_checkpoint(id, version, &document).await?;
        if saved {
            debug!(task_id = %id, version, stage = ?checkpoint.stage(), "checkpoint saved");
        } else {
            warn!(task_id = %id, version, "checkpoint rejected, lease was lost");
        }
        Ok(saved)
    }

    /// `running -> succeeded`. Returns `false` if the task was not running.
    ///
    /// Not tied to a claim. Workers finish their own attempt with
    /// [`Queue::complete_claimed`].
    pub async fn complete(&self, id: TaskId) -> Result<bool, QuireError> {
        self.finish_succeeded(id, None).await
    }

    /// `complete` for the attempt that claimed at `version`. Returns `false`
    /// when the task was reclaimed since, leaving the new owner's run alone.
    pub async fn complete_claimed(&self, id: TaskId, version: i64) -> Result<bool, QuireError> {
        self.finish_succeeded(id, Some(version)).await
    }

    /// Record a terminal failure and release the lease. Only a running task
    /// can fail. Failed tasks are not re-queued; recovery is an explicit new
    /// enqueue.
    pub async fn fail(
        &self,
        id: TaskId,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> Result<bool, QuireError> {
        self.finish_failed(id, None, message, context).await
    }

    /// `fail` for the attempt that claimed at `version`. A stale worker gets
    /// `false` back and the task keeps running under its new owner.
    pub async fn fail_claimed(
        &self,
        id: TaskId,
        version: i64,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> Result<bool, QuireError> {
        self.finish_failed(id, Some(version), message, context).await
    }

    /// Load one task row. `NotFound` if it does not exist.
    pub async fn get_task(&self, id: TaskId) -> Result<Task, QuireError> {
        self.store.get(id).await?.ok_or(QuireError::NotFound(id))
    }

    /// Row counts per status, for the status command and drain summaries.
    pub async fn counts_by_status(&self) -> Result<QueueCounts, QuireError> {
        self.store.counts_by_status().await
    }

    async fn finish_succeeded(&self, id: TaskId, version: Option<i64>) -> Result<bool, QuireError> {
        let done = self
            .store
            .mark_succeeded(id, version, self.clock.now())
            .await?;
        if done {
            info!(task_id = %id, "task succeeded");
        } else {
            self.ensure_exists(id).await?;
            warn!(task_id = %id, ?version, "complete ignored, task is not running at this version");
        }
        Ok(done)
    }

    async fn finish_failed(
        &self,
        id: TaskId,
        version: Option<i64>,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> Result<bool, QuireError> {
        let done = self
            .store
            .mark_failed(id, version, message, context.as_ref(), self.clock.now())
            .await?;
        if done {
            warn!(task_id = %id, error = message, "task failed");
        } else {
            self.ensure_exists(id).await?;
            warn!(task_id = %id, ?version, "fail ignored, task is not running at this version");
        }
        Ok(done)
    }

    async fn ensure_exists(&self, id: TaskId) -> Result<(), QuireError> {
        self.get_task(id).await.map(|_| ())
    }
}

fn initial_checkpoint(candidate_words: Option<Vec<String>>) -> Result<serde_json::Value, QuireError> {
    Checkpoint::initial(candidate_words)
        .to_value()
        .map_err(|e| QuireError::Codec(e.to_string()))
}
