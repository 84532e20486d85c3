//! Shared fixtures for unit tests: a manual clock, a store with fault
//! switches, and a scripted generation client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::json;

use crate::app::DrainLoop;
use crate::domain::{
    HistoryEntry, QuireError, Role, Stage, StageArtifact, StageInput, StageOutput, Task, TaskId,
    UsageMetrics,
};
use crate::impls::{InMemoryCatalog, InMemoryTaskStore};
use crate::observability::QueueCounts;
use crate::pipeline::PipelineExecutor;
use crate::ports::{
    ClaimCandidate, GenerationClient, GenerationError, ManualClock, StageContext, TaskStore,
    UlidGenerator,
};
use crate::queue::{Catalog, Queue, QueueConfig};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

/// A document that passes article validation for `words`.
pub fn article_document(words: &[String]) -> serde_json::Value {
    let variant = |difficulty: &str| {
        json!({
            "difficulty": difficulty,
            "content": format!("{difficulty} text"),
            "metadata": { "summary": "summary", "word_count": 2, "reading_minutes": 1 }
        })
    };
    let definitions: Vec<_> = words
        .iter()
        .map(|w| json!({ "word": w, "definition": format!("meaning of {w}") }))
        .collect();
    json!({
        "title": "Title",
        "topic": "Topic",
        "sources": ["https://example.com/a"],
        "variants": [variant("beginner"), variant("intermediate"), variant("advanced")],
        "word_usage": { "used": words, "missing": [] },
        "definitions": definitions,
    })
}

/// In-memory store with switches for the failures a real database produces.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryTaskStore,
    checkpoint_saves_fail: AtomicBool,
    claims_to_lose: AtomicU32,
    try_claim_calls: AtomicU32,
    extend_calls: AtomicU32,
    doomed: Mutex<Option<TaskId>>,
}

impl FaultyStore {
    /// Every `save_checkpoint` from now on reports the store as down.
    pub fn fail_checkpoint_saves(&self) {
        self.checkpoint_saves_fail.store(true, Ordering::SeqCst);
    }

    /// The next `n` claim updates match no row, as if another worker won.
    pub fn lose_claim_races(&self, n: u32) {
        self.claims_to_lose.store(n, Ordering::SeqCst);
    }

    pub fn try_claim_calls(&self) -> u32 {
        self.try_claim_calls.load(Ordering::SeqCst)
    }

    pub fn extend_calls(&self) -> u32 {
        self.extend_calls.load(Ordering::SeqCst)
    }

    /// Delete the row just before its worker tries to finish it, like an
    /// administrator removing it mid-run.
    pub fn delete_before_finish(&self, id: TaskId) {
        *self.doomed.lock().unwrap() = Some(id);
    }

    async fn delete_if_doomed(&self, id: TaskId) {
        let doomed = self.doomed.lock().unwrap().take_if(|d| *d == id).is_some();
        if doomed {
            self.inner.remove(id).await;
        }
    }
}

#[async_trait]
impl TaskStore for FaultyStore {
    async fn insert_all(&self, tasks: &[Task]) -> Result<(), QuireError> {
        self.inner.insert_all(tasks).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, QuireError> {
        self.inner.get(id).await
    }

    async fn has_live_lease(&self, now: DateTime<Utc>) -> Result<bool, QuireError> {
        self.inner.has_live_lease(now).await
    }

    async fn next_candidate(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimCandidate>, QuireError> {
        self.inner.next_candidate(now).await
    }

    async fn try_claim(
        &self,
        candidate: ClaimCandidate,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        self.try_claim_calls.fetch_add(1, Ordering::SeqCst);
        let lost = self
            .claims_to_lose
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Ok(false);
        }
        self.inner.try_claim(candidate, now, locked_until).await
    }

    async fn extend_lease(
        &self,
        id: TaskId,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        self.extend_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.extend_lease(id, locked_until).await
    }

    async fn save_checkpoint(
        &self,
        id: TaskId,
        version: i64,
        checkpoint: &serde_json::Value,
    ) -> Result<bool, QuireError> {
        if self.checkpoint_saves_fail.load(Ordering::SeqCst) {
            return Err(QuireError::StorageUnavailable("connection reset".into()));
        }
        self.inner.save_checkpoint(id, version, checkpoint).await
    }

    async fn mark_succeeded(
        &self,
        id: TaskId,
        version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        self.delete_if_doomed(id).await;
        self.inner.mark_succeeded(id, version, now).await
    }

    async fn mark_failed(
        &self,
        id: TaskId,
        version: Option<i64>,
        message: &str,
        context: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        self.delete_if_doomed(id).await;
        self.inner.mark_failed(id, version, message, context, now).await
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, QuireError> {
        self.inner.counts_by_status().await
    }
}

/// Queue wired to a manual clock and in-memory collaborators.
pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<FaultyStore>,
    pub catalog: Arc<InMemoryCatalog>,
    pub queue: Queue,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        let clock = ManualClock::new(t0());
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        let store = Arc::new(FaultyStore::default());
        let catalog = Arc::new(InMemoryCatalog::new(ids.clone()));
        let queue = Queue::new(
            store.clone(),
            Catalog::from_shared(catalog.clone()),
            Arc::new(clock.clone()),
            ids,
            config,
        )
        .unwrap();
        Self {
            clock,
            store,
            catalog,
            queue,
        }
    }

    /// A second worker's view of the same store.
    pub fn queue(&self) -> Queue {
        self.queue.clone()
    }

    pub fn executor(&self, client: ScriptedClient) -> PipelineExecutor {
        PipelineExecutor::new(self.queue.clone(), Arc::new(client))
    }

    pub fn drain_loop(&self, client: ScriptedClient) -> DrainLoop {
        DrainLoop::new(self.queue.clone(), self.executor(client))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageCall {
    pub task_id: TaskId,
    pub stage: Stage,
    pub history_len: usize,
}

#[derive(Default)]
struct Script {
    failures: HashMap<(Option<TaskId>, Stage), GenerationError>,
    artifacts: HashMap<Stage, StageArtifact>,
    stage_delays: HashMap<Stage, Duration>,
    delay: Option<Duration>,
}

/// Generation client whose answers are set up by the test.
///
/// By default every stage succeeds with a small artifact and the conversion
/// stage returns a valid article for the selected words.
#[derive(Clone, Default)]
pub struct ScriptedClient {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<StageCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedClient {
    pub fn happy() -> Self {
        Self::default()
    }

    pub fn fail_at(self, stage: Stage, error: GenerationError) -> Self {
        self.script.lock().unwrap().failures.insert((None, stage), error);
        self
    }

    pub fn fail_task_at(self, task_id: TaskId, stage: Stage, error: GenerationError) -> Self {
        self.script
            .lock()
            .unwrap()
            .failures
            .insert((Some(task_id), stage), error);
        self
    }

    /// Answer `stage` with this artifact instead of the default.
    pub fn with_artifact(self, stage: Stage, artifact: StageArtifact) -> Self {
        self.script.lock().unwrap().artifacts.insert(stage, artifact);
        self
    }

    /// Sleep this long inside `stage` before answering.
    pub fn with_stage_delay(self, stage: Stage, delay: Duration) -> Self {
        self.script.lock().unwrap().stage_delays.insert(stage, delay);
        self
    }

    /// Sleep this long inside every stage.
    pub fn with_artifact_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<StageCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stages_called(&self) -> Vec<Stage> {
        self.calls().into_iter().map(|c| c.stage).collect()
    }

    /// Tasks in the order their first stage was called.
    pub fn task_order(&self) -> Vec<TaskId> {
        let mut order = Vec::new();
        for call in self.calls() {
            if !order.contains(&call.task_id) {
                order.push(call.task_id);
            }
        }
        order
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn default_artifact(input: &StageInput) -> StageArtifact {
        match input {
            StageInput::WordSelection { candidates } => StageArtifact::Words(
                candidates
                    .clone()
                    .unwrap_or_else(|| vec!["tide".to_string()]),
            ),
            StageInput::Research { words } => StageArtifact::Sources(
                words
                    .iter()
                    .map(|w| format!("https://example.com/{w}"))
                    .collect(),
            ),
            StageInput::Draft { words, .. } => {
                StageArtifact::Draft(format!("A draft about {}.", words.join(" and ")))
            }
            StageInput::Conversion { .. } => StageArtifact::Document(json!(null)),
        }
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn run_stage(
        &self,
        context: &StageContext,
        history: &[HistoryEntry],
        input: StageInput,
    ) -> Result<StageOutput, GenerationError> {
        let stage = input.stage();
        self.calls.lock().unwrap().push(StageCall {
            task_id: context.task_id,
            stage,
            history_len: history.len(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (delay, failure, artifact) = {
            let script = self.script.lock().unwrap();
            let delay = script.stage_delays.get(&stage).copied().or(script.delay);
            let failure = script
                .failures
                .get(&(Some(context.task_id), stage))
                .or_else(|| script.failures.get(&(None, stage)))
                .cloned();
            (delay, failure, script.artifacts.get(&stage).cloned())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = failure {
            return Err(error);
        }

        let artifact = match artifact {
            Some(artifact) => artifact,
            None if stage == Stage::Conversion => {
                let words: Vec<String> = history
                    .iter()
                    .filter(|e| e.stage == Stage::WordSelection && e.role == Role::Assistant)
                    .flat_map(|e| e.content.split(','))
                    .map(|w| w.to_string())
                    .collect();
                StageArtifact::Document(article_document(&words))
            }
            None => Self::default_artifact(&input),
        };

        let reply = match &artifact {
            StageArtifact::Words(words) => words.join(","),
            StageArtifact::Sources(sources) => sources.join(","),
            StageArtifact::Draft(draft) => draft.clone(),
            StageArtifact::Document(document) => document.to_string(),
        };

        Ok(StageOutput {
            entries: vec![
                HistoryEntry::new(stage, Role::User, format!("run {stage}")),
                HistoryEntry::new(stage, Role::Assistant, reply),
            ],
            artifact,
            usage: UsageMetrics {
                model: Some("scripted".into()),
                input_tokens: 10,
                output_tokens: 20,
            },
        })
    }
}
