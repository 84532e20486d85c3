//! SQLite implementation of the task store and the catalog.
//!
//! Timestamps are stored as epoch milliseconds, JSON columns as TEXT.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::domain::{Profile, ProfileId, QuireError, Task, TaskId, TaskStatus};
use crate::observability::QueueCounts;
use crate::ports::{
    ClaimCandidate, IdGenerator, PreconditionSource, ProfileSource, TaskStore, WordSource,
};

impl From<sqlx::Error> for QuireError {
    fn from(e: sqlx::Error) -> Self {
        QuireError::StorageUnavailable(e.to_string())
    }
}

const TASK_COLUMNS: &str = "id, date, trigger_source, mode, profile_id, llm_hint, status, \
    version, locked_until, checkpoint, error_message, error_context, created_at, started_at, \
    finished_at, published_at";

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    date: String,
    trigger_source: String,
    mode: String,
    profile_id: Option<String>,
    llm_hint: Option<String>,
    status: String,
    version: i64,
    locked_until: Option<i64>,
    checkpoint: String,
    error_message: Option<String>,
    error_context: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    published_at: Option<i64>,
}

impl TryFrom<TaskRow> for Task {
    type Error = QuireError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let codec = |what: &str, e: &dyn std::fmt::Display| {
            QuireError::Codec(format!("task {}: bad {what}: {e}", row.id))
        };

        Ok(Task {
            id: row.id.parse().map_err(|e| codec("id", &e))?,
            date: NaiveDate::parse_from_str(&row.date, "%Y-%m-%d").map_err(|e| codec("date", &e))?,
            trigger_source: row
                .trigger_source
                .parse()
                .map_err(|e: String| codec("trigger_source", &e))?,
            mode: row.mode.parse().map_err(|e: String| codec("mode", &e))?,
            profile_id: row
                .profile_id
                .as_deref()
                .map(str::parse::<ProfileId>)
                .transpose()
                .map_err(|e| codec("profile_id", &e))?,
            llm_hint: row.llm_hint.clone(),
            status: row
                .status
                .parse::<TaskStatus>()
                .map_err(|e| codec("status", &e))?,
            version: row.version,
            locked_until: row.locked_until.map(from_millis).transpose()?,
            checkpoint: serde_json::from_str(&row.checkpoint)
                .map_err(|e| codec("checkpoint", &e))?,
            error_message: row.error_message.clone(),
            error_context: row
                .error_context
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| codec("error_context", &e))?,
            created_at: from_millis(row.created_at)?,
            started_at: row.started_at.map(from_millis).transpose()?,
            finished_at: row.finished_at.map(from_millis).transpose()?,
            published_at: row.published_at.map(from_millis).transpose()?,
        })
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, QuireError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QuireError::Codec(format!("timestamp {ms} out of range")))
}

fn to_json(value: &serde_json::Value) -> Result<String, QuireError> {
    serde_json::to_string(value).map_err(|e| QuireError::Codec(e.to_string()))
}

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the task table and its indexes.
    pub async fn run_migrations(&self) -> Result<(), QuireError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generation_tasks (
                id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                trigger_source TEXT NOT NULL,
                mode TEXT NOT NULL,
                profile_id TEXT,
                llm_hint TEXT,
                status TEXT NOT NULL DEFAULT 'queued',
                version INTEGER NOT NULL DEFAULT 0,
                locked_until INTEGER,
                checkpoint TEXT NOT NULL,
                error_message TEXT,
                error_context TEXT,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                finished_at INTEGER,
                published_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_generation_tasks_status
            ON generation_tasks(status, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert_all(&self, tasks: &[Task]) -> Result<(), QuireError> {
        let mut tx = self.pool.begin().await?;

        for task in tasks {
            let error_context = task.error_context.as_ref().map(to_json).transpose()?;
            sqlx::query(&format!(
                "INSERT INTO generation_tasks ({TASK_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(task.id.to_string())
            .bind(task.date.format("%Y-%m-%d").to_string())
            .bind(task.trigger_source.as_str())
            .bind(task.mode.as_str())
            .bind(task.profile_id.map(|p| p.to_string()))
            .bind(task.llm_hint.as_deref())
            .bind(task.status.as_str())
            .bind(task.version)
            .bind(task.locked_until.map(millis))
            .bind(to_json(&task.checkpoint)?)
            .bind(task.error_message.as_deref())
            .bind(error_context)
            .bind(millis(task.created_at))
            .bind(task.started_at.map(millis))
            .bind(task.finished_at.map(millis))
            .bind(task.published_at.map(millis))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, QuireError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM generation_tasks WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn has_live_lease(&self, now: DateTime<Utc>) -> Result<bool, QuireError> {
        let live: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM generation_tasks
                WHERE status = 'running' AND locked_until > ?
            )
            "#,
        )
        .bind(millis(now))
        .fetch_one(&self.pool)
        .await?;

        Ok(live != 0)
    }

    async fn next_candidate(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimCandidate>, QuireError> {
        let row: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT id, version FROM generation_tasks
            WHERE status = 'queued'
               OR (status = 'running' AND (locked_until IS NULL OR locked_until < ?))
            ORDER BY created_at, rowid
            LIMIT 1
            "#,
        )
        .bind(millis(now))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, version)| {
            let id = id
                .parse()
                .map_err(|e| QuireError::Codec(format!("bad task id {id}: {e}")))?;
            Ok(ClaimCandidate { id, version })
        })
        .transpose()
    }

    async fn try_claim(
        &self,
        candidate: ClaimCandidate,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        // The guard lives in the same statement so no second worker can slip
        // in between the check and the write.
        let result = sqlx::query(
            r#"
            UPDATE generation_tasks
            SET status = 'running',
                started_at = ?,
                version = version + 1,
                locked_until = ?,
                error_message = NULL,
                error_context = NULL
            WHERE id = ?
              AND version = ?
              AND (status = 'queued'
                   OR (status = 'running' AND (locked_until IS NULL OR locked_until < ?)))
              AND NOT EXISTS (
                  SELECT 1 FROM generation_tasks
                  WHERE status = 'running' AND locked_until > ?
              )
            "#,
        )
        .bind(millis(now))
        .bind(millis(locked_until))
        .bind(candidate.id.to_string())
        .bind(candidate.version)
        .bind(millis(now))
        .bind(millis(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn extend_lease(
        &self,
        id: TaskId,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        let result = sqlx::query(
            "UPDATE generation_tasks SET locked_until = ? WHERE id = ? AND status = 'running'",
        )
        .bind(millis(locked_until))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_checkpoint(
        &self,
        id: TaskId,
        version: i64,
        checkpoint: &serde_json::Value,
    ) -> Result<bool, QuireError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_tasks SET checkpoint = ?
            WHERE id = ? AND status = 'running' AND version = ?
            "#,
        )
        .bind(to_json(checkpoint)?)
        .bind(id.to_string())
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_succeeded(
        &self,
        id: TaskId,
        version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_tasks
            SET status = 'succeeded',
                finished_at = ?,
                published_at = ?,
                error_message = NULL,
                error_context = NULL
            WHERE id = ? AND status = 'running' AND (? IS NULL OR version = ?)
            "#,
        )
        .bind(millis(now))
        .bind(millis(now))
        .bind(id.to_string())
        .bind(version)
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        id: TaskId,
        version: Option<i64>,
        message: &str,
        context: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, QuireError> {
        let context = context.map(to_json).transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE generation_tasks
            SET status = 'failed',
                error_message = ?,
                error_context = ?,
                finished_at = ?,
                locked_until = NULL
            WHERE id = ? AND status = 'running' AND (? IS NULL OR version = ?)
            "#,
        )
        .bind(message)
        .bind(context)
        .bind(millis(now))
        .bind(id.to_string())
        .bind(version)
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, QuireError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM generation_tasks GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for (status, n) in rows {
            let status: TaskStatus = status.parse().map_err(QuireError::Codec)?;
            counts.record(status, n.max(0) as usize);
        }
        Ok(counts)
    }
}

/// Profiles, ingested dataset dates and the vocabulary table.
pub struct SqliteCatalog {
    pool: SqlitePool,
    ids: Arc<dyn IdGenerator>,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool, ids: Arc<dyn IdGenerator>) -> Self {
        Self { pool, ids }
    }

    pub async fn run_migrations(&self) -> Result<(), QuireError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS source_datasets (
                date TEXT PRIMARY KEY
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS words (
                word TEXT PRIMARY KEY
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn add_profile(&self, name: &str) -> Result<Profile, QuireError> {
        let profile = Profile {
            id: self.ids.generate_profile_id(),
            name: name.to_string(),
        };
        sqlx::query("INSERT INTO profiles (id, name, is_active) VALUES (?, ?, 1)")
            .bind(profile.id.to_string())
            .bind(&profile.name)
            .execute(&self.pool)
            .await?;
        Ok(profile)
    }

    /// Record that the feed dataset for `date` has been ingested.
    pub async fn mark_dataset(&self, date: NaiveDate) -> Result<(), QuireError> {
        sqlx::query("INSERT OR IGNORE INTO source_datasets (date) VALUES (?)")
            .bind(date.format("%Y-%m-%d").to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Add words to the vocabulary table. Returns how many were new.
    pub async fn add_words<I, S>(&self, words: I) -> Result<u64, QuireError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tx = self.pool.begin().await?;
        let mut added = 0;
        for word in words {
            let word = word.as_ref().trim();
            if word.is_empty() {
                continue;
            }
            added += sqlx::query("INSERT OR IGNORE INTO words (word) VALUES (?)")
                .bind(word)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }
}

#[async_trait]
impl ProfileSource for SqliteCatalog {
    async fn active_profiles(&self) -> Result<Vec<Profile>, QuireError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, name FROM profiles WHERE is_active = 1 ORDER BY rowid")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(id, name)| {
                let id = id
                    .parse()
                    .map_err(|e| QuireError::Codec(format!("bad profile id {id}: {e}")))?;
                Ok(Profile { id, name })
            })
            .collect()
    }

    async fn create_default_profile(&self) -> Result<Profile, QuireError> {
        self.add_profile(Profile::DEFAULT_NAME).await
    }
}

#[async_trait]
impl PreconditionSource for SqliteCatalog {
    async fn dataset_exists(&self, date: NaiveDate) -> Result<bool, QuireError> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM source_datasets WHERE date = ?)")
                .bind(date.format("%Y-%m-%d").to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists != 0)
    }
}

#[async_trait]
impl WordSource for SqliteCatalog {
    async fn random_words(&self, count: usize) -> Result<Vec<String>, QuireError> {
        let words = sqlx::query_scalar("SELECT word FROM words ORDER BY RANDOM() LIMIT ?")
            .bind(i64::try_from(count).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(words)
    }
}
