mod config;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use quire_core::app::{App, AppBuilder};
use quire_core::domain::{GenerationMode, TaskId, TriggerSource};
use quire_core::impls::{OfflineGenerationClient, SqliteCatalog, SqliteTaskStore};
use quire_core::ports::{SystemClock, UlidGenerator};
use quire_core::queue::Catalog;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "quire", about = "Generation-job queue operator tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create tasks for one date (one per active profile in rss mode).
    Enqueue {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value = "manual")]
        trigger: TriggerSource,
        #[arg(long)]
        hint: Option<String>,
        #[arg(long, default_value = "rss")]
        mode: GenerationMode,
    },
    /// Create one impression task from a random draw of words.
    EnqueueImpression {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        words: Option<usize>,
        #[arg(long, default_value = "manual")]
        trigger: TriggerSource,
    },
    /// Claim and run tasks until none is claimable.
    Drain,
    /// Task counts per status, or one task in full.
    Status {
        #[arg(long)]
        task: Option<String>,
    },
    /// Record that the feed dataset for a date has been ingested.
    MarkDataset {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Add words to the vocabulary table.
    AddWords { words: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let options = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("invalid database url {}", config.database_url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;

    let ids = Arc::new(UlidGenerator::new(SystemClock));
    let store = Arc::new(SqliteTaskStore::new(pool.clone()));
    store.run_migrations().await.context("task table migration failed")?;
    let catalog = Arc::new(SqliteCatalog::new(pool, ids.clone()));
    catalog.run_migrations().await.context("catalog migration failed")?;

    let app = AppBuilder::new()
        .store(store)
        .catalog(Catalog::from_shared(catalog.clone()))
        .client(Arc::new(OfflineGenerationClient::new()))
        .ids(ids)
        .config(config.queue.clone())
        .build()
        .context("invalid queue setup")?;

    match cli.command {
        Command::Enqueue {
            date,
            trigger,
            hint,
            mode,
        } => {
            let ids = app.queue.enqueue(date, trigger, hint, mode).await?;
            for id in ids {
                println!("{id}");
            }
        }
        Command::EnqueueImpression {
            date,
            words,
            trigger,
        } => {
            let count = words.unwrap_or(config.queue.impression_word_count);
            let id = app.queue.enqueue_impression(date, count, trigger).await?;
            println!("{id}");
        }
        Command::Drain => {
            let report = app.drain().await?;
            println!(
                "claimed={} succeeded={} failed={} lease_lost={}",
                report.claimed, report.succeeded, report.failed, report.lease_lost
            );
        }
        Command::Status { task } => print_status(&app, task).await?,
        Command::MarkDataset { date } => {
            catalog.mark_dataset(date).await?;
            info!(%date, "dataset marked");
        }
        Command::AddWords { words } => {
            let added = catalog.add_words(&words).await?;
            println!("added {added} of {} words", words.len());
        }
    }

    Ok(())
}

async fn print_status(app: &App, task: Option<String>) -> Result<()> {
    match task {
        Some(raw) => {
            let id: TaskId = raw
                .parse()
                .with_context(|| format!("'{raw}' is not a task id"))?;
            let task = app.queue.get_task(id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        None => {
            let counts = app.queue.counts_by_status().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }
    Ok(())
}
