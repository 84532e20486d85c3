use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use quire_core::queue::QueueConfig;

const DEFAULT_DATABASE_URL: &str = "sqlite://quire.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub queue: QueueConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let mut queue = QueueConfig::default();
        if let Some(secs) = secs_var("QUIRE_LEASE_SECS")? {
            queue.lease = secs;
        }
        if let Some(secs) = secs_var("QUIRE_HEARTBEAT_SECS")? {
            queue.heartbeat_interval = secs;
        }
        if let Ok(words) = env::var("QUIRE_IMPRESSION_WORDS") {
            queue.impression_word_count = words
                .parse()
                .context("QUIRE_IMPRESSION_WORDS must be a valid number")?;
        }

        Ok(Self {
            database_url: env::var("QUIRE_DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            queue,
        })
    }
}

fn secs_var(name: &str) -> Result<Option<Duration>> {
    match env::var(name) {
        Ok(value) => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("{name} must be a whole number of seconds"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}
