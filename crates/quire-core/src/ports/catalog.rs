//! Catalog ports - read-only collaborators consulted at enqueue time.
//!
//! Profiles, ingested feed datasets and the vocabulary table are owned by
//! other parts of the system. The queue only asks the questions below.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{Profile, QuireError};

/// Active generation profiles.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn active_profiles(&self) -> Result<Vec<Profile>, QuireError>;

    /// Create and activate the fallback profile used when none exist.
    async fn create_default_profile(&self) -> Result<Profile, QuireError>;
}

/// Upstream data an RSS enqueue depends on.
#[async_trait]
pub trait PreconditionSource: Send + Sync {
    /// Has the per-date feed dataset been ingested?
    async fn dataset_exists(&self, date: NaiveDate) -> Result<bool, QuireError>;
}

/// The vocabulary table impression tasks draw from.
#[async_trait]
pub trait WordSource: Send + Sync {
    /// Up to `count` distinct words drawn at random. Empty if the table is.
    async fn random_words(&self, count: usize) -> Result<Vec<String>, QuireError>;
}
