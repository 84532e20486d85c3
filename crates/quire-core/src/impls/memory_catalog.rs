//! In-memory catalog: profiles, ingested dataset dates and the word table.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;

use crate::domain::{Profile, QuireError};
use crate::ports::{IdGenerator, PreconditionSource, ProfileSource, WordSource};

#[derive(Default)]
struct CatalogState {
    profiles: Vec<Profile>,
    datasets: BTreeSet<NaiveDate>,
    words: Vec<String>,
}

/// Profiles, dataset dates and words held in memory. Clones share state.
#[derive(Clone)]
pub struct InMemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryCatalog {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CatalogState::default())),
            ids,
        }
    }

    pub async fn add_profile(&self, name: &str) -> Profile {
        let profile = Profile {
            id: self.ids.generate_profile_id(),
            name: name.to_string(),
        };
        self.state.lock().await.profiles.push(profile.clone());
        profile
    }

    pub async fn mark_dataset(&self, date: NaiveDate) {
        self.state.lock().await.datasets.insert(date);
    }

    pub async fn add_words<I, S>(&self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        for word in words {
            let word = word.into();
            if !state.words.contains(&word) {
                state.words.push(word);
            }
        }
    }
}

#[async_trait]
impl ProfileSource for InMemoryCatalog {
    async fn active_profiles(&self) -> Result<Vec<Profile>, QuireError> {
        Ok(self.state.lock().await.profiles.clone())
    }

    async fn create_default_profile(&self) -> Result<Profile, QuireError> {
        Ok(self.add_profile(Profile::DEFAULT_NAME).await)
    }
}

#[async_trait]
impl PreconditionSource for InMemoryCatalog {
    async fn dataset_exists(&self, date: NaiveDate) -> Result<bool, QuireError> {
        Ok(self.state.lock().await.datasets.contains(&date))
    }
}

#[async_trait]
impl WordSource for InMemoryCatalog {
    async fn random_words(&self, count: usize) -> Result<Vec<String>, QuireError> {
        let state = self.state.lock().await;
        let mut rng = rand::thread_rng();
        Ok(state
            .words
            .choose_multiple(&mut rng, count)
            .cloned()
            .collect())
    }
}
