//! AppBuilder - wiring of the queue, executor and drain loop.
//!
//! Startup validation is fail-fast: a missing component or an invalid
//! `QueueConfig` is reported by `build()`, never at the first claim.

use std::sync::Arc;

use crate::app::{DrainLoop, DrainReport};
use crate::domain::QuireError;
use crate::pipeline::PipelineExecutor;
use crate::ports::{Clock, GenerationClient, IdGenerator, SystemClock, TaskStore, UlidGenerator};
use crate::queue::{Catalog, Queue, QueueConfig};

/// # Example
/// ```ignore
/// let app = AppBuilder::new()
///     .store(Arc::new(store))
///     .catalog(Catalog::from_shared(Arc::new(catalog)))
///     .client(Arc::new(OfflineGenerationClient::new()))
///     .build()?;
/// let report = app.drain().await?;
/// ```
pub struct AppBuilder {
    store: Option<Arc<dyn TaskStore>>,
    catalog: Option<Catalog>,
    client: Option<Arc<dyn GenerationClient>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: QueueConfig,
}

/// Why `build()` refused to produce an `App`.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// `store`, `catalog` and `client` have no defaults.
    #[error("Missing components: {0:?}. These must be set before build().")]
    MissingComponents(Vec<&'static str>),

    #[error(transparent)]
    Invalid(#[from] QuireError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            catalog: None,
            client: None,
            clock: Arc::new(SystemClock),
            ids: None,
            config: QueueConfig::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn client(mut self, client: Arc<dyn GenerationClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to ULIDs stamped by the builder's clock.
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("store");
        }
        if self.catalog.is_none() {
            missing.push("catalog");
        }
        if self.client.is_none() {
            missing.push("client");
        }
        let (Some(store), Some(catalog), Some(client)) = (self.store, self.catalog, self.client)
        else {
            return Err(BuildError::MissingComponents(missing));
        };

        let ids = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(self.clock.clone())),
        };
        let queue = Queue::new(store, catalog, self.clock, ids, self.config)?;
        let executor = PipelineExecutor::new(queue.clone(), client);

        Ok(App { queue, executor })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired queue plus the executor that runs its tasks.
pub struct App {
    pub queue: Queue,
    pub executor: PipelineExecutor,
}

impl App {
    /// A fresh worker over this app's queue and executor.
    pub fn drain_loop(&self) -> DrainLoop {
        DrainLoop::new(self.queue.clone(), self.executor.clone())
    }

    /// Run one drain pass on the current task.
    pub async fn drain(&self) -> Result<DrainReport, QuireError> {
        self.drain_loop().run().await
    }
}
