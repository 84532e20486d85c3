//! Implementations of the ports.
//!
//! - **InMemoryTaskStore / InMemoryCatalog**: tests and local runs
//! - **SqliteTaskStore / SqliteCatalog**: persistent store via sqlx
//! - **OfflineGenerationClient**: deterministic stages, no model behind them

pub mod memory;
pub mod memory_catalog;
pub mod offline;
pub mod sqlite;

pub use self::memory::InMemoryTaskStore;
pub use self::memory_catalog::InMemoryCatalog;
pub use self::offline::OfflineGenerationClient;
pub use self::sqlite::{SqliteCatalog, SqliteTaskStore};
