//! App - wiring and the loops that run on top of the queue.
//!
//! - **AppBuilder**: assembles store, catalog, generation client and config
//! - **DrainLoop**: claim → execute until nothing is claimable

pub mod builder;
pub mod drain;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::drain::{DrainLoop, DrainReport};
