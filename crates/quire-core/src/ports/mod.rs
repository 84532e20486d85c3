//! Ports - the seams between the core and the outside world.
//!
//! The relational store is the source of truth and the only thing workers
//! share. Catalog sources and the generation capability are collaborators the
//! core calls but does not own.

pub mod catalog;
pub mod clock;
pub mod generation;
pub mod id_generator;
pub mod task_store;

pub use self::catalog::{PreconditionSource, ProfileSource, WordSource};
pub use self::clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use self::generation::{GenerationClient, GenerationError, StageContext};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{ClaimCandidate, TaskStore};
