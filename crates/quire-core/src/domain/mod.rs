//! Domain model (ids, task record, status, stages, checkpoint, article, errors).

pub mod article;
pub mod checkpoint;
pub mod errors;
pub mod ids;
pub mod profile;
pub mod stage;
pub mod state;
pub mod task;

pub use article::{Article, ArticleVariant, Difficulty, VariantMetadata, WordDefinition, WordUsage};
pub use checkpoint::{CHECKPOINT_VERSION, Checkpoint, StageArtifacts};
pub use errors::{ErrorKind, QuireError};
pub use ids::{ProfileId, TaskId};
pub use profile::Profile;
pub use stage::{HistoryEntry, Role, Stage, StageArtifact, StageInput, StageOutput, UsageMetrics};
pub use state::TaskStatus;
pub use task::{GenerationMode, NewTask, Task, TriggerSource};
