//! IdGenerator port - id allocation without coordination between workers.

use crate::domain::ids::{ProfileId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// Mints ids locally. Uniqueness must not depend on talking to other workers.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_profile_id(&self) -> ProfileId;
}

/// ULID generator whose timestamp part comes from a `Clock`, so ids minted
/// under a test clock line up with the task's `created_at`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_profile_id(&self) -> ProfileId {
        ProfileId::from(self.next_ulid())
    }
}
