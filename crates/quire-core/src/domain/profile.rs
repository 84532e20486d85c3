//! Generation profiles, as far as the queue needs to know them.

use serde::{Deserialize, Serialize};

use super::ids::ProfileId;

/// Generation configuration an RSS task runs under. The core only reads id
/// and name; everything else about a profile belongs to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
}

impl Profile {
    pub const DEFAULT_NAME: &'static str = "default";
}
