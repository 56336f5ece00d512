//! Type-safe operation identifier.
//!
//! [`OperationId`] is a newtype wrapper around [`uuid::Uuid`] (v4) used to
//! correlate rollback logs, incident logs and sync jobs with the artifacts
//! they produced.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of a rollback, incident response or sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(uuid::Uuid);

impl OperationId {
    /// Creates a new random `OperationId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Returns the first eight hex characters, used in log file names.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string().chars().take(8).collect()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for OperationId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}
