//! File-level models of the snapshot store.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Tier;

/// A backup artifact found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Artifact path.
    pub path: PathBuf,
    /// Tier, derived from the directory.
    pub tier: Tier,
    /// Creation time, parsed from the file stamp.
    pub created_at: DateTime<Utc>,
    /// Collision counter appended to the stamp; 0 when absent.
    #[serde(skip)]
    pub sequence: u32,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// Result of applying retention to a tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneSummary {
    /// Artifacts kept.
    pub kept: usize,
    /// Artifacts deleted, with their summaries.
    pub deleted: Vec<PathBuf>,
}

/// Partition of the log area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Rollback attempt logs.
    Rollback,
    /// Incident response logs.
    Emergency,
    /// Environment sync job logs.
    Sync,
}

impl LogKind {
    /// Directory name and file prefix.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rollback => "rollback",
            Self::Emergency => "emergency",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
