//! Audit records of rollback attempts.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OperationId;

/// Whether a rollback simulates or mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackMode {
    /// Compute row-count deltas only.
    DryRun,
    /// Delete and re-insert table contents.
    Execute,
}

/// Why a rollback stopped before completing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    /// The confirmation gate declined.
    UserCancelled,
    /// The artifact failed validation.
    ValidationFailed(String),
    /// The safety snapshot could not be written.
    SafetyBackupFailed(String),
    /// A cancellation token tripped at a table boundary.
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserCancelled => f.write_str("User cancelled"),
            Self::ValidationFailed(detail) => write!(f, "Backup validation failed: {detail}"),
            Self::SafetyBackupFailed(detail) => write!(f, "Pre-rollback backup failed: {detail}"),
            Self::Cancelled => f.write_str("Operation cancelled"),
        }
    }
}

/// Restore outcome of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRestoreResult {
    /// Table name.
    pub table: String,
    /// Rows deleted from the live table.
    pub records_deleted: u64,
    /// Rows inserted from the artifact.
    pub records_restored: u64,
    /// Whether delete and insert both succeeded.
    pub success: bool,
    /// Whether the table was skipped (cancellation or earlier failure).
    #[serde(default)]
    pub skipped: bool,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dry-run impact of restoring one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableImpact {
    /// Table name.
    pub table: String,
    /// Live row count; `None` when it could not be read.
    pub current_count: Option<u64>,
    /// Row count recorded in the artifact.
    pub backup_count: u64,
    /// Rows the restore would add.
    pub rows_to_add: u64,
    /// Rows the restore would remove.
    pub rows_to_remove: u64,
    /// Failure reading the live count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableImpact {
    /// Computes the directional delta between live and backup counts.
    #[must_use]
    pub fn between(table: &str, current: u64, backup: u64) -> Self {
        Self {
            table: table.to_string(),
            current_count: Some(current),
            backup_count: backup,
            rows_to_add: backup.saturating_sub(current),
            rows_to_remove: current.saturating_sub(backup),
            error: None,
        }
    }
}

/// Append-only log of one rollback attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackLog {
    /// Operation identifier.
    pub operation_id: OperationId,
    /// Dry run or execute.
    pub mode: RollbackMode,
    /// Artifact restored from.
    pub source_artifact: PathBuf,
    /// Safety snapshot taken before mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_rollback_artifact: Option<PathBuf>,
    /// Per-table restore outcomes (execute mode).
    #[serde(default)]
    pub processed_tables: Vec<TableRestoreResult>,
    /// Per-table impact (dry-run mode).
    #[serde(default)]
    pub impact: Vec<TableImpact>,
    /// `true` when nothing failed and nothing aborted.
    pub overall_success: bool,
    /// Reason the rollback stopped early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    /// Attempt start.
    pub started_at: DateTime<Utc>,
    /// Attempt end.
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn impact_is_directional() {
        let grow = TableImpact::between("alanlar", 2, 5);
        assert_eq!((grow.rows_to_add, grow.rows_to_remove), (3, 0));
        let shrink = TableImpact::between("alanlar", 9, 5);
        assert_eq!((shrink.rows_to_add, shrink.rows_to_remove), (0, 4));
    }

    #[test]
    fn user_cancelled_reads_naturally() {
        assert_eq!(AbortReason::UserCancelled.to_string(), "User cancelled");
    }

    #[test]
    fn abort_reason_is_tagged() {
        let Ok(json) = serde_json::to_value(AbortReason::ValidationFailed("no tables".into()))
        else {
            panic!("serialization failed");
        };
        assert_eq!(json["kind"], "validation_failed");
        assert_eq!(json["detail"], "no tables");
    }
}
