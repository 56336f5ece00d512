//! Environment sync jobs, anonymization rules and tolerance validation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OperationId;

/// A deployment environment a sync can read from or write to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Environment variable holding the connection URL.
    pub url_env: String,
    /// Writes are refused unless explicitly forced.
    #[serde(default)]
    pub is_production: bool,
    /// The pre-sync safety backup is skipped for this target.
    #[serde(default)]
    pub allow_data_loss: bool,
}

/// How one field is anonymized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnonymizationRule {
    /// Replace the value with a fixed default.
    Replace {
        /// Value written in place of the original.
        value: serde_json::Value,
    },
    /// Replace the value with a random string following a pattern.
    ///
    /// `#` is a digit, `?` a lowercase letter, `*` an alphanumeric
    /// character, `{field}` the value of another field of the same row and
    /// `\` escapes the next character.
    Randomize {
        /// Generation pattern.
        pattern: String,
    },
    /// Drop the field from the row.
    Remove,
}

/// Field rules keyed by table, then by field.
pub type AnonymizationRules = BTreeMap<String, BTreeMap<String, AnonymizationRule>>;

/// Template for synthetic rows inserted into non-production targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDataTemplate {
    /// Number of rows to generate.
    pub count: usize,
    /// Field patterns, using the same language as [`AnonymizationRule::Randomize`].
    pub fields: BTreeMap<String, String>,
}

/// Pipeline stage of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStepKind {
    /// Safety snapshot of the target.
    PreBackup,
    /// Reading tables from the source.
    Extraction,
    /// Applying anonymization rules.
    Anonymization,
    /// Deleting target rows in reverse dependency order.
    TargetClear,
    /// Inserting rows in dependency order.
    BatchedInsert,
    /// Comparing row counts within tolerance.
    Validation,
    /// Inserting synthetic rows.
    TestData,
}

impl fmt::Display for SyncStepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PreBackup => "pre-backup",
            Self::Extraction => "extraction",
            Self::Anonymization => "anonymization",
            Self::TargetClear => "target-clear",
            Self::BatchedInsert => "batched-insert",
            Self::Validation => "validation",
            Self::TestData => "test-data",
        };
        f.write_str(s)
    }
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStep {
    /// Stage.
    pub kind: SyncStepKind,
    /// Whether the stage succeeded.
    pub success: bool,
    /// Whether the stage was skipped.
    #[serde(default)]
    pub skipped: bool,
    /// What happened.
    pub detail: String,
}

/// Per-table outcome of a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSyncResult {
    /// Table name.
    pub table: String,
    /// Rows read from the source.
    pub extracted: u64,
    /// Rows written to the target.
    pub inserted: u64,
    /// Rows that failed even in per-record fallback.
    pub failed_records: u64,
    /// Fields rewritten by anonymization.
    pub anonymized_fields: u64,
    /// First failure for this table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Row-count comparison of one table after a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableValidation {
    /// Table name.
    pub table: String,
    /// Rows extracted from the source.
    pub source_count: u64,
    /// Rows counted in the target; `None` if the count failed.
    pub target_count: Option<u64>,
    /// Allowed absolute difference.
    pub tolerance: u64,
    /// Whether the difference is within tolerance.
    pub within_tolerance: bool,
}

impl TableValidation {
    /// Compares counts using [`tolerance_for`].
    #[must_use]
    pub fn compare(table: &str, source: u64, target: Option<u64>, percent: u64) -> Self {
        let tolerance = tolerance_for(source, percent);
        let within_tolerance = target.is_some_and(|t| source.abs_diff(t) <= tolerance);
        Self {
            table: table.to_string(),
            source_count: source,
            target_count: target,
            tolerance,
            within_tolerance,
        }
    }
}

/// Allowed row-count drift: `max(1, floor(source * percent / 100))`.
#[must_use]
pub fn tolerance_for(source_count: u64, percent: u64) -> u64 {
    (source_count.saturating_mul(percent) / 100).max(1)
}

/// Terminal state of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Every table synced within tolerance.
    Completed,
    /// At least one table failed or drifted out of tolerance.
    Failed,
    /// The target is production and no override was given.
    Refused,
}

/// Durable record of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Job identifier.
    pub job_id: OperationId,
    /// Source environment name.
    pub source_env: String,
    /// Target environment name.
    pub target_env: String,
    /// Whether anonymization ran.
    pub anonymized: bool,
    /// Safety snapshot of the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_sync_backup: Option<PathBuf>,
    /// Pipeline stages, in execution order.
    pub steps: Vec<SyncStep>,
    /// Per-table outcomes in insert order.
    pub tables: Vec<TableSyncResult>,
    /// Tolerance checks.
    pub validation: Vec<TableValidation>,
    /// Terminal status.
    pub status: SyncStatus,
    /// Why the job stopped early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Job start.
    pub started_at: DateTime<Utc>,
    /// Job end.
    pub finished_at: DateTime<Utc>,
}
