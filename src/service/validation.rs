//! Structural validation of backup artifacts.
//!
//! Works on the raw JSON document so that a malformed artifact yields a
//! readable report instead of a decode error.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Aggregate figures gathered while validating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    /// Tables present in the artifact.
    pub total_tables: usize,
    /// Sum of table counts.
    pub total_records: u64,
    /// Tables captured without rows and without error.
    pub empty_tables: usize,
    /// Tables whose read failed.
    pub failed_tables: usize,
}

/// Outcome of validating one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Artifact validated, if it came from disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// `false` as soon as one error is recorded.
    pub valid: bool,
    /// Problems that make the artifact unusable for a restore.
    pub errors: Vec<String>,
    /// Problems worth a look that do not block a restore.
    pub warnings: Vec<String>,
    /// Aggregate figures.
    pub stats: ValidationStats,
}

impl ValidationReport {
    /// A report rejecting the artifact outright.
    #[must_use]
    pub fn rejected(path: Option<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path,
            valid: false,
            errors: vec![reason.into()],
            ..Self::default()
        }
    }

    /// `PASS`, `WARN` or `FAIL`.
    #[must_use]
    pub fn verdict(&self) -> &'static str {
        if !self.valid {
            "FAIL"
        } else if self.warnings.is_empty() {
            "PASS"
        } else {
            "WARN"
        }
    }
}

/// Validates an artifact document.
///
/// Errors: missing `metadata` or `tables`, a table whose `rows` is not an
/// array or whose `count` disagrees with it, a missing critical table, an
/// empty table whose live count was non-zero at capture time, and a failed
/// read of a critical table. A failed read of any other table and an empty
/// table are warnings.
#[must_use]
pub fn validate_artifact(document: &Value, critical_tables: &[String]) -> ValidationReport {
    let mut report = ValidationReport::default();

    if document.get("metadata").and_then(Value::as_object).is_none() {
        report.errors.push("artifact has no metadata".to_string());
    }
    let Some(tables) = document.get("tables").and_then(Value::as_object) else {
        report.errors.push("artifact has no tables map".to_string());
        return report;
    };
    report.stats.total_tables = tables.len();

    for (name, table) in tables {
        let Some(rows) = table.get("rows").and_then(Value::as_array) else {
            report.errors.push(format!("table {name}: rows is not an array"));
            continue;
        };
        let Some(count) = table.get("count").and_then(Value::as_u64) else {
            report.errors.push(format!("table {name}: count is missing"));
            continue;
        };
        report.stats.total_records += count;
        if count != rows.len() as u64 {
            report.errors.push(format!(
                "table {name}: count {count} does not match {} rows",
                rows.len()
            ));
        }

        let critical = critical_tables.iter().any(|t| t == name);
        if let Some(error) = table.get("error").and_then(Value::as_str) {
            report.stats.failed_tables += 1;
            let message = format!("table {name} could not be read: {error}");
            if critical {
                report.errors.push(message);
            } else {
                report.warnings.push(message);
            }
            continue;
        }

        if count == 0 {
            let upstream = table
                .get("upstream_count")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if upstream > 0 {
                report.errors.push(format!(
                    "table {name} captured 0 rows but the live table had {upstream}"
                ));
            } else {
                report.stats.empty_tables += 1;
                report.warnings.push(format!("table {name} is empty"));
            }
        }
    }

    for table in critical_tables {
        if !tables.contains_key(table) {
            report
                .errors
                .push(format!("critical table {table} is missing from the artifact"));
        }
    }

    report.valid = report.errors.is_empty();
    report
}
