//! Normalized schema snapshots and the version index.
//!
//! Every collection is ordered (`BTreeMap`, or a `Vec` sorted at capture
//! time) so that serializing a [`SchemaSnapshot`] is deterministic and its
//! hash depends on content only.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One column of a table, in ordinal order within [`TableSchema::columns`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// SQL data type as reported by the catalog.
    pub data_type: String,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Default expression, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// A table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDef {
    /// Constraint name.
    pub name: String,
    /// Constraint type (`PRIMARY KEY`, `FOREIGN KEY`, `UNIQUE`, `CHECK`).
    pub constraint_type: String,
    /// Full definition, when the catalog provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

/// Structure of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Columns in ordinal order.
    pub columns: Vec<ColumnDef>,
    /// Constraints sorted by name.
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
}

impl TableSchema {
    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A stored function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Function name.
    pub name: String,
    /// Identity arguments.
    pub arguments: String,
    /// Result type.
    pub return_type: String,
    /// Full `CREATE FUNCTION` text, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

/// A row-level security policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDef {
    /// Policy name.
    pub name: String,
    /// Command the policy applies to (`ALL`, `SELECT`, ...).
    pub command: String,
    /// Roles the policy applies to.
    #[serde(default)]
    pub roles: Vec<String>,
    /// `USING` expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub using_expr: Option<String>,
    /// `WITH CHECK` expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_check: Option<String>,
}

/// An index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Full `CREATE INDEX` statement.
    pub definition: String,
}

/// Normalized structure of the whole database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Tables keyed by name.
    pub tables: BTreeMap<String, TableSchema>,
    /// Functions keyed by `name(arguments)`.
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionDef>,
    /// Policies grouped by table, sorted by name.
    #[serde(default)]
    pub policies: BTreeMap<String, Vec<PolicyDef>>,
    /// Indexes grouped by table, sorted by name.
    #[serde(default)]
    pub indexes: BTreeMap<String, Vec<IndexDef>>,
}

impl SchemaSnapshot {
    /// Counts the objects of each kind.
    #[must_use]
    pub fn object_counts(&self) -> ObjectCounts {
        ObjectCounts {
            tables: self.tables.len(),
            columns: self.tables.values().map(|t| t.columns.len()).sum(),
            constraints: self.tables.values().map(|t| t.constraints.len()).sum(),
            functions: self.functions.len(),
            policies: self.policies.values().map(Vec::len).sum(),
            indexes: self.indexes.values().map(Vec::len).sum(),
        }
    }
}

/// Object counts recorded in the version index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCounts {
    /// Number of tables.
    pub tables: usize,
    /// Number of columns across all tables.
    pub columns: usize,
    /// Number of constraints across all tables.
    pub constraints: usize,
    /// Number of functions.
    pub functions: usize,
    /// Number of policies.
    pub policies: usize,
    /// Number of indexes.
    pub indexes: usize,
}

/// A persisted, labelled schema snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// User-supplied version label.
    pub version: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Capture time. Not part of the hash.
    pub captured_at: DateTime<Utc>,
    /// Content hash of `schema`.
    pub hash: String,
    /// The captured structure.
    pub schema: SchemaSnapshot,
}

/// Entry of the version index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Content hash.
    pub hash: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Object counts.
    pub counts: ObjectCounts,
}

/// Index of every saved schema version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersionIndex {
    /// Label of the most recently saved version.
    pub current_version: Option<String>,
    /// Every saved version keyed by label.
    pub versions: BTreeMap<String, VersionEntry>,
}

impl SchemaVersionIndex {
    /// Version labels ordered by capture time, oldest first.
    #[must_use]
    pub fn chronological(&self) -> Vec<(&String, &VersionEntry)> {
        let mut entries: Vec<_> = self.versions.iter().collect();
        entries.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(b.0)));
        entries
    }
}
