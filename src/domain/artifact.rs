//! Backup artifacts and their derived summaries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CatalogQuery, Record, Tier};

/// Captured contents of one table.
///
/// A failed read leaves `rows` empty, `count` at zero and the reason in
/// `error`. When a read returns no rows the scheduler cross-checks the live
/// row count and stores it in `upstream_count`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Every row of the table, in the order the store returned them.
    pub rows: Vec<Record>,
    /// Number of rows captured.
    pub count: u64,
    /// Read failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Live row count observed when the read came back empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_count: Option<u64>,
}

impl TableSnapshot {
    /// Creates a snapshot from successfully read rows.
    #[must_use]
    pub fn captured(rows: Vec<Record>) -> Self {
        let count = rows.len() as u64;
        Self {
            rows,
            count,
            error: None,
            upstream_count: None,
        }
    }

    /// Creates the slot of a table whose read failed.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            count: 0,
            error: Some(error.into()),
            upstream_count: None,
        }
    }

    /// Returns `true` if the table was read without error.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Schema objects captured alongside table data, each keyed by qualified name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaObjects {
    /// Stored functions.
    pub functions: BTreeMap<String, Record>,
    /// Triggers.
    pub triggers: BTreeMap<String, Record>,
    /// Row-level security policies.
    pub policies: BTreeMap<String, Record>,
    /// User-defined types.
    pub types: BTreeMap<String, Record>,
    /// Views.
    pub views: BTreeMap<String, Record>,
    /// Sequences.
    pub sequences: BTreeMap<String, Record>,
    /// Indexes.
    pub indexes: BTreeMap<String, Record>,
    /// Table constraints.
    pub constraints: BTreeMap<String, Record>,
    /// Installed extensions.
    pub extensions: BTreeMap<String, Record>,
}

impl SchemaObjects {
    /// Returns the map holding the given category, or `None` for
    /// categories that are not schema objects.
    pub fn category_mut(&mut self, query: CatalogQuery) -> Option<&mut BTreeMap<String, Record>> {
        match query {
            CatalogQuery::Functions => Some(&mut self.functions),
            CatalogQuery::Triggers => Some(&mut self.triggers),
            CatalogQuery::Policies => Some(&mut self.policies),
            CatalogQuery::Types => Some(&mut self.types),
            CatalogQuery::Views => Some(&mut self.views),
            CatalogQuery::Sequences => Some(&mut self.sequences),
            CatalogQuery::Indexes => Some(&mut self.indexes),
            CatalogQuery::Constraints => Some(&mut self.constraints),
            CatalogQuery::Extensions => Some(&mut self.extensions),
            CatalogQuery::Columns | CatalogQuery::ActiveConnections => None,
        }
    }

    /// Number of captured objects per category.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, usize> {
        [
            ("functions", self.functions.len()),
            ("triggers", self.triggers.len()),
            ("policies", self.policies.len()),
            ("types", self.types.len()),
            ("views", self.views.len()),
            ("sequences", self.sequences.len()),
            ("indexes", self.indexes.len()),
            ("constraints", self.constraints.len()),
            ("extensions", self.extensions.len()),
        ]
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect()
    }
}

/// Provenance of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Retention tier.
    pub tier: Tier,
    /// Capture start time; part of the artifact's identity.
    pub created_at: DateTime<Utc>,
    /// Host that produced the artifact.
    pub host: String,
    /// Version of the tool that produced the artifact.
    pub tool_version: String,
    /// Free-text reason (emergency and safety snapshots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A full, immutable capture of table data plus schema objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupArtifact {
    /// Provenance.
    pub metadata: ArtifactMetadata,
    /// Captured tables keyed by table name.
    pub tables: BTreeMap<String, TableSnapshot>,
    /// Captured schema objects.
    #[serde(default)]
    pub schema_objects: SchemaObjects,
}

impl BackupArtifact {
    /// Sum of the row counts of every table.
    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.tables.values().map(|t| t.count).sum()
    }

    /// Derives the summary document written next to the artifact.
    #[must_use]
    pub fn summary(&self) -> BackupSummary {
        let tables: BTreeMap<String, TableSummary> = self
            .tables
            .iter()
            .map(|(name, table)| {
                (
                    name.clone(),
                    TableSummary {
                        count: table.count,
                        error: table.error.clone(),
                    },
                )
            })
            .collect();
        let failed_tables = tables.values().filter(|t| t.error.is_some()).count();
        BackupSummary {
            tier: self.metadata.tier,
            created_at: self.metadata.created_at,
            reason: self.metadata.reason.clone(),
            total_tables: tables.len(),
            total_records: self.total_records(),
            failed_tables,
            tables,
            schema_objects: self.schema_objects.counts(),
        }
    }
}

/// Per-table line of a [`BackupSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    /// Rows captured.
    pub count: u64,
    /// Read failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Row counts and totals of an artifact, stored as a paired document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    /// Retention tier.
    pub tier: Tier,
    /// Capture start time.
    pub created_at: DateTime<Utc>,
    /// Free-text reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Number of tables in the artifact.
    pub total_tables: usize,
    /// Sum of all table counts.
    pub total_records: u64,
    /// Tables whose read failed.
    pub failed_tables: usize,
    /// Per-table counts.
    pub tables: BTreeMap<String, TableSummary>,
    /// Schema object counts per category.
    pub schema_objects: BTreeMap<String, usize>,
}
