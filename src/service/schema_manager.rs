//! Schema capture, hashing and versioning.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::schema_diff::{SchemaDifference, diff_schemas, migration_sql};
use crate::domain::schema::{ColumnDef, ConstraintDef, FunctionDef, IndexDef, PolicyDef};
use crate::domain::{CatalogQuery, Record, SchemaSnapshot, SchemaVersion, VersionEntry};
use crate::error::GuardianError;
use crate::persistence::SnapshotStore;
use crate::store::DataStore;

/// Result of comparing two saved versions.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaComparison {
    /// Older label.
    pub from_version: String,
    /// Newer label.
    pub to_version: String,
    /// `true` when both hashes match.
    pub identical: bool,
    /// Every difference, tables first.
    pub differences: Vec<SchemaDifference>,
}

/// Differences between two consecutive versions.
#[derive(Debug, Clone, Serialize)]
pub struct ChangelogEntry {
    /// Previous label.
    pub from_version: String,
    /// Label introducing the changes.
    pub to_version: String,
    /// When `to_version` was captured.
    pub timestamp: DateTime<Utc>,
    /// Description of `to_version`.
    pub description: String,
    /// Changes introduced by `to_version`.
    pub differences: Vec<SchemaDifference>,
}

/// Listed version.
#[derive(Debug, Clone, Serialize)]
pub struct VersionListing {
    /// Label.
    pub version: String,
    /// Index entry.
    pub entry: VersionEntry,
    /// Whether this is the current version.
    pub current: bool,
}

/// SHA-256 of the snapshot's canonical JSON, lowercase hex.
///
/// Every collection in [`SchemaSnapshot`] is ordered, so equal structures
/// always hash equally.
///
/// # Errors
///
/// Returns [`GuardianError::Serialization`] if the snapshot cannot be
/// serialized.
pub fn generate_schema_hash(snapshot: &SchemaSnapshot) -> Result<String, GuardianError> {
    let bytes = serde_json::to_vec(snapshot)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Captures and versions the live schema.
#[derive(Debug)]
pub struct SchemaManager<S> {
    store: Arc<S>,
    snapshots: Arc<SnapshotStore>,
}

impl<S: DataStore> SchemaManager<S> {
    /// Creates a manager.
    #[must_use]
    pub fn new(store: Arc<S>, snapshots: Arc<SnapshotStore>) -> Self {
        Self { store, snapshots }
    }

    /// Reads columns, constraints, functions, policies and indexes from the
    /// catalog. A failing category is logged and left empty.
    pub async fn capture_current_schema(&self) -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::default();

        let mut columns: Vec<(String, u64, ColumnDef)> = self
            .rows(CatalogQuery::Columns)
            .await
            .iter()
            .filter_map(|row| {
                let table = text(row, "table_name")?;
                let position = row.get("ordinal_position").and_then(Value::as_u64).unwrap_or(0);
                let column = ColumnDef {
                    name: text(row, "column_name")?,
                    data_type: text(row, "data_type").unwrap_or_default(),
                    nullable: flag(row, "is_nullable"),
                    default: text(row, "column_default"),
                };
                Some((table, position, column))
            })
            .collect();
        columns.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        for (table, _, column) in columns {
            snapshot.tables.entry(table).or_default().columns.push(column);
        }

        for row in self.rows(CatalogQuery::Constraints).await {
            let (Some(table), Some(name)) = (text(&row, "table_name"), text(&row, "name")) else {
                continue;
            };
            snapshot.tables.entry(table).or_default().constraints.push(ConstraintDef {
                name,
                constraint_type: text(&row, "constraint_type").unwrap_or_default(),
                definition: text(&row, "definition"),
            });
        }
        for table in snapshot.tables.values_mut() {
            table.constraints.sort_by(|a, b| a.name.cmp(&b.name));
        }

        for row in self.rows(CatalogQuery::Functions).await {
            let Some(name) = text(&row, "name") else {
                continue;
            };
            let arguments = text(&row, "arguments").unwrap_or_default();
            snapshot.functions.insert(
                format!("{name}({arguments})"),
                FunctionDef {
                    name,
                    arguments,
                    return_type: text(&row, "return_type").unwrap_or_default(),
                    definition: text(&row, "definition"),
                },
            );
        }

        for row in self.rows(CatalogQuery::Policies).await {
            let (Some(table), Some(name)) = (text(&row, "table_name"), text(&row, "name")) else {
                continue;
            };
            snapshot.policies.entry(table).or_default().push(PolicyDef {
                name,
                command: text(&row, "command").unwrap_or_else(|| "ALL".to_string()),
                roles: roles(&row),
                using_expr: text(&row, "using_expr"),
                with_check: text(&row, "with_check"),
            });
        }
        for policies in snapshot.policies.values_mut() {
            policies.sort_by(|a, b| a.name.cmp(&b.name));
        }

        for row in self.rows(CatalogQuery::Indexes).await {
            let (Some(table), Some(name)) = (text(&row, "table_name"), text(&row, "name")) else {
                continue;
            };
            snapshot.indexes.entry(table).or_default().push(IndexDef {
                name,
                definition: text(&row, "definition").unwrap_or_default(),
            });
        }
        for indexes in snapshot.indexes.values_mut() {
            indexes.sort_by(|a, b| a.name.cmp(&b.name));
        }

        let counts = snapshot.object_counts();
        tracing::info!(
            tables = counts.tables,
            columns = counts.columns,
            functions = counts.functions,
            policies = counts.policies,
            indexes = counts.indexes,
            "schema captured"
        );
        snapshot
    }

    async fn rows(&self, query: CatalogQuery) -> Vec<Record> {
        match self.store.catalog(query).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(category = query.as_str(), error = %e, "schema category skipped");
                Vec::new()
            }
        }
    }

    /// Persists `snapshot` under `version` and makes it current.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::SchemaVersionExists`] if the label is taken,
    /// [`GuardianError::InvalidArgument`] for an unusable label, and I/O or
    /// serialization errors from the snapshot store.
    pub async fn save_schema_version(
        &self,
        version: &str,
        snapshot: SchemaSnapshot,
        description: &str,
    ) -> Result<SchemaVersion, GuardianError> {
        let hash = generate_schema_hash(&snapshot)?;
        let saved = SchemaVersion {
            version: version.to_string(),
            description: description.to_string(),
            captured_at: Utc::now(),
            hash,
            schema: snapshot,
        };

        let mut index = self.snapshots.read_schema_index().await?;
        if let Some(current) = index.current_version.as_ref()
            && index.versions.get(current).is_some_and(|e| e.hash == saved.hash)
        {
            tracing::info!(version, previous = %current, "schema unchanged since previous version");
        }

        self.snapshots.write_schema_version(&saved).await?;
        index.versions.insert(
            saved.version.clone(),
            VersionEntry {
                hash: saved.hash.clone(),
                timestamp: saved.captured_at,
                description: saved.description.clone(),
                counts: saved.schema.object_counts(),
            },
        );
        index.current_version = Some(saved.version.clone());
        self.snapshots.write_schema_index(&index).await?;
        tracing::info!(version, hash = %saved.hash, "schema version saved");
        Ok(saved)
    }

    /// Captures the live schema and saves it.
    ///
    /// # Errors
    ///
    /// See [`SchemaManager::save_schema_version`].
    pub async fn capture_version(
        &self,
        version: &str,
        description: &str,
    ) -> Result<SchemaVersion, GuardianError> {
        let snapshot = self.capture_current_schema().await;
        self.save_schema_version(version, snapshot, description).await
    }

    /// Saved versions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns I/O or serialization errors reading the index.
    pub async fn list_versions(&self) -> Result<Vec<VersionListing>, GuardianError> {
        let index = self.snapshots.read_schema_index().await?;
        Ok(index
            .chronological()
            .into_iter()
            .map(|(label, entry)| VersionListing {
                version: label.clone(),
                entry: entry.clone(),
                current: index.current_version.as_ref() == Some(label),
            })
            .collect())
    }

    /// Compares two saved versions.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::SchemaVersionNotFound`] if either label was
    /// never saved.
    pub async fn compare_versions(&self, v1: &str, v2: &str) -> Result<SchemaComparison, GuardianError> {
        let a = self.snapshots.read_schema_version(v1).await?;
        let b = self.snapshots.read_schema_version(v2).await?;
        Ok(SchemaComparison {
            from_version: a.version,
            to_version: b.version,
            identical: a.hash == b.hash,
            differences: diff_schemas(&a.schema, &b.schema),
        })
    }

    /// Renders the migration script from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::SchemaVersionNotFound`] if either label was
    /// never saved.
    pub async fn generate_migration_sql(&self, from: &str, to: &str) -> Result<String, GuardianError> {
        let a = self.snapshots.read_schema_version(from).await?;
        let b = self.snapshots.read_schema_version(to).await?;
        Ok(migration_sql(&a.version, &b.version, &a.schema, &b.schema))
    }

    /// Differences between each pair of consecutive versions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns I/O or serialization errors, or
    /// [`GuardianError::SchemaVersionNotFound`] if the index names a version
    /// whose document is gone.
    pub async fn changelog(&self) -> Result<Vec<ChangelogEntry>, GuardianError> {
        let index = self.snapshots.read_schema_index().await?;
        let labels: Vec<String> = index
            .chronological()
            .into_iter()
            .map(|(label, _)| label.clone())
            .collect();
        let mut entries = Vec::new();
        for pair in labels.windows(2) {
            let [from, to] = pair else {
                continue;
            };
            let a = self.snapshots.read_schema_version(from).await?;
            let b = self.snapshots.read_schema_version(to).await?;
            entries.push(ChangelogEntry {
                from_version: a.version,
                to_version: b.version,
                timestamp: b.captured_at,
                description: b.description,
                differences: diff_schemas(&a.schema, &b.schema),
            });
        }
        Ok(entries)
    }
}

fn text(row: &Record, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn flag(row: &Record, key: &str) -> bool {
    match row.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("yes") || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

// Roles come back either as a JSON array or as a Postgres array literal.
fn roles(row: &Record) -> Vec<String> {
    match row.get("roles") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(ToString::to_string))
            .collect(),
        Some(Value::String(s)) => s
            .trim_matches(|c| c == '{' || c == '}')
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(ToString::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::service::fixtures;
    use crate::service::schema_diff::DifferenceKind;
    use crate::service::schema_diff::tests::{base, with_coordinators};
    use crate::store::MemoryStore;

    fn catalog_store() -> MemoryStore {
        MemoryStore::new()
            .with_catalog(
                CatalogQuery::Columns,
                vec![
                    fixtures::record(json!({"table_name": "alanlar", "column_name": "ad", "data_type": "text", "is_nullable": "NO", "ordinal_position": 2})),
                    fixtures::record(json!({"table_name": "alanlar", "column_name": "id", "data_type": "integer", "is_nullable": "NO", "column_default": "nextval('alanlar_id_seq'::regclass)", "ordinal_position": 1})),
                    fixtures::record(json!({"table_name": "ogrenciler", "column_name": "id", "data_type": "uuid", "is_nullable": "YES", "ordinal_position": 1})),
                ],
            )
            .with_catalog(
                CatalogQuery::Policies,
                vec![fixtures::record(json!({
                    "table_name": "ogrenciler", "name": "ogrenci_select", "command": "SELECT",
                    "roles": "{authenticated,service_role}", "using_expr": "true"
                }))],
            )
            .with_catalog(
                CatalogQuery::Functions,
                vec![fixtures::record(json!({
                    "name": "is_admin", "arguments": "", "return_type": "boolean"
                }))],
            )
    }

    fn manager(store: MemoryStore) -> (tempfile::TempDir, SchemaManager<MemoryStore>) {
        let (dir, snapshots) = fixtures::snapshots();
        (dir, SchemaManager::new(Arc::new(store), snapshots))
    }

    #[tokio::test]
    async fn capture_orders_columns_and_groups_by_table() {
        let (_dir, manager) = manager(catalog_store());
        let snapshot = manager.capture_current_schema().await;
        let Some(alanlar) = snapshot.tables.get("alanlar") else {
            panic!("alanlar missing");
        };
        let names: Vec<&str> = alanlar.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "ad"]);
        assert!(alanlar.columns.iter().all(|c| !c.nullable));
        assert_eq!(
            snapshot.policies.get("ogrenciler").and_then(|p| p.first()).map(|p| p.roles.clone()),
            Some(vec!["authenticated".to_string(), "service_role".to_string()])
        );
        assert!(snapshot.functions.contains_key("is_admin()"));
    }

    #[tokio::test]
    async fn failing_category_is_left_empty() {
        let store = catalog_store();
        store.fail_catalog(CatalogQuery::Policies).await;
        let (_dir, manager) = manager(store);
        let snapshot = manager.capture_current_schema().await;
        assert!(snapshot.policies.is_empty());
        assert_eq!(snapshot.tables.len(), 2);
    }

    #[tokio::test]
    async fn hash_is_stable_across_captures() {
        let (_dir, manager) = manager(catalog_store());
        let first = manager.capture_current_schema().await;
        let second = manager.capture_current_schema().await;
        let (Ok(a), Ok(b)) = (generate_schema_hash(&first), generate_schema_hash(&second)) else {
            panic!("hashing failed");
        };
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_changes_with_structure() {
        let (Ok(a), Ok(b)) = (
            generate_schema_hash(&base()),
            generate_schema_hash(&with_coordinators(base())),
        ) else {
            panic!("hashing failed");
        };
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn save_advances_current_and_rejects_duplicates() {
        let (_dir, manager) = manager(MemoryStore::new());
        let Ok(_) = manager.save_schema_version("1.0.0", base(), "initial").await else {
            panic!("save failed");
        };
        let Ok(_) = manager
            .save_schema_version("1.1.0", with_coordinators(base()), "koordinatorler")
            .await
        else {
            panic!("save failed");
        };
        let Ok(versions) = manager.list_versions().await else {
            panic!("list failed");
        };
        let current: Vec<&str> = versions
            .iter()
            .filter(|v| v.current)
            .map(|v| v.version.as_str())
            .collect();
        assert_eq!(current, vec!["1.1.0"]);
        assert!(matches!(
            manager.save_schema_version("1.0.0", base(), "again").await,
            Err(GuardianError::SchemaVersionExists(_))
        ));
    }

    #[tokio::test]
    async fn compare_reports_the_new_table_once() {
        let (_dir, manager) = manager(MemoryStore::new());
        let Ok(_) = manager.save_schema_version("1.0.0", base(), "").await else {
            panic!("save failed");
        };
        let Ok(_) = manager
            .save_schema_version("1.1.0", with_coordinators(base()), "")
            .await
        else {
            panic!("save failed");
        };
        let Ok(comparison) = manager.compare_versions("1.0.0", "1.1.0").await else {
            panic!("compare failed");
        };
        assert!(!comparison.identical);
        assert_eq!(comparison.differences.len(), 1);
        assert_eq!(
            comparison.differences.first().map(|d| d.kind),
            Some(DifferenceKind::TableOnlyInV2)
        );
        assert!(matches!(
            manager.compare_versions("1.0.0", "9.9.9").await,
            Err(GuardianError::SchemaVersionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn changelog_walks_consecutive_versions() {
        let (_dir, manager) = manager(MemoryStore::new());
        for (label, snapshot) in [
            ("1.0.0", base()),
            ("1.1.0", with_coordinators(base())),
            ("1.2.0", base()),
        ] {
            let Ok(_) = manager.save_schema_version(label, snapshot, label).await else {
                panic!("save failed");
            };
        }
        let Ok(changelog) = manager.changelog().await else {
            panic!("changelog failed");
        };
        let steps: Vec<(&str, &str, usize)> = changelog
            .iter()
            .map(|e| (e.from_version.as_str(), e.to_version.as_str(), e.differences.len()))
            .collect();
        assert_eq!(steps, vec![("1.0.0", "1.1.0", 1), ("1.1.0", "1.2.0", 1)]);

        let Ok(sql) = manager.generate_migration_sql("1.1.0", "1.2.0").await else {
            panic!("migration failed");
        };
        assert!(sql.contains("-- DROP TABLE isletme_koordinatorler;"));
    }
}
