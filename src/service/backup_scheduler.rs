//! Backup scheduler: tiered capture, retention and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;

use super::validation::{ValidationReport, validate_artifact};
use crate::config::BackupSettings;
use crate::domain::{
    ArtifactMetadata, BackupArtifact, BackupSummary, CatalogQuery, Notification, SchemaObjects,
    TableGraph, TableSnapshot, Tier,
};
use crate::error::GuardianError;
use crate::notify::NotifierSet;
use crate::persistence::{ArtifactEntry, PruneSummary, SnapshotStore};
use crate::store::DataStore;

/// Outcome of one backup run.
#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
    /// Where the artifact was written.
    pub artifact_path: PathBuf,
    /// Its summary.
    pub summary: BackupSummary,
    /// Its validation report.
    pub validation: ValidationReport,
    /// Retention applied to the tier afterwards.
    pub pruned: PruneSummary,
}

/// Produces tiered backups of the live store into the snapshot store.
///
/// Tables are read one at a time in dependency order. A table that cannot
/// be read is recorded in its slot and the run continues.
#[derive(Debug)]
pub struct BackupScheduler<S> {
    store: Arc<S>,
    snapshots: Arc<SnapshotStore>,
    graph: Arc<TableGraph>,
    settings: BackupSettings,
    notifier: NotifierSet,
}

impl<S: DataStore> BackupScheduler<S> {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        snapshots: Arc<SnapshotStore>,
        graph: Arc<TableGraph>,
        settings: BackupSettings,
        notifier: NotifierSet,
    ) -> Self {
        Self {
            store,
            snapshots,
            graph,
            settings,
            notifier,
        }
    }

    /// Critical tables.
    #[must_use]
    pub fn critical_tables(&self) -> &[String] {
        &self.settings.critical_tables
    }

    /// Captures, writes, prunes and validates one backup.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] or [`GuardianError::Serialization`]
    /// if the artifact cannot be written or read back.
    pub async fn run_backup(
        &self,
        tier: Tier,
        reason: Option<String>,
    ) -> Result<BackupResult, GuardianError> {
        let artifact = self.capture_artifact(tier, reason).await;
        let summary = artifact.summary();
        let artifact_path = self.snapshots.write_backup(&artifact).await?;

        let pruned = match self.cleanup_old_backups(tier).await {
            Ok(pruned) => pruned,
            Err(e) => {
                tracing::warn!(%tier, error = %e, "retention cleanup failed");
                PruneSummary::default()
            }
        };
        let validation = self.validate_backup(&artifact_path).await?;

        tracing::info!(
            %tier,
            path = %artifact_path.display(),
            tables = summary.total_tables,
            records = summary.total_records,
            failed = summary.failed_tables,
            verdict = validation.verdict(),
            "backup completed"
        );
        self.notifier
            .dispatch(&Notification::BackupCompleted {
                tier,
                artifact: artifact_path.clone(),
                total_records: summary.total_records,
                valid: validation.valid,
                timestamp: Utc::now(),
            })
            .await;

        Ok(BackupResult {
            artifact_path,
            summary,
            validation,
            pruned,
        })
    }

    /// Reads every table and schema object into an artifact. Never fails:
    /// problems end up in the per-table slots.
    pub async fn capture_artifact(&self, tier: Tier, reason: Option<String>) -> BackupArtifact {
        let created_at = Utc::now();
        let mut tables = BTreeMap::new();

        for table in self.graph.insert_order() {
            let snapshot = match self.store.select_all(table).await {
                Ok(rows) if rows.is_empty() => {
                    let mut snapshot = TableSnapshot::captured(rows);
                    match self.store.count(table).await {
                        Ok(live) => snapshot.upstream_count = Some(live),
                        Err(e) => tracing::warn!(table, error = %e, "row count cross-check failed"),
                    }
                    snapshot
                }
                Ok(rows) => TableSnapshot::captured(rows),
                Err(e) => {
                    tracing::warn!(table, error = %e, "table read failed");
                    TableSnapshot::failed(e.to_string())
                }
            };
            tracing::debug!(table, count = snapshot.count, "table captured");
            tables.insert(table.clone(), snapshot);
        }

        BackupArtifact {
            metadata: ArtifactMetadata {
                tier,
                created_at,
                host: host_name(),
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                reason,
            },
            tables,
            schema_objects: self.capture_schema_objects().await,
        }
    }

    async fn capture_schema_objects(&self) -> SchemaObjects {
        let mut objects = SchemaObjects::default();
        for query in CatalogQuery::SCHEMA_OBJECTS {
            let rows = match self.store.catalog(query).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(category = query.as_str(), error = %e, "schema objects skipped");
                    continue;
                }
            };
            let Some(slot) = objects.category_mut(query) else {
                continue;
            };
            for (position, row) in rows.into_iter().enumerate() {
                let key = query
                    .qualified_name(&row)
                    .unwrap_or_else(|| format!("#{position}"));
                slot.insert(key, row);
            }
        }
        objects
    }

    /// Deletes the artifacts of a tier beyond its retention count.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if listing or deleting fails.
    pub async fn cleanup_old_backups(&self, tier: Tier) -> Result<PruneSummary, GuardianError> {
        let Some(keep) = self.settings.retention.for_tier(tier) else {
            return Ok(PruneSummary {
                kept: self.snapshots.list_artifacts(tier).await?.len(),
                deleted: Vec::new(),
            });
        };
        let pruned = self.snapshots.prune_tier(tier, keep).await?;
        if !pruned.deleted.is_empty() {
            tracing::info!(%tier, deleted = pruned.deleted.len(), kept = pruned.kept, "old backups removed");
        }
        Ok(pruned)
    }

    /// Validates an artifact on disk against the critical tables.
    ///
    /// A missing or unparsable file yields a failing report.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] for filesystem failures other than a
    /// missing file.
    pub async fn validate_backup(&self, path: &Path) -> Result<ValidationReport, GuardianError> {
        let mut report = match self.snapshots.read_document(path).await {
            Ok(document) => validate_artifact(&document, &self.settings.critical_tables),
            Err(e @ (GuardianError::ArtifactNotFound(_) | GuardianError::InvalidArtifact(_))) => {
                ValidationReport::rejected(None, e.to_string())
            }
            Err(e) => return Err(e),
        };
        report.path = Some(path.to_path_buf());
        Ok(report)
    }

    /// Runs the daily backup, plus the weekly and monthly ones when `today`
    /// is their scheduled day.
    ///
    /// # Errors
    ///
    /// Stops at the first tier whose backup cannot be written.
    pub async fn run_all(&self, today: NaiveDate) -> Result<Vec<BackupResult>, GuardianError> {
        let mut results = Vec::new();
        for tier in self.due_tiers(today) {
            results.push(self.run_backup(tier, None).await?);
        }
        Ok(results)
    }

    /// Tiers scheduled for `today`.
    #[must_use]
    pub fn due_tiers(&self, today: NaiveDate) -> Vec<Tier> {
        let mut tiers = vec![Tier::Daily];
        if today.weekday().number_from_monday() == self.settings.weekly_weekday {
            tiers.push(Tier::Weekly);
        }
        if today.day() == self.settings.monthly_day {
            tiers.push(Tier::Monthly);
        }
        tiers
    }

    /// Lists artifacts of one tier or of every tier, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if a directory cannot be read.
    pub async fn list_backups(&self, tier: Option<Tier>) -> Result<Vec<ArtifactEntry>, GuardianError> {
        match tier {
            Some(tier) => self.snapshots.list_artifacts(tier).await,
            None => self.snapshots.list_tiers(&Tier::ALL).await,
        }
    }

    /// Newest artifact among the given tiers.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if a directory cannot be read.
    pub async fn latest_backup(&self, tiers: &[Tier]) -> Result<Option<ArtifactEntry>, GuardianError> {
        Ok(self.snapshots.list_tiers(tiers).await?.into_iter().next())
    }
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
