//! Rollback engine: validate, safety snapshot, then simulate or restore.
//!
//! Every attempt, including refused and cancelled ones, ends with a
//! [`RollbackLog`] in the snapshot store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use super::backup_scheduler::BackupScheduler;
use crate::cancel::CancellationToken;
use crate::config::RollbackSettings;
use crate::confirm::{ConfirmationContext, ConfirmationPort};
use crate::domain::{
    AbortReason, BackupArtifact, Notification, OperationId, RollbackLog, RollbackMode,
    TableGraph, TableImpact, TableRestoreResult, Tier,
};
use crate::error::GuardianError;
use crate::notify::NotifierSet;
use crate::persistence::{ArtifactEntry, LogKind, PruneSummary, SnapshotStore};
use crate::store::DataStore;

/// Knobs of one rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOptions {
    /// Only compute the impact.
    pub dry_run: bool,
    /// Restrict the restore to these tables.
    pub only_tables: Vec<String>,
    /// Leave these tables untouched.
    pub skip_tables: Vec<String>,
    /// Do not take a pre-rollback snapshot.
    pub skip_safety_backup: bool,
}

/// A finished rollback and where its log was written.
#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    /// The log.
    pub log: RollbackLog,
    /// Path of the log document.
    pub log_path: PathBuf,
}

impl RollbackOutcome {
    /// Shorthand for `log.overall_success`.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.log.overall_success
    }
}

/// Restores live tables from backup artifacts.
#[derive(Debug)]
pub struct RollbackEngine<S> {
    store: Arc<S>,
    snapshots: Arc<SnapshotStore>,
    graph: Arc<TableGraph>,
    backups: Arc<BackupScheduler<S>>,
    settings: RollbackSettings,
    notifier: NotifierSet,
}

impl<S: DataStore> RollbackEngine<S> {
    /// Creates an engine that takes its safety snapshots through `backups`.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        snapshots: Arc<SnapshotStore>,
        graph: Arc<TableGraph>,
        backups: Arc<BackupScheduler<S>>,
        settings: RollbackSettings,
        notifier: NotifierSet,
    ) -> Self {
        Self {
            store,
            snapshots,
            graph,
            backups,
            settings,
            notifier,
        }
    }

    /// Validates `path` and returns the decoded artifact.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::InvalidArtifact`] when the file is missing,
    /// unparsable, or fails structural validation, and
    /// [`GuardianError::Io`] on other filesystem failures.
    pub async fn validate_backup_file(&self, path: &Path) -> Result<BackupArtifact, GuardianError> {
        let report = self.backups.validate_backup(path).await?;
        if !report.valid {
            return Err(GuardianError::InvalidArtifact(report.errors.join("; ")));
        }
        self.snapshots
            .read_artifact(path)
            .await
            .map_err(|e| match e {
                GuardianError::Serialization(e) => GuardianError::InvalidArtifact(e.to_string()),
                other => other,
            })
    }

    /// Runs one rollback attempt.
    ///
    /// Per-table failures, refusals and cancellations are reported in the
    /// returned log rather than as errors.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] or [`GuardianError::Serialization`]
    /// only if the log itself cannot be written.
    pub async fn rollback(
        &self,
        path: &Path,
        options: &RollbackOptions,
        confirm: &dyn ConfirmationPort,
        cancel: &CancellationToken,
    ) -> Result<RollbackOutcome, GuardianError> {
        let mode = if options.dry_run {
            RollbackMode::DryRun
        } else {
            RollbackMode::Execute
        };
        let mut log = RollbackLog {
            operation_id: OperationId::new(),
            mode,
            source_artifact: path.to_path_buf(),
            pre_rollback_artifact: None,
            processed_tables: Vec::new(),
            impact: Vec::new(),
            overall_success: false,
            abort_reason: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        tracing::info!(operation = %log.operation_id, source = %path.display(), ?mode, "rollback started");

        match self.validate_backup_file(path).await {
            Ok(artifact) => {
                let tables = self.select_tables(&artifact, options);
                if options.dry_run {
                    self.simulate(&artifact, &tables, &mut log).await;
                } else {
                    self.execute(&artifact, &tables, options, confirm, cancel, &mut log)
                        .await;
                }
            }
            Err(GuardianError::Io { path, source }) => {
                return Err(GuardianError::Io { path, source });
            }
            Err(e) => {
                tracing::error!(error = %e, "backup rejected");
                log.abort_reason = Some(AbortReason::ValidationFailed(e.to_string()));
            }
        }

        log.finished_at = Utc::now();
        let log_path = self
            .snapshots
            .write_log(LogKind::Rollback, &log.operation_id, &log)
            .await?;
        tracing::info!(
            operation = %log.operation_id,
            success = log.overall_success,
            abort = ?log.abort_reason,
            log = %log_path.display(),
            "rollback finished"
        );
        self.notifier
            .dispatch(&Notification::RollbackFinished {
                operation_id: log.operation_id,
                source: path.to_path_buf(),
                dry_run: options.dry_run,
                success: log.overall_success,
                timestamp: log.finished_at,
            })
            .await;
        Ok(RollbackOutcome { log, log_path })
    }

    /// Tables of the artifact to restore, in insert order.
    fn select_tables(&self, artifact: &BackupArtifact, options: &RollbackOptions) -> Vec<String> {
        for table in &options.only_tables {
            if !artifact.tables.contains_key(table) {
                tracing::warn!(table = %table, "requested table is not in the backup");
            }
        }
        let only: BTreeSet<&str> = options.only_tables.iter().map(String::as_str).collect();
        let skip: BTreeSet<&str> = options.skip_tables.iter().map(String::as_str).collect();
        let selected = artifact.tables.iter().filter_map(|(name, snapshot)| {
            let name = name.as_str();
            if (!only.is_empty() && !only.contains(name)) || skip.contains(name) {
                return None;
            }
            if !snapshot.is_ok() {
                tracing::warn!(table = name, "table was not captured, leaving it untouched");
                return None;
            }
            Some(name)
        });
        self.graph.order_subset(selected)
    }

    async fn simulate(&self, artifact: &BackupArtifact, tables: &[String], log: &mut RollbackLog) {
        for table in tables {
            let backup_count = artifact.tables.get(table).map_or(0, |t| t.count);
            let impact = match self.store.count(table).await {
                Ok(current) => TableImpact::between(table, current, backup_count),
                Err(e) => TableImpact {
                    table: table.clone(),
                    current_count: None,
                    backup_count,
                    rows_to_add: 0,
                    rows_to_remove: 0,
                    error: Some(e.to_string()),
                },
            };
            tracing::info!(
                table = %table,
                current = ?impact.current_count,
                backup = backup_count,
                add = impact.rows_to_add,
                remove = impact.rows_to_remove,
                "dry run"
            );
            log.impact.push(impact);
        }
        log.overall_success = log.impact.iter().all(|i| i.error.is_none());
    }

    async fn execute(
        &self,
        artifact: &BackupArtifact,
        tables: &[String],
        options: &RollbackOptions,
        confirm: &dyn ConfirmationPort,
        cancel: &CancellationToken,
        log: &mut RollbackLog,
    ) {
        let context = ConfirmationContext {
            operation: "rollback".to_string(),
            summary: format!(
                "replace {} table(s) with the contents of {}",
                tables.len(),
                log.source_artifact.display()
            ),
            tables: tables.to_vec(),
        };
        if !confirm.confirm(&context) {
            tracing::warn!("rollback declined");
            log.abort_reason = Some(AbortReason::UserCancelled);
            return;
        }

        if options.skip_safety_backup {
            tracing::info!("pre-rollback backup skipped");
        } else {
            let reason = format!("before rollback {}", log.operation_id.short());
            match self.backups.run_backup(Tier::PreRollback, Some(reason)).await {
                Ok(result) if !result.validation.valid => {
                    let detail = result.validation.errors.join("; ");
                    tracing::error!(errors = %detail, "pre-rollback backup is invalid");
                    log.abort_reason = Some(AbortReason::SafetyBackupFailed(format!(
                        "safety snapshot {} failed validation: {detail}",
                        result.artifact_path.display()
                    )));
                    return;
                }
                Ok(result) => log.pre_rollback_artifact = Some(result.artifact_path),
                Err(e) => {
                    tracing::error!(error = %e, "pre-rollback backup failed");
                    log.abort_reason = Some(AbortReason::SafetyBackupFailed(e.to_string()));
                    return;
                }
            }
        }

        let mut results: BTreeMap<&str, TableRestoreResult> = tables
            .iter()
            .map(|t| {
                (
                    t.as_str(),
                    TableRestoreResult {
                        table: t.clone(),
                        records_deleted: 0,
                        records_restored: 0,
                        success: false,
                        skipped: false,
                        error: None,
                    },
                )
            })
            .collect();

        let mut cleared = BTreeSet::new();
        for table in tables.iter().rev() {
            if cancel.is_cancelled() {
                tracing::warn!(table = %table, "rollback cancelled before delete");
                log.abort_reason = Some(AbortReason::Cancelled);
                break;
            }
            let Some(result) = results.get_mut(table.as_str()) else {
                continue;
            };
            match self.store.delete_all(table).await {
                Ok(deleted) => {
                    tracing::debug!(table = %table, deleted, "table cleared");
                    result.records_deleted = deleted;
                    cleared.insert(table.as_str());
                }
                Err(e) => {
                    tracing::error!(table = %table, error = %e, "delete failed");
                    result.error = Some(format!("delete failed: {e}"));
                }
            }
        }

        let batch_size = self.settings.batch_size.max(1);
        for table in tables {
            let Some(result) = results.get_mut(table.as_str()) else {
                continue;
            };
            if !cleared.contains(table.as_str()) {
                result.skipped = result.error.is_none();
                continue;
            }
            let rows = artifact
                .tables
                .get(table)
                .map(|t| t.rows.as_slice())
                .unwrap_or_default();
            for batch in rows.chunks(batch_size) {
                match self.store.bulk_insert(table, batch).await {
                    Ok(inserted) => result.records_restored += inserted,
                    Err(e) => {
                        tracing::error!(table = %table, error = %e, "insert failed");
                        result.error = Some(format!("insert failed: {e}"));
                        break;
                    }
                }
            }
            result.success = result.error.is_none();
            tracing::info!(
                table = %table,
                restored = result.records_restored,
                success = result.success,
                "table restored"
            );
        }

        log.processed_tables = tables
            .iter()
            .filter_map(|t| results.remove(t.as_str()))
            .collect();
        log.overall_success =
            log.abort_reason.is_none() && log.processed_tables.iter().all(|r| r.success);
    }

    /// Backups available to roll back to, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if a tier directory cannot be read.
    pub async fn list(&self) -> Result<Vec<ArtifactEntry>, GuardianError> {
        self.backups.list_backups(None).await
    }

    /// Past rollback logs, newest first. Unreadable logs are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if the log directory cannot be read.
    pub async fn history(&self) -> Result<Vec<(PathBuf, RollbackLog)>, GuardianError> {
        let mut history = Vec::new();
        for path in self.snapshots.list_logs(LogKind::Rollback).await? {
            match self.snapshots.read_json::<RollbackLog>(&path).await {
                Ok(log) => history.push((path, log)),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable log"),
            }
        }
        Ok(history)
    }

    /// Applies retention to pre-rollback snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if listing or deleting fails.
    pub async fn cleanup(&self) -> Result<PruneSummary, GuardianError> {
        self.backups.cleanup_old_backups(Tier::PreRollback).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::BackupSettings;
    use crate::confirm::AutoConfirm;
    use crate::service::fixtures;
    use crate::store::{FailureMode, MemoryStore};

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        snapshots: Arc<SnapshotStore>,
        backups: Arc<BackupScheduler<MemoryStore>>,
        engine: RollbackEngine<MemoryStore>,
    }

    fn harness() -> Harness {
        harness_with(fixtures::backup_settings())
    }

    fn harness_with(settings: BackupSettings) -> Harness {
        let (dir, snapshots) = fixtures::snapshots();
        let store = Arc::new(fixtures::seeded_store());
        let backups = Arc::new(BackupScheduler::new(
            Arc::clone(&store),
            Arc::clone(&snapshots),
            fixtures::graph(),
            settings,
            NotifierSet::empty(),
        ));
        let engine = RollbackEngine::new(
            Arc::clone(&store),
            Arc::clone(&snapshots),
            fixtures::graph(),
            Arc::clone(&backups),
            RollbackSettings { batch_size: 2 },
            NotifierSet::empty(),
        );
        Harness {
            _dir: dir,
            store,
            snapshots,
            backups,
            engine,
        }
    }

    async fn daily_backup(h: &Harness) -> PathBuf {
        let Ok(result) = h.backups.run_backup(Tier::Daily, None).await else {
            panic!("backup failed");
        };
        result.artifact_path
    }

    async fn damage(h: &Harness) {
        h.store.set_rows("alanlar", fixtures::rows("alanlar", 1)).await;
        h.store.set_rows("ogrenciler", fixtures::rows("ogrenciler", 7)).await;
        h.store.set_rows("stajlar", Vec::new()).await;
    }

    #[tokio::test]
    async fn backup_then_rollback_restores_every_table() {
        let h = harness();
        let path = daily_backup(&h).await;
        damage(&h).await;

        let Ok(outcome) = h
            .engine
            .rollback(&path, &RollbackOptions::default(), &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("rollback failed");
        };
        assert!(outcome.succeeded());
        assert!(outcome.log.pre_rollback_artifact.is_some());
        assert_eq!(outcome.log.processed_tables.len(), 4);
        for (table, n) in [("alanlar", 3), ("ogretmenler", 2), ("ogrenciler", 4), ("stajlar", 2)] {
            assert_eq!(h.store.rows(table).await, Some(fixtures::rows(table, n)));
        }
        let Ok(history) = h.engine.history().await else {
            panic!("history failed");
        };
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn declined_confirmation_writes_nothing() {
        let h = harness();
        let path = daily_backup(&h).await;
        let Ok(outcome) = h
            .engine
            .rollback(&path, &RollbackOptions::default(), &AutoConfirm(false), &CancellationToken::new())
            .await
        else {
            panic!("rollback failed");
        };
        assert!(!outcome.succeeded());
        assert_eq!(outcome.log.abort_reason, Some(AbortReason::UserCancelled));
        assert_eq!(h.store.write_count().await, 0);
        assert!(outcome.log.pre_rollback_artifact.is_none());
        let Ok(safety) = h.snapshots.list_artifacts(Tier::PreRollback).await else {
            panic!("list failed");
        };
        assert!(safety.is_empty());
        assert!(outcome.log_path.exists());
    }

    #[tokio::test]
    async fn dry_run_reports_impact_without_writing() {
        let h = harness();
        let path = daily_backup(&h).await;
        damage(&h).await;
        let options = RollbackOptions {
            dry_run: true,
            ..RollbackOptions::default()
        };
        let Ok(outcome) = h
            .engine
            .rollback(&path, &options, &AutoConfirm(false), &CancellationToken::new())
            .await
        else {
            panic!("rollback failed");
        };
        assert!(outcome.succeeded());
        assert_eq!(h.store.write_count().await, 0);
        let alanlar = outcome.log.impact.iter().find(|i| i.table == "alanlar");
        assert_eq!(alanlar.map(|i| i.rows_to_add), Some(2));
        let ogrenciler = outcome.log.impact.iter().find(|i| i.table == "ogrenciler");
        assert_eq!(ogrenciler.map(|i| i.rows_to_remove), Some(3));
        assert_eq!(h.store.rows("alanlar").await.map(|r| r.len()), Some(1));
    }

    #[tokio::test]
    async fn only_and_skip_filter_tables() {
        let h = harness();
        let path = daily_backup(&h).await;
        damage(&h).await;
        let options = RollbackOptions {
            only_tables: vec!["alanlar".into(), "ogrenciler".into()],
            skip_tables: vec!["ogrenciler".into()],
            skip_safety_backup: true,
            ..RollbackOptions::default()
        };
        let Ok(outcome) = h
            .engine
            .rollback(&path, &options, &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("rollback failed");
        };
        let touched: Vec<&str> = outcome
            .log
            .processed_tables
            .iter()
            .map(|r| r.table.as_str())
            .collect();
        assert_eq!(touched, vec!["alanlar"]);
        assert_eq!(h.store.rows("alanlar").await.map(|r| r.len()), Some(3));
        assert_eq!(h.store.rows("ogrenciler").await.map(|r| r.len()), Some(7));
        assert!(outcome.log.pre_rollback_artifact.is_none());
    }

    #[tokio::test]
    async fn invalid_backup_is_logged_as_validation_failure() {
        let h = harness();
        let missing = h.snapshots.root().join("daily").join("daily-missing.json");
        let Ok(outcome) = h
            .engine
            .rollback(&missing, &RollbackOptions::default(), &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("rollback failed");
        };
        assert!(matches!(
            outcome.log.abort_reason,
            Some(AbortReason::ValidationFailed(_))
        ));
        assert_eq!(h.store.write_count().await, 0);
        assert!(outcome.log_path.exists());
    }

    #[tokio::test]
    async fn cancellation_before_the_first_table_skips_everything() {
        let h = harness();
        let path = daily_backup(&h).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let Ok(outcome) = h
            .engine
            .rollback(&path, &RollbackOptions::default(), &AutoConfirm(true), &cancel)
            .await
        else {
            panic!("rollback failed");
        };
        assert_eq!(outcome.log.abort_reason, Some(AbortReason::Cancelled));
        assert!(outcome.log.processed_tables.iter().all(|r| r.skipped));
        assert_eq!(h.store.write_count().await, 0);
    }

    #[tokio::test]
    async fn failed_delete_leaves_table_alone_and_continues() {
        let h = harness();
        let path = daily_backup(&h).await;
        damage(&h).await;
        h.store.fail("stajlar", FailureMode::Delete).await;
        let options = RollbackOptions {
            skip_safety_backup: true,
            ..RollbackOptions::default()
        };
        let Ok(outcome) = h
            .engine
            .rollback(&path, &options, &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("rollback failed");
        };
        assert!(!outcome.succeeded());
        let failed: Vec<&str> = outcome
            .log
            .processed_tables
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.table.as_str())
            .collect();
        assert_eq!(failed, vec!["stajlar"]);
        assert_eq!(h.store.rows("alanlar").await.map(|r| r.len()), Some(3));
    }

    #[tokio::test]
    async fn invalid_safety_snapshot_aborts_before_any_write() {
        let h = harness();
        let path = daily_backup(&h).await;
        h.store.fail("ogrenciler", FailureMode::Read).await;
        let Ok(outcome) = h
            .engine
            .rollback(&path, &RollbackOptions::default(), &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("rollback failed");
        };
        assert!(!outcome.succeeded());
        assert!(matches!(
            outcome.log.abort_reason,
            Some(AbortReason::SafetyBackupFailed(_))
        ));
        assert!(outcome.log.pre_rollback_artifact.is_none());
        assert!(outcome.log.processed_tables.is_empty());
        assert_eq!(h.store.write_count().await, 0);
    }

    #[tokio::test]
    async fn zero_retention_still_keeps_the_safety_snapshot() {
        let mut settings = fixtures::backup_settings();
        settings.retention.pre_rollback = Some(0);
        let h = harness_with(settings);
        let path = daily_backup(&h).await;
        damage(&h).await;
        let Ok(outcome) = h
            .engine
            .rollback(&path, &RollbackOptions::default(), &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("rollback failed");
        };
        assert!(outcome.succeeded());
        let Some(safety) = &outcome.log.pre_rollback_artifact else {
            panic!("no safety snapshot recorded");
        };
        assert!(safety.exists());
    }

    #[tokio::test]
    async fn cleanup_applies_pre_rollback_retention() {
        let h = harness();
        for _ in 0..3 {
            let Ok(_) = h.backups.run_backup(Tier::PreRollback, None).await else {
                panic!("backup failed");
            };
        }
        let Ok(pruned) = h.engine.cleanup().await else {
            panic!("cleanup failed");
        };
        assert_eq!(pruned.kept, 3);
        assert!(pruned.deleted.is_empty());
    }
}
