//! Environment-to-environment data sync.
//!
//! A sync copies tables from a source store to a target store through a
//! fixed pipeline: safety snapshot of the target, extraction, optional
//! anonymization, clearing the target in reverse dependency order, batched
//! inserts in dependency order, row-count validation and finally optional
//! synthetic test data. Every run writes a [`SyncJob`] log, including
//! refused ones.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::anonymizer::Anonymizer;
use super::backup_scheduler::BackupScheduler;
use crate::cancel::CancellationToken;
use crate::config::{RetentionPolicy, SyncSettings};
use crate::confirm::{ConfirmationContext, ConfirmationPort};
use crate::domain::{
    EnvironmentSpec, Notification, OperationId, Record, SyncJob, SyncStatus, SyncStep,
    SyncStepKind, TableGraph, TableSyncResult, TableValidation, Tier,
};
use crate::error::GuardianError;
use crate::notify::NotifierSet;
use crate::persistence::{LogKind, PruneSummary, SnapshotStore};
use crate::store::DataStore;

/// What to sync and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    /// Source environment name.
    pub source_env: String,
    /// Target environment name.
    pub target_env: String,
    /// Allow writing to a production target.
    pub force_production: bool,
    /// Apply the configured anonymization rules.
    pub anonymize: bool,
    /// Insert synthetic rows after validation.
    pub with_test_data: bool,
    /// Restrict the sync to these tables.
    pub only_tables: Vec<String>,
    /// Leave these tables untouched.
    pub skip_tables: Vec<String>,
}

impl SyncRequest {
    /// Plain copy between two environments.
    #[must_use]
    pub fn new(source_env: &str, target_env: &str) -> Self {
        Self {
            source_env: source_env.to_string(),
            target_env: target_env.to_string(),
            ..Self::default()
        }
    }

    /// Production to staging, anonymized.
    #[must_use]
    pub fn refresh_staging() -> Self {
        Self {
            anonymize: true,
            ..Self::new("production", "staging")
        }
    }

    /// Production to development, anonymized, plus test data.
    #[must_use]
    pub fn setup_dev() -> Self {
        Self {
            anonymize: true,
            with_test_data: true,
            ..Self::new("production", "development")
        }
    }
}

/// A finished sync and where its log was written.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// The job log.
    pub job: SyncJob,
    /// Path of the log document.
    pub log_path: PathBuf,
}

impl SyncOutcome {
    /// Returns `true` when the job completed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.job.status == SyncStatus::Completed
    }
}

/// One configured environment as shown by `sync list`.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentListing {
    /// Environment name.
    pub name: String,
    /// Environment settings.
    pub spec: EnvironmentSpec,
    /// Whether its URL variable is set.
    pub configured: bool,
}

/// Lists the configured environments, resolving URL variables with
/// `lookup`.
pub fn list_environments<F>(settings: &SyncSettings, lookup: F) -> Vec<EnvironmentListing>
where
    F: Fn(&str) -> Option<String>,
{
    settings
        .environments
        .iter()
        .map(|(name, spec)| EnvironmentListing {
            name: name.clone(),
            spec: spec.clone(),
            configured: lookup(&spec.url_env).is_some_and(|url| !url.trim().is_empty()),
        })
        .collect()
}

/// Past sync jobs, newest first. Unreadable logs are skipped.
///
/// # Errors
///
/// Returns [`GuardianError::Io`] if the log directory cannot be read.
pub async fn sync_history(snapshots: &SnapshotStore) -> Result<Vec<(PathBuf, SyncJob)>, GuardianError> {
    let mut history = Vec::new();
    for path in snapshots.list_logs(LogKind::Sync).await? {
        match snapshots.read_json::<SyncJob>(&path).await {
            Ok(job) => history.push((path, job)),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable log"),
        }
    }
    Ok(history)
}

/// Prunes pre-sync snapshots down to the configured retention. Without a
/// limit nothing is deleted.
///
/// # Errors
///
/// Returns [`GuardianError::Io`] if listing or deleting fails.
pub async fn cleanup_pre_sync(
    snapshots: &SnapshotStore,
    retention: &RetentionPolicy,
) -> Result<PruneSummary, GuardianError> {
    match retention.for_tier(Tier::PreSync) {
        Some(keep) => snapshots.prune_tier(Tier::PreSync, keep).await,
        None => Ok(PruneSummary {
            kept: snapshots.list_artifacts(Tier::PreSync).await?.len(),
            deleted: Vec::new(),
        }),
    }
}

/// Copies data from a source store into a target store.
#[derive(Debug)]
pub struct SyncEngine<Src, Tgt> {
    source: Arc<Src>,
    target: Arc<Tgt>,
    target_backups: Arc<BackupScheduler<Tgt>>,
    snapshots: Arc<SnapshotStore>,
    graph: Arc<TableGraph>,
    settings: SyncSettings,
    notifier: NotifierSet,
    seed: Option<u64>,
}

impl<Src: DataStore, Tgt: DataStore> SyncEngine<Src, Tgt> {
    /// Creates an engine. `target_backups` must capture the target store.
    #[must_use]
    pub fn new(
        source: Arc<Src>,
        target: Arc<Tgt>,
        target_backups: Arc<BackupScheduler<Tgt>>,
        snapshots: Arc<SnapshotStore>,
        graph: Arc<TableGraph>,
        settings: SyncSettings,
        notifier: NotifierSet,
    ) -> Self {
        Self {
            source,
            target,
            target_backups,
            snapshots,
            graph,
            settings,
            notifier,
            seed: None,
        }
    }

    /// Makes anonymization and test data deterministic.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Runs one sync.
    ///
    /// Refusals and table failures end up in the returned job.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::UnknownEnvironment`] if either environment
    /// is not configured, [`GuardianError::InvalidArgument`] if source and
    /// target are the same, and [`GuardianError::Io`] or
    /// [`GuardianError::Serialization`] if the job log cannot be written.
    pub async fn sync(
        &self,
        request: &SyncRequest,
        confirm: &dyn ConfirmationPort,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, GuardianError> {
        if request.source_env == request.target_env {
            return Err(GuardianError::InvalidArgument(format!(
                "source and target are both {}",
                request.source_env
            )));
        }
        let target_spec = self.environment(&request.target_env)?.clone();
        self.environment(&request.source_env)?;

        let mut job = SyncJob {
            job_id: OperationId::new(),
            source_env: request.source_env.clone(),
            target_env: request.target_env.clone(),
            anonymized: false,
            pre_sync_backup: None,
            steps: Vec::new(),
            tables: Vec::new(),
            validation: Vec::new(),
            status: SyncStatus::Failed,
            error: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        tracing::info!(
            job = %job.job_id,
            source = %request.source_env,
            target = %request.target_env,
            anonymize = request.anonymize,
            "sync started"
        );

        self.run_pipeline(request, &target_spec, confirm, cancel, &mut job)
            .await;
        self.finish(job).await
    }

    fn environment(&self, name: &str) -> Result<&EnvironmentSpec, GuardianError> {
        self.settings
            .environments
            .get(name)
            .ok_or_else(|| GuardianError::UnknownEnvironment(name.to_string()))
    }

    async fn run_pipeline(
        &self,
        request: &SyncRequest,
        target_spec: &EnvironmentSpec,
        confirm: &dyn ConfirmationPort,
        cancel: &CancellationToken,
        job: &mut SyncJob,
    ) {
        if target_spec.is_production && !request.force_production {
            tracing::error!(target = %request.target_env, "refusing to overwrite production");
            job.status = SyncStatus::Refused;
            job.error = Some(
                GuardianError::ProductionWriteRefused(request.target_env.clone()).to_string(),
            );
            return;
        }

        let tables = self.select_tables(request);
        let context = ConfirmationContext {
            operation: "sync".to_string(),
            summary: format!(
                "replace {} table(s) in {} with data from {}",
                tables.len(),
                request.target_env,
                request.source_env
            ),
            tables: tables.clone(),
        };
        if !confirm.confirm(&context) {
            tracing::warn!("sync declined");
            job.status = SyncStatus::Refused;
            job.error = Some("User cancelled".to_string());
            return;
        }

        if !self.pre_backup(request, target_spec, job).await {
            job.error = Some("pre-sync backup failed".to_string());
            return;
        }

        let mut extracted = self.extract(&tables, cancel, job).await;
        if cancel.is_cancelled() {
            job.error = Some("Operation cancelled".to_string());
            return;
        }

        let mut anonymizer = match self.seed {
            Some(seed) => Anonymizer::seeded(seed),
            None => Anonymizer::from_entropy(),
        };
        self.anonymize(request, &mut anonymizer, &mut extracted, job);

        let cleared = self.clear_target(&extracted, cancel, job).await;
        if cancel.is_cancelled() {
            job.error = Some("Operation cancelled".to_string());
            return;
        }
        self.insert(&extracted, &cleared, job).await;
        let valid = self.validate(&extracted, job).await;

        self.insert_test_data(request, target_spec, &mut anonymizer, job)
            .await;

        let tables_ok = job.tables.iter().all(|t| t.error.is_none() && t.failed_records == 0);
        job.status = if tables_ok && valid {
            SyncStatus::Completed
        } else {
            SyncStatus::Failed
        };
    }

    /// Tables to sync, in insert order.
    fn select_tables(&self, request: &SyncRequest) -> Vec<String> {
        let only: BTreeSet<&str> = request.only_tables.iter().map(String::as_str).collect();
        let skip: BTreeSet<&str> = request.skip_tables.iter().map(String::as_str).collect();
        self.graph
            .insert_order()
            .iter()
            .map(String::as_str)
            .filter(|t| (only.is_empty() || only.contains(t)) && !skip.contains(t))
            .map(ToString::to_string)
            .collect()
    }

    async fn pre_backup(
        &self,
        request: &SyncRequest,
        target_spec: &EnvironmentSpec,
        job: &mut SyncJob,
    ) -> bool {
        if target_spec.allow_data_loss {
            job.steps.push(SyncStep {
                kind: SyncStepKind::PreBackup,
                success: true,
                skipped: true,
                detail: format!("{} allows data loss", request.target_env),
            });
            return true;
        }
        let reason = format!("before sync {} from {}", job.job_id.short(), request.source_env);
        match self
            .target_backups
            .run_backup(Tier::PreSync, Some(reason))
            .await
        {
            Ok(result) if !result.validation.valid => {
                let detail = result.validation.errors.join("; ");
                tracing::error!(errors = %detail, "pre-sync backup is invalid");
                job.steps.push(SyncStep {
                    kind: SyncStepKind::PreBackup,
                    success: false,
                    skipped: false,
                    detail: format!(
                        "safety snapshot {} failed validation: {detail}",
                        result.artifact_path.display()
                    ),
                });
                false
            }
            Ok(result) => {
                job.steps.push(SyncStep {
                    kind: SyncStepKind::PreBackup,
                    success: true,
                    skipped: false,
                    detail: format!("{} records saved", result.summary.total_records),
                });
                job.pre_sync_backup = Some(result.artifact_path);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "pre-sync backup failed");
                job.steps.push(SyncStep {
                    kind: SyncStepKind::PreBackup,
                    success: false,
                    skipped: false,
                    detail: e.to_string(),
                });
                false
            }
        }
    }

    /// Reads the source tables. Tables that fail to read are recorded and
    /// left out of the rest of the pipeline.
    async fn extract(
        &self,
        tables: &[String],
        cancel: &CancellationToken,
        job: &mut SyncJob,
    ) -> Vec<(String, Vec<Record>)> {
        let mut extracted = Vec::with_capacity(tables.len());
        let mut failures = 0usize;
        for table in tables {
            if cancel.is_cancelled() {
                tracing::warn!(table = %table, "sync cancelled during extraction");
                break;
            }
            match self.source.select_all(table).await {
                Ok(rows) => {
                    tracing::debug!(table = %table, rows = rows.len(), "table extracted");
                    job.tables.push(TableSyncResult {
                        table: table.clone(),
                        extracted: rows.len() as u64,
                        ..TableSyncResult::default()
                    });
                    extracted.push((table.clone(), rows));
                }
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "extraction failed");
                    failures += 1;
                    job.tables.push(TableSyncResult {
                        table: table.clone(),
                        error: Some(format!("extraction failed: {e}")),
                        ..TableSyncResult::default()
                    });
                }
            }
        }
        let records: usize = extracted.iter().map(|(_, rows)| rows.len()).sum();
        job.steps.push(SyncStep {
            kind: SyncStepKind::Extraction,
            success: failures == 0,
            skipped: false,
            detail: format!(
                "{records} records from {} table(s), {failures} failed",
                extracted.len()
            ),
        });
        extracted
    }

    fn anonymize<R: rand::Rng>(
        &self,
        request: &SyncRequest,
        anonymizer: &mut Anonymizer<R>,
        extracted: &mut [(String, Vec<Record>)],
        job: &mut SyncJob,
    ) {
        if !request.anonymize {
            job.steps.push(SyncStep {
                kind: SyncStepKind::Anonymization,
                success: true,
                skipped: true,
                detail: "not requested".to_string(),
            });
            return;
        }
        let mut total = 0u64;
        for (table, rows) in extracted.iter_mut() {
            let Some(rules) = self.settings.anonymization.get(table.as_str()) else {
                continue;
            };
            let changed = anonymizer.anonymize_rows(rules, rows);
            tracing::debug!(table = %table, changed, "table anonymized");
            if let Some(result) = job.tables.iter_mut().find(|r| r.table == *table) {
                result.anonymized_fields = changed;
            }
            total += changed;
        }
        job.anonymized = true;
        job.steps.push(SyncStep {
            kind: SyncStepKind::Anonymization,
            success: true,
            skipped: false,
            detail: format!("{total} field(s) rewritten"),
        });
    }

    /// Deletes target rows in reverse dependency order and returns the
    /// tables that were cleared.
    async fn clear_target(
        &self,
        extracted: &[(String, Vec<Record>)],
        cancel: &CancellationToken,
        job: &mut SyncJob,
    ) -> BTreeSet<String> {
        let mut cleared = BTreeSet::new();
        let mut deleted_total = 0u64;
        for (table, _) in extracted.iter().rev() {
            if cancel.is_cancelled() {
                tracing::warn!(table = %table, "sync cancelled before clearing");
                break;
            }
            match self.target.delete_all(table).await {
                Ok(deleted) => {
                    deleted_total += deleted;
                    cleared.insert(table.clone());
                }
                Err(e) => {
                    tracing::error!(table = %table, error = %e, "clearing target failed");
                    if let Some(result) = job.tables.iter_mut().find(|r| &r.table == table) {
                        result.error = Some(format!("clear failed: {e}"));
                    }
                }
            }
        }
        job.steps.push(SyncStep {
            kind: SyncStepKind::TargetClear,
            success: cleared.len() == extracted.len(),
            skipped: false,
            detail: format!(
                "{deleted_total} records deleted from {} table(s)",
                cleared.len()
            ),
        });
        cleared
    }

    /// Inserts in batches; a failed batch is retried row by row.
    async fn insert(
        &self,
        extracted: &[(String, Vec<Record>)],
        cleared: &BTreeSet<String>,
        job: &mut SyncJob,
    ) {
        let batch_size = self.settings.batch_size.max(1);
        let mut inserted_total = 0u64;
        let mut failed_total = 0u64;
        for (table, rows) in extracted {
            if !cleared.contains(table) {
                continue;
            }
            let mut inserted = 0u64;
            let mut failed = 0u64;
            for batch in rows.chunks(batch_size) {
                match self.target.bulk_insert(table, batch).await {
                    Ok(n) => inserted += n,
                    Err(e) => {
                        tracing::warn!(table = %table, error = %e, "batch failed, retrying per record");
                        for row in batch {
                            match self.target.bulk_insert(table, std::slice::from_ref(row)).await {
                                Ok(n) => inserted += n,
                                Err(e) => {
                                    tracing::debug!(table = %table, error = %e, "record rejected");
                                    failed += 1;
                                }
                            }
                        }
                    }
                }
            }
            tracing::info!(table = %table, inserted, failed, "table synced");
            if let Some(result) = job.tables.iter_mut().find(|r| &r.table == table) {
                result.inserted = inserted;
                result.failed_records = failed;
            }
            inserted_total += inserted;
            failed_total += failed;
        }
        job.steps.push(SyncStep {
            kind: SyncStepKind::BatchedInsert,
            success: failed_total == 0,
            skipped: false,
            detail: format!("{inserted_total} inserted, {failed_total} failed"),
        });
    }

    /// Compares target counts with extracted counts; returns `true` when
    /// every table is within tolerance.
    async fn validate(&self, extracted: &[(String, Vec<Record>)], job: &mut SyncJob) -> bool {
        for (table, rows) in extracted {
            let target = match self.target.count(table).await {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "target count failed");
                    None
                }
            };
            let check = TableValidation::compare(
                table,
                rows.len() as u64,
                target,
                self.settings.tolerance_percent,
            );
            if !check.within_tolerance {
                tracing::warn!(
                    table = %table,
                    source = check.source_count,
                    target = ?check.target_count,
                    tolerance = check.tolerance,
                    "row count out of tolerance"
                );
            }
            job.validation.push(check);
        }
        let out_of_band = job.validation.iter().filter(|v| !v.within_tolerance).count();
        job.steps.push(SyncStep {
            kind: SyncStepKind::Validation,
            success: out_of_band == 0,
            skipped: false,
            detail: format!(
                "{} table(s) checked, {out_of_band} out of tolerance",
                job.validation.len()
            ),
        });
        out_of_band == 0
    }

    async fn insert_test_data<R: rand::Rng>(
        &self,
        request: &SyncRequest,
        target_spec: &EnvironmentSpec,
        anonymizer: &mut Anonymizer<R>,
        job: &mut SyncJob,
    ) {
        let skip_reason = if !request.with_test_data {
            Some("not requested")
        } else if target_spec.is_production {
            Some("never generated for production")
        } else {
            None
        };
        if let Some(reason) = skip_reason {
            job.steps.push(SyncStep {
                kind: SyncStepKind::TestData,
                success: true,
                skipped: true,
                detail: reason.to_string(),
            });
            return;
        }

        let mut generated: BTreeMap<&str, u64> = BTreeMap::new();
        let mut errors = Vec::new();
        for (table, template) in &self.settings.test_data {
            let rows = anonymizer.generate_rows(template);
            match self.target.bulk_insert(table, &rows).await {
                Ok(n) => {
                    generated.insert(table.as_str(), n);
                }
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "test data insert failed");
                    errors.push(format!("{table}: {e}"));
                }
            }
        }
        let detail = if errors.is_empty() {
            generated
                .iter()
                .map(|(table, n)| format!("{table}: {n}"))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            errors.join("; ")
        };
        job.steps.push(SyncStep {
            kind: SyncStepKind::TestData,
            success: errors.is_empty(),
            skipped: false,
            detail,
        });
    }

    async fn finish(&self, mut job: SyncJob) -> Result<SyncOutcome, GuardianError> {
        job.finished_at = Utc::now();
        let log_path = self
            .snapshots
            .write_log(LogKind::Sync, &job.job_id, &job)
            .await?;
        tracing::info!(
            job = %job.job_id,
            status = ?job.status,
            error = ?job.error,
            log = %log_path.display(),
            "sync finished"
        );
        self.notifier
            .dispatch(&Notification::SyncFinished {
                job_id: job.job_id,
                source_env: job.source_env.clone(),
                target_env: job.target_env.clone(),
                status: job.status,
                timestamp: job.finished_at,
            })
            .await;
        Ok(SyncOutcome { job, log_path })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::confirm::AutoConfirm;
    use crate::domain::TestDataTemplate;
    use crate::notify::{MemoryNotifier, Sink};
    use crate::service::fixtures;
    use crate::store::{FailureMode, MemoryStore};
    use serde_json::{Value, json};

    struct Harness {
        _dir: tempfile::TempDir,
        snapshots: Arc<SnapshotStore>,
        source: Arc<MemoryStore>,
        target: Arc<MemoryStore>,
        notifications: MemoryNotifier,
        engine: SyncEngine<MemoryStore, MemoryStore>,
    }

    fn people(n: usize) -> Vec<Record> {
        (1..=n)
            .map(|id| {
                fixtures::record(json!({
                    "id": id,
                    "ad": format!("Ogrenci {id}"),
                    "tc_no": format!("1000000000{id}"),
                    "email": format!("ogrenci{id}@okul.example")
                }))
            })
            .collect()
    }

    fn settings() -> SyncSettings {
        let mut settings = SyncSettings::default();
        settings.test_data = BTreeMap::from([(
            "alanlar".to_string(),
            TestDataTemplate {
                count: 2,
                fields: BTreeMap::from([("ad".to_string(), "Test Alan {index}".to_string())]),
            },
        )]);
        settings
    }

    fn harness() -> Harness {
        let (dir, snapshots) = fixtures::snapshots();
        let source = Arc::new(
            MemoryStore::new()
                .with_table("alanlar", fixtures::rows("alanlar", 3))
                .with_table("ogretmenler", fixtures::rows("ogretmenler", 2))
                .with_table("ogrenciler", people(4))
                .with_table("stajlar", fixtures::rows("stajlar", 2)),
        );
        let target = Arc::new(
            MemoryStore::new()
                .with_table("alanlar", fixtures::rows("alanlar", 1))
                .with_empty_tables(&["ogretmenler", "ogrenciler", "stajlar"]),
        );
        let notifications = MemoryNotifier::new();
        let target_backups = Arc::new(BackupScheduler::new(
            Arc::clone(&target),
            Arc::clone(&snapshots),
            fixtures::graph(),
            fixtures::backup_settings(),
            NotifierSet::empty(),
        ));
        let engine = SyncEngine::new(
            Arc::clone(&source),
            Arc::clone(&target),
            target_backups,
            Arc::clone(&snapshots),
            fixtures::graph(),
            settings(),
            NotifierSet::empty().with(Sink::Memory(notifications.clone())),
        )
        .with_seed(11);
        Harness {
            _dir: dir,
            snapshots,
            source,
            target,
            notifications,
            engine,
        }
    }

    async fn run(h: &Harness, request: &SyncRequest) -> SyncOutcome {
        let Ok(outcome) = h
            .engine
            .sync(request, &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("sync errored");
        };
        outcome
    }

    #[tokio::test]
    async fn staging_refresh_copies_and_anonymizes() {
        let h = harness();
        let outcome = run(&h, &SyncRequest::refresh_staging()).await;

        assert!(outcome.succeeded(), "{:?}", outcome.job);
        assert!(outcome.job.anonymized);
        assert!(outcome.job.pre_sync_backup.is_some());
        assert_eq!(h.target.rows("alanlar").await.map(|r| r.len()), Some(3));

        let Some(students) = h.target.rows("ogrenciler").await else {
            panic!("table missing");
        };
        assert_eq!(students.len(), 4);
        for row in &students {
            let id = row.get("id").cloned().unwrap_or(Value::Null);
            assert_eq!(row.get("email"), Some(&json!(format!("user{id}@example.com"))));
            assert_ne!(row.get("tc_no"), Some(&json!(format!("1000000000{id}"))));
        }
        // The source is never touched.
        assert_eq!(h.source.write_count().await, 0);

        let kinds: Vec<SyncStepKind> = outcome.job.steps.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SyncStepKind::PreBackup,
                SyncStepKind::Extraction,
                SyncStepKind::Anonymization,
                SyncStepKind::TargetClear,
                SyncStepKind::BatchedInsert,
                SyncStepKind::Validation,
                SyncStepKind::TestData,
            ]
        );
        let events = h.notifications.events().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn production_target_is_refused_without_force() {
        let h = harness();
        let outcome = run(&h, &SyncRequest::new("staging", "production")).await;
        assert_eq!(outcome.job.status, SyncStatus::Refused);
        assert!(outcome.job.steps.is_empty());
        assert_eq!(h.target.write_count().await, 0);

        let Ok(history) = sync_history(&h.snapshots).await else {
            panic!("history failed");
        };
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn declined_confirmation_changes_nothing() {
        let h = harness();
        let Ok(outcome) = h
            .engine
            .sync(
                &SyncRequest::refresh_staging(),
                &AutoConfirm(false),
                &CancellationToken::new(),
            )
            .await
        else {
            panic!("sync errored");
        };
        assert_eq!(outcome.job.status, SyncStatus::Refused);
        assert_eq!(outcome.job.error.as_deref(), Some("User cancelled"));
        assert_eq!(h.target.write_count().await, 0);
    }

    #[tokio::test]
    async fn dev_setup_skips_backup_and_adds_test_data() {
        let h = harness();
        let outcome = run(&h, &SyncRequest::setup_dev()).await;
        assert!(outcome.succeeded(), "{:?}", outcome.job);
        assert!(outcome.job.pre_sync_backup.is_none());
        assert!(outcome.job.steps.first().is_some_and(|s| s.skipped));
        // Test data lands after validation: 3 copied + 2 generated.
        assert_eq!(h.target.rows("alanlar").await.map(|r| r.len()), Some(5));
        assert!(outcome.job.steps.last().is_some_and(|s| s.success && !s.skipped));
    }

    #[tokio::test]
    async fn rejected_rows_fall_back_per_record_and_fail_validation() {
        let h = harness();
        h.target
            .reject_inserts_where("ogrenciler", "id", json!(2))
            .await;
        let outcome = run(&h, &SyncRequest::new("production", "staging")).await;

        assert_eq!(outcome.job.status, SyncStatus::Failed);
        let Some(students) = outcome.job.tables.iter().find(|t| t.table == "ogrenciler") else {
            panic!("no result for ogrenciler");
        };
        assert_eq!((students.inserted, students.failed_records), (3, 1));
        // 3 of 4 is within the floor tolerance of one row.
        assert!(outcome.job.validation.iter().all(|v| v.within_tolerance));
    }

    #[tokio::test]
    async fn invalid_pre_sync_snapshot_stops_before_clearing_the_target() {
        let h = harness();
        h.target.fail("ogrenciler", FailureMode::Read).await;
        let outcome = run(&h, &SyncRequest::refresh_staging()).await;

        assert_eq!(outcome.job.status, SyncStatus::Failed);
        assert_eq!(outcome.job.error.as_deref(), Some("pre-sync backup failed"));
        assert!(outcome.job.pre_sync_backup.is_none());
        assert_eq!(outcome.job.steps.len(), 1);
        assert!(outcome.job.steps.first().is_some_and(|s| !s.success));
        assert_eq!(h.target.write_count().await, 0);
    }

    #[tokio::test]
    async fn failed_extraction_leaves_target_table_alone() {
        let h = harness();
        h.source.fail("stajlar", FailureMode::Read).await;
        h.target
            .set_rows("stajlar", fixtures::rows("stajlar", 7))
            .await;
        let outcome = run(&h, &SyncRequest::new("production", "staging")).await;

        assert_eq!(outcome.job.status, SyncStatus::Failed);
        assert_eq!(h.target.rows("stajlar").await.map(|r| r.len()), Some(7));
        assert!(outcome.job.validation.iter().all(|v| v.table != "stajlar"));
    }

    #[tokio::test]
    async fn filters_and_validation() {
        let h = harness();
        let mut request = SyncRequest::new("production", "staging");
        request.only_tables = vec!["alanlar".to_string(), "ogrenciler".to_string()];
        request.skip_tables = vec!["ogrenciler".to_string()];
        let outcome = run(&h, &request).await;
        assert!(outcome.succeeded());
        let tables: Vec<&str> = outcome.job.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(tables, vec!["alanlar"]);
        assert_eq!(h.target.rows("ogrenciler").await.map(|r| r.len()), Some(0));
    }

    #[tokio::test]
    async fn unknown_or_identical_environments_are_errors() {
        let h = harness();
        let confirm = AutoConfirm(true);
        let cancel = CancellationToken::new();
        assert!(matches!(
            h.engine.sync(&SyncRequest::new("production", "qa"), &confirm, &cancel).await,
            Err(GuardianError::UnknownEnvironment(_))
        ));
        assert!(matches!(
            h.engine.sync(&SyncRequest::new("staging", "staging"), &confirm, &cancel).await,
            Err(GuardianError::InvalidArgument(_))
        ));
    }

    #[test]
    fn environment_listing_reports_configured_urls() {
        let listing = list_environments(&SyncSettings::default(), |key| {
            (key == "STAGING_DATABASE_URL").then(|| "postgres://staging".to_string())
        });
        let configured: Vec<&str> = listing
            .iter()
            .filter(|e| e.configured)
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(configured, vec!["staging"]);
        assert!(listing.iter().any(|e| e.name == "production" && e.spec.is_production));
    }

    #[tokio::test]
    async fn cleanup_without_limit_keeps_everything() {
        let h = harness();
        run(&h, &SyncRequest::new("production", "staging")).await;
        run(&h, &SyncRequest::new("production", "staging")).await;
        let retention = RetentionPolicy {
            pre_sync: None,
            ..RetentionPolicy::default()
        };
        let Ok(summary) = cleanup_pre_sync(&h.snapshots, &retention).await else {
            panic!("cleanup failed");
        };
        assert_eq!((summary.kept, summary.deleted.len()), (2, 0));

        // Even a zero limit leaves the newest snapshot in place.
        let strict = RetentionPolicy {
            pre_sync: Some(0),
            ..RetentionPolicy::default()
        };
        let Ok(summary) = cleanup_pre_sync(&h.snapshots, &strict).await else {
            panic!("cleanup failed");
        };
        assert_eq!((summary.kept, summary.deleted.len()), (1, 1));
    }
}
