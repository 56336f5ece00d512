//! Emergency response orchestration.
//!
//! A response always starts with an emergency backup, then runs the
//! playbook configured for the incident type step by step, then checks the
//! store's health. The outcome is persisted as an [`EmergencyLog`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use super::backup_scheduler::BackupScheduler;
use super::playbook::{PlaybookAction, fallback_playbook, resolve_action};
use super::rollback_engine::{RollbackEngine, RollbackOptions};
use super::schema_manager::{SchemaManager, generate_schema_hash};
use super::severity::assess_emergency_level;
use crate::cancel::CancellationToken;
use crate::config::EmergencySettings;
use crate::confirm::{ConfirmationContext, ConfirmationPort};
use crate::domain::{
    Assessment, CatalogQuery, EmergencyLog, HealthReport, Incident, IncidentStatus,
    Notification, PlaybookStepSpec, ResponseMode, StepResult, Tier,
};
use crate::error::GuardianError;
use crate::notify::NotifierSet;
use crate::persistence::{LogKind, SnapshotStore};
use crate::store::DataStore;

/// A finished response and where its log was written.
#[derive(Debug, Clone)]
pub struct EmergencyOutcome {
    /// The log.
    pub log: EmergencyLog,
    /// Path of the log document.
    pub log_path: PathBuf,
}

/// Current health plus the most recent incident.
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyStatus {
    /// Live health check.
    pub health: HealthReport,
    /// Newest emergency log, if any.
    pub last_incident: Option<EmergencyLog>,
}

/// Everything a step needs besides the step itself.
struct StepContext<'a> {
    incident: &'a Incident,
    assessment: &'a Assessment,
    mode: ResponseMode,
    emergency_backup: Option<&'a PathBuf>,
    confirm: &'a dyn ConfirmationPort,
    cancel: &'a CancellationToken,
}

/// Runs incident responses against the live store.
#[derive(Debug)]
pub struct EmergencyOrchestrator<S> {
    store: Arc<S>,
    snapshots: Arc<SnapshotStore>,
    backups: Arc<BackupScheduler<S>>,
    rollback: Arc<RollbackEngine<S>>,
    schema: Arc<SchemaManager<S>>,
    settings: EmergencySettings,
    notifier: NotifierSet,
}

impl<S: DataStore> EmergencyOrchestrator<S> {
    /// Creates an orchestrator composed over the other engines.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        snapshots: Arc<SnapshotStore>,
        backups: Arc<BackupScheduler<S>>,
        rollback: Arc<RollbackEngine<S>>,
        schema: Arc<SchemaManager<S>>,
        settings: EmergencySettings,
        notifier: NotifierSet,
    ) -> Self {
        Self {
            store,
            snapshots,
            backups,
            rollback,
            schema,
            settings,
            notifier,
        }
    }

    /// Scores an incident against the configured critical tables.
    #[must_use]
    pub fn assess(&self, incident: &Incident) -> Assessment {
        assess_emergency_level(incident, self.backups.critical_tables())
    }

    /// Runs the full response for an incident.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] or [`GuardianError::Serialization`]
    /// only if the emergency log cannot be written. Step failures are
    /// recorded in the log.
    pub async fn execute_emergency_response(
        &self,
        incident: Incident,
        mode: ResponseMode,
        confirm: &dyn ConfirmationPort,
        cancel: &CancellationToken,
    ) -> Result<EmergencyOutcome, GuardianError> {
        let started_at = Utc::now();
        let assessment = self.assess(&incident);
        tracing::warn!(
            incident = %incident.id,
            kind = %incident.incident_type,
            level = %assessment.level,
            score = assessment.score,
            ?mode,
            "emergency declared"
        );
        self.notifier
            .dispatch(&Notification::EmergencyDeclared {
                incident_id: incident.id,
                incident_type: incident.incident_type,
                level: assessment.level,
                score: assessment.score,
                timestamp: started_at,
            })
            .await;

        let reason = match &incident.description {
            Some(description) => format!("{} incident {}: {description}", incident.incident_type, incident.id.short()),
            None => format!("{} incident {}", incident.incident_type, incident.id.short()),
        };
        let emergency_backup = match self.backups.run_backup(Tier::Emergency, Some(reason)).await {
            Ok(result) => Some(result.artifact_path),
            Err(e) => {
                tracing::error!(error = %e, "emergency backup failed, continuing with the playbook");
                None
            }
        };

        let playbook = self
            .settings
            .playbooks
            .get(incident.incident_type.as_str())
            .cloned()
            .unwrap_or_else(fallback_playbook);

        let context = StepContext {
            incident: &incident,
            assessment: &assessment,
            mode,
            emergency_backup: emergency_backup.as_ref(),
            confirm,
            cancel,
        };
        let mut steps = Vec::with_capacity(playbook.steps.len());
        let mut aborted_early = false;
        for (position, spec) in playbook.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(step = %spec.step, "response cancelled");
                aborted_early = true;
                break;
            }
            let result = self.run_step(position + 1, spec, &context).await;
            let stop = result.critical && !result.success;
            steps.push(result);
            if stop {
                tracing::error!(step = %spec.step, "critical step failed, stopping playbook");
                aborted_early = true;
                break;
            }
        }

        let health = self.health_check().await;
        let status = if !aborted_early && health.healthy {
            IncidentStatus::Resolved
        } else {
            IncidentStatus::Failed
        };

        let log = EmergencyLog {
            incident,
            assessment,
            mode,
            emergency_backup,
            playbook: playbook.name,
            steps,
            aborted_early,
            health,
            status,
            started_at,
            finished_at: Utc::now(),
        };
        let log_path = self
            .snapshots
            .write_log(LogKind::Emergency, &log.incident.id, &log)
            .await?;
        tracing::info!(incident = %log.incident.id, ?status, log = %log_path.display(), "emergency concluded");
        self.notifier
            .dispatch(&Notification::EmergencyConcluded {
                incident_id: log.incident.id,
                status,
                timestamp: log.finished_at,
            })
            .await;
        Ok(EmergencyOutcome { log, log_path })
    }

    async fn run_step(&self, index: usize, spec: &PlaybookStepSpec, ctx: &StepContext<'_>) -> StepResult {
        let action = resolve_action(&spec.step);
        let started = Instant::now();
        let (success, detail) = match action {
            PlaybookAction::RestoreLatestBackup => self.restore_latest(ctx).await,
            PlaybookAction::VerifyIntegrity => self.verify_integrity().await,
            PlaybookAction::CollectDiagnostics => self.collect_diagnostics().await,
            PlaybookAction::CheckConnectivity => match self.store.ping().await {
                Ok(()) => (true, "database reachable".to_string()),
                Err(e) => (false, e.to_string()),
            },
            PlaybookAction::CaptureSchema if ctx.mode == ResponseMode::Drill => {
                let snapshot = self.schema.capture_current_schema().await;
                match generate_schema_hash(&snapshot) {
                    Ok(hash) => (true, format!("schema captured ({hash}), not saved in a drill")),
                    Err(e) => (false, e.to_string()),
                }
            }
            PlaybookAction::CaptureSchema => {
                let label = format!("incident-{}", ctx.incident.id.short());
                let description = format!("{} incident", ctx.incident.incident_type);
                match self.schema.capture_version(&label, &description).await {
                    Ok(version) => (true, format!("schema saved as {} ({})", version.version, version.hash)),
                    Err(e) => (false, e.to_string()),
                }
            }
            PlaybookAction::Notify => {
                let delivered = self
                    .notifier
                    .dispatch(&Notification::AlertRaised {
                        level: ctx.assessment.level,
                        message: format!(
                            "{} incident {} in progress",
                            ctx.incident.incident_type, ctx.incident.id
                        ),
                        timestamp: Utc::now(),
                    })
                    .await;
                (true, format!("delivered to {delivered} sink(s)"))
            }
            PlaybookAction::Manual => match ctx.mode {
                ResponseMode::Drill => (true, "manual step acknowledged (drill)".to_string()),
                ResponseMode::Live => {
                    let confirmed = ctx.confirm.confirm(&ConfirmationContext {
                        operation: "emergency".to_string(),
                        summary: format!("manual step: {}", spec.step),
                        tables: ctx.incident.affected_tables.clone(),
                    });
                    if confirmed {
                        (true, "confirmed by operator".to_string())
                    } else {
                        (false, "not confirmed by operator".to_string())
                    }
                }
            },
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(index, step = %spec.step, %action, success, duration_ms, "playbook step");
        StepResult {
            index,
            step: spec.step.clone(),
            action: action.to_string(),
            critical: spec.critical,
            success,
            detail,
            duration_ms,
        }
    }

    async fn restore_latest(&self, ctx: &StepContext<'_>) -> (bool, String) {
        let latest = match self.backups.latest_backup(&Tier::SCHEDULED).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return (false, "no scheduled backup available".to_string()),
            Err(e) => return (false, e.to_string()),
        };
        let options = RollbackOptions {
            dry_run: ctx.mode == ResponseMode::Drill,
            only_tables: ctx.incident.affected_tables.clone(),
            skip_tables: Vec::new(),
            skip_safety_backup: ctx.emergency_backup.is_some(),
        };
        match self
            .rollback
            .rollback(&latest.path, &options, ctx.confirm, ctx.cancel)
            .await
        {
            Ok(outcome) => {
                let verb = if options.dry_run { "simulated restore" } else { "restore" };
                let detail = match &outcome.log.abort_reason {
                    Some(reason) => format!("{verb} from {} aborted: {reason}", latest.path.display()),
                    None => format!(
                        "{verb} from {} ({} table(s))",
                        latest.path.display(),
                        outcome.log.processed_tables.len().max(outcome.log.impact.len())
                    ),
                };
                (outcome.succeeded(), detail)
            }
            Err(e) => (false, e.to_string()),
        }
    }

    async fn verify_integrity(&self) -> (bool, String) {
        let mut problems = Vec::new();
        for table in self.backups.critical_tables() {
            if let Err(e) = self.store.count(table).await {
                problems.push(format!("{table}: {e}"));
            }
        }
        let backup = match self.backups.latest_backup(&Tier::SCHEDULED).await {
            Ok(Some(entry)) => match self.backups.validate_backup(&entry.path).await {
                Ok(report) => {
                    if !report.valid {
                        problems.push(format!("latest backup invalid: {}", report.errors.join("; ")));
                    }
                    report.verdict().to_string()
                }
                Err(e) => {
                    problems.push(e.to_string());
                    "unreadable".to_string()
                }
            },
            Ok(None) => "none".to_string(),
            Err(e) => {
                problems.push(e.to_string());
                "unreadable".to_string()
            }
        };
        if problems.is_empty() {
            (
                true,
                format!(
                    "{} critical table(s) readable, latest backup {backup}",
                    self.backups.critical_tables().len()
                ),
            )
        } else {
            (false, problems.join("; "))
        }
    }

    async fn collect_diagnostics(&self) -> (bool, String) {
        match self.store.catalog(CatalogQuery::ActiveConnections).await {
            Ok(rows) => {
                let stats = rows.first().map_or_else(
                    || "no connection statistics".to_string(),
                    |row| serde_json::Value::Object(row.clone()).to_string(),
                );
                (true, stats)
            }
            Err(e) => (false, e.to_string()),
        }
    }

    /// Pings the store and counts every critical table.
    pub async fn health_check(&self) -> HealthReport {
        let mut issues = Vec::new();
        let connected = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                issues.push(format!("database unreachable: {e}"));
                false
            }
        };
        let mut table_counts = BTreeMap::new();
        if connected {
            for table in self.backups.critical_tables() {
                let count = match self.store.count(table).await {
                    Ok(0) => {
                        issues.push(format!("critical table {table} is empty"));
                        Some(0)
                    }
                    Ok(n) => Some(n),
                    Err(e) => {
                        issues.push(format!("critical table {table}: {e}"));
                        None
                    }
                };
                table_counts.insert(table.clone(), count);
            }
        }
        HealthReport {
            connected,
            healthy: connected && issues.is_empty(),
            table_counts,
            issues,
            checked_at: Utc::now(),
        }
    }

    /// Past emergency logs, newest first. Unreadable logs are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if the log directory cannot be read.
    pub async fn history(&self) -> Result<Vec<(PathBuf, EmergencyLog)>, GuardianError> {
        let mut history = Vec::new();
        for path in self.snapshots.list_logs(LogKind::Emergency).await? {
            match self.snapshots.read_json::<EmergencyLog>(&path).await {
                Ok(log) => history.push((path, log)),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable log"),
            }
        }
        Ok(history)
    }

    /// Health check plus the most recent incident.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Io`] if the log directory cannot be read.
    pub async fn status(&self) -> Result<EmergencyStatus, GuardianError> {
        let health = self.health_check().await;
        let last_incident = self.history().await?.into_iter().next().map(|(_, log)| log);
        Ok(EmergencyStatus {
            health,
            last_incident,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::{Playbook, RollbackSettings};
    use crate::confirm::AutoConfirm;
    use crate::domain::IncidentType;
    use crate::notify::{MemoryNotifier, Sink};
    use crate::service::fixtures;
    use crate::store::MemoryStore;

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        snapshots: Arc<SnapshotStore>,
        backups: Arc<BackupScheduler<MemoryStore>>,
        notifications: MemoryNotifier,
        orchestrator: EmergencyOrchestrator<MemoryStore>,
    }

    fn harness(settings: EmergencySettings) -> Harness {
        let (dir, snapshots) = fixtures::snapshots();
        let store = Arc::new(fixtures::seeded_store());
        let notifications = MemoryNotifier::new();
        let notifier = NotifierSet::empty().with(Sink::Memory(notifications.clone()));
        let backups = Arc::new(BackupScheduler::new(
            Arc::clone(&store),
            Arc::clone(&snapshots),
            fixtures::graph(),
            fixtures::backup_settings(),
            NotifierSet::empty(),
        ));
        let rollback = Arc::new(RollbackEngine::new(
            Arc::clone(&store),
            Arc::clone(&snapshots),
            fixtures::graph(),
            Arc::clone(&backups),
            RollbackSettings::default(),
            NotifierSet::empty(),
        ));
        let schema = Arc::new(SchemaManager::new(Arc::clone(&store), Arc::clone(&snapshots)));
        let orchestrator = EmergencyOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&snapshots),
            Arc::clone(&backups),
            rollback,
            schema,
            settings,
            notifier,
        );
        Harness {
            _dir: dir,
            store,
            snapshots,
            backups,
            notifications,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn data_loss_is_restored_from_latest_backup() {
        let h = harness(EmergencySettings::default());
        let Ok(_) = h.backups.run_backup(Tier::Daily, None).await else {
            panic!("backup failed");
        };
        h.store.set_rows("ogrenciler", fixtures::rows("ogrenciler", 1)).await;

        let incident = Incident::new(IncidentType::DataLoss)
            .with_tables(["ogrenciler"])
            .with_records_lost(3);
        let Ok(outcome) = h
            .orchestrator
            .execute_emergency_response(incident, ResponseMode::Live, &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("response failed");
        };
        assert_eq!(outcome.log.status, IncidentStatus::Resolved);
        assert!(outcome.log.emergency_backup.is_some());
        assert!(!outcome.log.aborted_early);
        assert_eq!(h.store.rows("ogrenciler").await.map(|r| r.len()), Some(4));
        let actions: Vec<&str> = outcome.log.steps.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["check_connectivity", "restore_latest_backup", "verify_integrity", "notify"]
        );

        let events = h.notifications.events().await;
        assert_eq!(events.first().map(Notification::event_type_str), Some("emergency_declared"));
        assert_eq!(events.last().map(Notification::event_type_str), Some("emergency_concluded"));
    }

    #[tokio::test]
    async fn drill_restores_nothing() {
        let h = harness(EmergencySettings::default());
        let Ok(_) = h.backups.run_backup(Tier::Daily, None).await else {
            panic!("backup failed");
        };
        h.store.set_rows("ogrenciler", fixtures::rows("ogrenciler", 1)).await;
        let incident = Incident::new(IncidentType::DataLoss).with_tables(["ogrenciler"]);
        let Ok(outcome) = h
            .orchestrator
            .execute_emergency_response(incident, ResponseMode::Drill, &AutoConfirm(false), &CancellationToken::new())
            .await
        else {
            panic!("response failed");
        };
        assert_eq!(outcome.log.mode, ResponseMode::Drill);
        assert_eq!(h.store.write_count().await, 0);
        assert_eq!(h.store.rows("ogrenciler").await.map(|r| r.len()), Some(1));
    }

    #[tokio::test]
    async fn drill_does_not_save_a_schema_version() {
        let h = harness(EmergencySettings::default());
        let Ok(_) = h.backups.run_backup(Tier::Daily, None).await else {
            panic!("backup failed");
        };
        let incident = Incident::new(IncidentType::Corruption).with_tables(["alanlar"]);
        let Ok(outcome) = h
            .orchestrator
            .execute_emergency_response(incident, ResponseMode::Drill, &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("response failed");
        };
        let Some(capture) = outcome.log.steps.iter().find(|s| s.action == "capture_schema") else {
            panic!("no schema step in {:?}", outcome.log.steps);
        };
        assert!(capture.success);
        let Ok(index) = h.snapshots.read_schema_index().await else {
            panic!("index unreadable");
        };
        assert!(index.versions.is_empty());
        assert!(index.current_version.is_none());
    }

    #[tokio::test]
    async fn failing_critical_step_stops_the_playbook() {
        let h = harness(EmergencySettings::default());
        h.store.set_offline(true).await;
        let incident = Incident::new(IncidentType::HardwareFailure);
        let Ok(outcome) = h
            .orchestrator
            .execute_emergency_response(incident, ResponseMode::Live, &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("response failed");
        };
        assert!(outcome.log.aborted_early);
        assert_eq!(outcome.log.steps.len(), 1);
        assert_eq!(outcome.log.status, IncidentStatus::Failed);
        assert!(!outcome.log.health.connected);
    }

    #[tokio::test]
    async fn declined_manual_critical_step_fails_the_response() {
        let h = harness(EmergencySettings::default());
        let incident = Incident::new(IncidentType::SecurityBreach);
        let Ok(outcome) = h
            .orchestrator
            .execute_emergency_response(incident, ResponseMode::Live, &AutoConfirm(false), &CancellationToken::new())
            .await
        else {
            panic!("response failed");
        };
        assert_eq!(outcome.log.steps.len(), 1);
        assert_eq!(outcome.log.steps.first().map(|s| s.action.as_str()), Some("manual"));
        assert_eq!(outcome.log.status, IncidentStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_playbook_falls_back_and_history_lists_it() {
        let settings = EmergencySettings {
            playbooks: BTreeMap::from([(
                "corruption".to_string(),
                Playbook {
                    name: "Only corruption".to_string(),
                    steps: vec![PlaybookStepSpec::new("Notify stakeholders")],
                },
            )]),
            ..EmergencySettings::default()
        };
        let h = harness(settings);
        let incident = Incident::new(IncidentType::PerformanceDegradation);
        let Ok(outcome) = h
            .orchestrator
            .execute_emergency_response(incident, ResponseMode::Live, &AutoConfirm(true), &CancellationToken::new())
            .await
        else {
            panic!("response failed");
        };
        assert_eq!(outcome.log.playbook, fallback_playbook().name);
        assert_eq!(outcome.log.status, IncidentStatus::Resolved);

        let Ok(status) = h.orchestrator.status().await else {
            panic!("status failed");
        };
        assert!(status.health.healthy);
        assert_eq!(
            status.last_incident.map(|log| log.incident.id),
            Some(outcome.log.incident.id)
        );
    }

    #[tokio::test]
    async fn health_flags_empty_critical_tables() {
        let h = harness(EmergencySettings::default());
        h.store.set_rows("alanlar", Vec::new()).await;
        let health = h.orchestrator.health_check().await;
        assert!(health.connected);
        assert!(!health.healthy);
        assert_eq!(health.table_counts.get("alanlar"), Some(&Some(0)));
    }
}
