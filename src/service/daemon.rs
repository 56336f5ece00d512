//! Long-running mode: scheduled backups plus the health monitor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::MissedTickBehavior;

use super::backup_scheduler::BackupScheduler;
use super::monitor::HealthMonitor;
use super::severity::assess_emergency_level;
use crate::domain::{Incident, Notification, Tier};
use crate::notify::NotifierSet;
use crate::store::DataStore;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Counters reported when the daemon stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DaemonReport {
    /// Scheduled backup passes.
    pub backup_runs: u64,
    /// Monitor probes.
    pub monitor_checks: u64,
    /// Incidents raised by the monitor.
    pub incidents: u64,
}

/// Drives the backup schedule and the monitor from interval timers.
#[derive(Debug)]
pub struct Daemon<S> {
    backups: Arc<BackupScheduler<S>>,
    monitor: HealthMonitor<S>,
    notifier: NotifierSet,
    backup_every: Duration,
    monitor_every: Duration,
}

impl<S: DataStore> Daemon<S> {
    /// Creates a daemon. Periods below one millisecond are raised to it.
    #[must_use]
    pub fn new(
        backups: Arc<BackupScheduler<S>>,
        monitor: HealthMonitor<S>,
        notifier: NotifierSet,
        backup_every: Duration,
        monitor_every: Duration,
    ) -> Self {
        Self {
            backups,
            monitor,
            notifier,
            backup_every: backup_every.max(MIN_PERIOD),
            monitor_every: monitor_every.max(MIN_PERIOD),
        }
    }

    /// Runs until `ctrl_c`.
    pub async fn run(self) -> DaemonReport {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl_c, stopping");
            }
        })
        .await
    }

    /// Runs until `shutdown` completes. Both timers fire once right away.
    pub async fn run_until<F>(mut self, shutdown: F) -> DaemonReport
    where
        F: Future<Output = ()>,
    {
        let mut report = DaemonReport::default();
        let mut backup_tick = tokio::time::interval(self.backup_every);
        backup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut monitor_tick = tokio::time::interval(self.monitor_every);
        monitor_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            backup_every_secs = self.backup_every.as_secs(),
            monitor_every_secs = self.monitor_every.as_secs(),
            "daemon started"
        );
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = backup_tick.tick() => {
                    report.backup_runs += 1;
                    self.scheduled_backups().await;
                }
                _ = monitor_tick.tick() => {
                    report.monitor_checks += 1;
                    let incidents = self.monitor.check().await;
                    report.incidents += incidents.len() as u64;
                    self.handle_incidents(&incidents).await;
                }
            }
        }
        tracing::info!(
            backups = report.backup_runs,
            checks = report.monitor_checks,
            incidents = report.incidents,
            "daemon stopped"
        );
        report
    }

    async fn scheduled_backups(&self) {
        match self.backups.run_all(Utc::now().date_naive()).await {
            Ok(results) => {
                let invalid = results.iter().filter(|r| !r.validation.valid).count();
                tracing::info!(tiers = results.len(), invalid, "scheduled backups done");
            }
            Err(e) => tracing::error!(error = %e, "scheduled backups failed"),
        }
    }

    /// Takes an emergency backup and raises an alert for every incident.
    /// Responding with a playbook is left to an operator.
    pub async fn handle_incidents(&self, incidents: &[Incident]) {
        for incident in incidents {
            let assessment = assess_emergency_level(incident, self.backups.critical_tables());
            tracing::warn!(
                incident = %incident.id,
                kind = %incident.incident_type,
                level = %assessment.level,
                "monitor raised an incident"
            );
            let reason = format!(
                "monitor detected {} ({})",
                incident.incident_type,
                incident.id.short()
            );
            let backup = match self.backups.run_backup(Tier::Emergency, Some(reason)).await {
                Ok(result) => format!("emergency backup {}", result.artifact_path.display()),
                Err(e) => {
                    tracing::error!(error = %e, "emergency backup failed");
                    format!("emergency backup failed: {e}")
                }
            };
            let description = incident.description.as_deref().unwrap_or("no details");
            self.notifier
                .dispatch(&Notification::AlertRaised {
                    level: assessment.level,
                    message: format!("{}: {description}; {backup}", incident.incident_type),
                    timestamp: Utc::now(),
                })
                .await;
        }
    }
}
