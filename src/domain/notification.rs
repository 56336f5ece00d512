//! Structured events delivered to notifier sinks.
//!
//! Every engine outcome worth telling a human about becomes a
//! [`Notification`]. Sinks decide how to render and deliver it.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{IncidentStatus, IncidentType, OperationId, SeverityLevel, SyncStatus, Tier};

/// Domain event handed to every configured notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Notification {
    /// A backup artifact was written.
    BackupCompleted {
        /// Tier of the artifact.
        tier: Tier,
        /// Artifact path.
        artifact: PathBuf,
        /// Records captured.
        total_records: u64,
        /// Whether the artifact passed validation.
        valid: bool,
        /// Completion time.
        timestamp: DateTime<Utc>,
    },

    /// A rollback attempt finished.
    RollbackFinished {
        /// Operation identifier.
        operation_id: OperationId,
        /// Artifact restored from.
        source: PathBuf,
        /// Whether it was a dry run.
        dry_run: bool,
        /// Overall success.
        success: bool,
        /// Completion time.
        timestamp: DateTime<Utc>,
    },

    /// An incident response started.
    EmergencyDeclared {
        /// Incident identifier.
        incident_id: OperationId,
        /// Kind of incident.
        incident_type: IncidentType,
        /// Assessed level.
        level: SeverityLevel,
        /// Assessed score.
        score: u32,
        /// Declaration time.
        timestamp: DateTime<Utc>,
    },

    /// An incident response finished.
    EmergencyConcluded {
        /// Incident identifier.
        incident_id: OperationId,
        /// Terminal status.
        status: IncidentStatus,
        /// Completion time.
        timestamp: DateTime<Utc>,
    },

    /// A sync job finished.
    SyncFinished {
        /// Job identifier.
        job_id: OperationId,
        /// Source environment.
        source_env: String,
        /// Target environment.
        target_env: String,
        /// Terminal status.
        status: SyncStatus,
        /// Completion time.
        timestamp: DateTime<Utc>,
    },

    /// The monitor detected an anomaly.
    AlertRaised {
        /// Assessed level.
        level: SeverityLevel,
        /// Human-readable description.
        message: String,
        /// Detection time.
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::BackupCompleted { .. } => "backup_completed",
            Self::RollbackFinished { .. } => "rollback_finished",
            Self::EmergencyDeclared { .. } => "emergency_declared",
            Self::EmergencyConcluded { .. } => "emergency_concluded",
            Self::SyncFinished { .. } => "sync_finished",
            Self::AlertRaised { .. } => "alert_raised",
        }
    }

    /// Returns `true` for events that report a failure or an alert.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        match self {
            Self::BackupCompleted { valid, .. } => !valid,
            Self::RollbackFinished { success, .. } => !success,
            Self::EmergencyDeclared { .. } | Self::AlertRaised { .. } => true,
            Self::EmergencyConcluded { status, .. } => *status == IncidentStatus::Failed,
            Self::SyncFinished { status, .. } => *status != SyncStatus::Completed,
        }
    }

    /// One-line human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::BackupCompleted {
                tier,
                artifact,
                total_records,
                valid,
                ..
            } => format!(
                "{tier} backup {} ({total_records} records): {}",
                if *valid { "valid" } else { "INVALID" },
                artifact.display()
            ),
            Self::RollbackFinished {
                operation_id,
                source,
                dry_run,
                success,
                ..
            } => format!(
                "{} {operation_id} from {} {}",
                if *dry_run { "dry-run rollback" } else { "rollback" },
                source.display(),
                if *success { "succeeded" } else { "FAILED" }
            ),
            Self::EmergencyDeclared {
                incident_id,
                incident_type,
                level,
                score,
                ..
            } => format!("{level} {incident_type} incident {incident_id} (score {score})"),
            Self::EmergencyConcluded {
                incident_id,
                status,
                ..
            } => format!("incident {incident_id} concluded: {status:?}"),
            Self::SyncFinished {
                source_env,
                target_env,
                status,
                ..
            } => format!("sync {source_env} -> {target_env}: {status:?}"),
            Self::AlertRaised { level, message, .. } => format!("{level} alert: {message}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn backup_event_is_tagged() {
        let event = Notification::BackupCompleted {
            tier: Tier::Daily,
            artifact: PathBuf::from("backups/daily/daily-20260101T000000000000Z.json"),
            total_records: 42,
            valid: true,
            timestamp: Utc::now(),
        };
        let Ok(json) = serde_json::to_value(&event) else {
            panic!("serialization failed");
        };
        assert_eq!(json["event_type"], "backup_completed");
        assert_eq!(json["tier"], "daily");
        assert_eq!(event.event_type_str(), "backup_completed");
        assert!(!event.is_failure());
    }

    #[test]
    fn failed_sync_is_a_failure() {
        let event = Notification::SyncFinished {
            job_id: OperationId::new(),
            source_env: "production".into(),
            target_env: "staging".into(),
            status: SyncStatus::Failed,
            timestamp: Utc::now(),
        };
        assert!(event.is_failure());
        assert!(event.summary().contains("production -> staging"));
    }
}
