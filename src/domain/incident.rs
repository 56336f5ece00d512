//! Incidents, severity assessments and emergency logs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OperationId;

/// Kind of incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncidentType {
    /// Rows or pages are corrupted.
    Corruption,
    /// Rows were deleted or overwritten.
    DataLoss,
    /// Unauthorized access or tampering.
    SecurityBreach,
    /// The database is reachable but slow or saturated.
    PerformanceDegradation,
    /// The database host or storage failed.
    HardwareFailure,
}

impl IncidentType {
    /// Every incident type.
    pub const ALL: [Self; 5] = [
        Self::Corruption,
        Self::DataLoss,
        Self::SecurityBreach,
        Self::PerformanceDegradation,
        Self::HardwareFailure,
    ];

    /// Returns the kebab-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Corruption => "corruption",
            Self::DataLoss => "data-loss",
            Self::SecurityBreach => "security-breach",
            Self::PerformanceDegradation => "performance-degradation",
            Self::HardwareFailure => "hardware-failure",
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown incident type `{s}`"))
    }
}

/// An incident reported by an operator or raised by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    /// Incident identifier.
    pub id: OperationId,
    /// Kind of incident.
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    /// Tables known to be affected.
    #[serde(default)]
    pub affected_tables: Vec<String>,
    /// Estimated number of lost records.
    #[serde(default)]
    pub records_lost: u64,
    /// Observed downtime in milliseconds.
    #[serde(default)]
    pub downtime_ms: u64,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the incident was detected or reported.
    pub detected_at: DateTime<Utc>,
}

impl Incident {
    /// Creates an incident with no affected tables, losses or downtime.
    #[must_use]
    pub fn new(incident_type: IncidentType) -> Self {
        Self {
            id: OperationId::new(),
            incident_type,
            affected_tables: Vec::new(),
            records_lost: 0,
            downtime_ms: 0,
            description: None,
            detected_at: Utc::now(),
        }
    }

    /// Sets the affected tables.
    #[must_use]
    pub fn with_tables<I, T>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.affected_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the number of lost records.
    #[must_use]
    pub const fn with_records_lost(mut self, records_lost: u64) -> Self {
        self.records_lost = records_lost;
        self
    }

    /// Sets the downtime in milliseconds.
    #[must_use]
    pub const fn with_downtime_ms(mut self, downtime_ms: u64) -> Self {
        self.downtime_ms = downtime_ms;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Severity level derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityLevel {
    /// Score below the medium threshold.
    Low,
    /// Score at or above the medium threshold.
    Medium,
    /// Score at or above the high threshold.
    High,
    /// Score at or above the critical threshold.
    Critical,
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Result of scoring an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    /// Severity level.
    pub level: SeverityLevel,
    /// Additive score.
    pub score: u32,
    /// One line per scoring contribution.
    pub reasoning: Vec<String>,
}

/// A playbook step as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookStepSpec {
    /// Human-readable step text; automated actions are resolved from it.
    pub step: String,
    /// A failing critical step stops the playbook.
    #[serde(default)]
    pub critical: bool,
}

impl PlaybookStepSpec {
    /// Creates a non-critical step.
    #[must_use]
    pub fn new(step: &str) -> Self {
        Self {
            step: step.to_string(),
            critical: false,
        }
    }

    /// Creates a critical step.
    #[must_use]
    pub fn critical(step: &str) -> Self {
        Self {
            step: step.to_string(),
            critical: true,
        }
    }
}

/// Outcome of one executed playbook step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Position in the playbook, starting at 1.
    pub index: usize,
    /// Step text.
    pub step: String,
    /// Resolved action name.
    pub action: String,
    /// Whether the step was critical.
    pub critical: bool,
    /// Whether the step succeeded.
    pub success: bool,
    /// What happened.
    pub detail: String,
    /// Wall time spent on the step.
    pub duration_ms: u64,
}

/// Connectivity and critical-table health of the live store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Whether the store answered a ping.
    pub connected: bool,
    /// Row count per critical table; `None` when the count failed.
    pub table_counts: BTreeMap<String, Option<u64>>,
    /// Problems found.
    pub issues: Vec<String>,
    /// `true` when connected and no issues were found.
    pub healthy: bool,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

/// Terminal state of an incident response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    /// Playbook and post-incident validation both succeeded.
    Resolved,
    /// Either the playbook or the validation failed.
    Failed,
}

/// Whether a response mutates the live store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Restores run for real.
    Live,
    /// Restores run as dry runs; used by `emergency test`.
    Drill,
}

/// Durable record of one incident response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyLog {
    /// The incident.
    pub incident: Incident,
    /// Its assessment.
    pub assessment: Assessment,
    /// Live or drill.
    pub mode: ResponseMode,
    /// Emergency backup taken before the playbook, if it succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_backup: Option<PathBuf>,
    /// Name of the playbook that ran.
    pub playbook: String,
    /// Executed steps, in order.
    pub steps: Vec<StepResult>,
    /// Whether a failing critical step stopped the playbook.
    pub aborted_early: bool,
    /// Post-incident validation.
    pub health: HealthReport,
    /// Terminal status.
    pub status: IncidentStatus,
    /// Response start.
    pub started_at: DateTime<Utc>,
    /// Response end.
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn incident_type_round_trips_through_str() {
        for kind in IncidentType::ALL {
            assert_eq!(kind.as_str().parse::<IncidentType>(), Ok(kind));
        }
    }

    #[test]
    fn incident_serializes_type_field() {
        let incident = Incident::new(IncidentType::DataLoss)
            .with_tables(["ogretmenler"])
            .with_records_lost(1500)
            .with_downtime_ms(400_000);
        let Ok(json) = serde_json::to_value(&incident) else {
            panic!("serialization failed");
        };
        assert_eq!(json["type"], "data-loss");
        assert_eq!(json["records_lost"], 1500);
        assert_eq!(json["affected_tables"][0], "ogretmenler");
    }

    #[test]
    fn severity_levels_are_ordered() {
        assert!(SeverityLevel::Low < SeverityLevel::Medium);
        assert!(SeverityLevel::High < SeverityLevel::Critical);
        assert_eq!(SeverityLevel::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn playbook_step_defaults_to_non_critical() {
        let Ok(step) = serde_json::from_str::<PlaybookStepSpec>(r#"{"step":"Notify stakeholders"}"#)
        else {
            panic!("deserialization failed");
        };
        assert!(!step.critical);
    }
}
