//! Mapping of free-text playbook steps to automated actions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Playbook;
use crate::domain::PlaybookStepSpec;

/// What the orchestrator does for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookAction {
    /// Restore the affected tables from the newest scheduled backup.
    RestoreLatestBackup,
    /// Count critical tables and validate the newest scheduled backup.
    VerifyIntegrity,
    /// Record connection statistics.
    CollectDiagnostics,
    /// Ping the store.
    CheckConnectivity,
    /// Capture and save the live schema.
    CaptureSchema,
    /// Send an alert to every notifier.
    Notify,
    /// Ask an operator to confirm the step was carried out.
    Manual,
}

impl PlaybookAction {
    /// Returns the action name recorded in step results.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RestoreLatestBackup => "restore_latest_backup",
            Self::VerifyIntegrity => "verify_integrity",
            Self::CollectDiagnostics => "collect_diagnostics",
            Self::CheckConnectivity => "check_connectivity",
            Self::CaptureSchema => "capture_schema",
            Self::Notify => "notify",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for PlaybookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// First match wins, so "restore" beats "schema" in "Restore schema ...".
const KEYWORDS: [(&str, PlaybookAction); 7] = [
    ("restore", PlaybookAction::RestoreLatestBackup),
    ("integrity", PlaybookAction::VerifyIntegrity),
    ("diagnostic", PlaybookAction::CollectDiagnostics),
    ("connectivity", PlaybookAction::CheckConnectivity),
    ("connection", PlaybookAction::CheckConnectivity),
    ("schema", PlaybookAction::CaptureSchema),
    ("notify", PlaybookAction::Notify),
];

/// Resolves a step's text to an action by keyword; unknown steps are
/// [`PlaybookAction::Manual`].
#[must_use]
pub fn resolve_action(step: &str) -> PlaybookAction {
    let lower = step.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map_or(PlaybookAction::Manual, |(_, action)| *action)
}

/// Playbook used when none is configured for an incident type.
#[must_use]
pub fn fallback_playbook() -> Playbook {
    Playbook {
        name: "Generic Response".to_string(),
        steps: vec![
            PlaybookStepSpec::critical("Check database connectivity"),
            PlaybookStepSpec::new("Verify data integrity"),
            PlaybookStepSpec::new("Collect diagnostics"),
            PlaybookStepSpec::new("Notify stakeholders"),
        ],
    }
}
