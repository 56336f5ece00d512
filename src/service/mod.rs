//! Service layer: the engines behind every command.
//!
//! [`BackupScheduler`] captures and prunes artifacts, [`RollbackEngine`]
//! restores them, [`SchemaManager`] versions the schema,
//! [`EmergencyOrchestrator`] runs incident playbooks and [`SyncEngine`]
//! copies data between environments. All of them are generic over
//! [`crate::store::DataStore`].

pub mod anonymizer;
pub mod backup_scheduler;
pub mod daemon;
pub mod emergency;
pub mod monitor;
pub mod playbook;
pub mod rollback_engine;
pub mod schema_diff;
pub mod schema_manager;
pub mod severity;
pub mod sync_engine;
pub mod validation;

#[cfg(test)]
pub(crate) mod fixtures;

pub use anonymizer::Anonymizer;
pub use backup_scheduler::{BackupResult, BackupScheduler};
pub use daemon::{Daemon, DaemonReport};
pub use emergency::{EmergencyOrchestrator, EmergencyOutcome, EmergencyStatus};
pub use monitor::HealthMonitor;
pub use playbook::{PlaybookAction, fallback_playbook, resolve_action};
pub use rollback_engine::{RollbackEngine, RollbackOptions, RollbackOutcome};
pub use schema_diff::{DifferenceKind, SchemaDifference, diff_schemas, migration_sql};
pub use schema_manager::{
    ChangelogEntry, SchemaComparison, SchemaManager, VersionListing, generate_schema_hash,
};
pub use severity::assess_emergency_level;
pub use sync_engine::{
    EnvironmentListing, SyncEngine, SyncOutcome, SyncRequest, cleanup_pre_sync,
    list_environments, sync_history,
};
pub use validation::{ValidationReport, ValidationStats, validate_artifact};
