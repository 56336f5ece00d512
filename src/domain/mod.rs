//! Domain layer: artifacts, schema snapshots, incidents, sync jobs and the
//! table dependency graph.
//!
//! Everything here is plain data plus pure helpers. I/O lives in
//! [`crate::store`] (the live database) and [`crate::persistence`] (the
//! snapshot store).

pub mod artifact;
pub mod catalog;
pub mod incident;
pub mod notification;
pub mod operation_id;
pub mod rollback_log;
pub mod schema;
pub mod sync_job;
pub mod table_graph;
pub mod tier;

pub use artifact::{ArtifactMetadata, BackupArtifact, BackupSummary, SchemaObjects, TableSnapshot};
pub use catalog::CatalogQuery;
pub use incident::{
    Assessment, EmergencyLog, HealthReport, Incident, IncidentStatus, IncidentType,
    PlaybookStepSpec, ResponseMode, SeverityLevel, StepResult,
};
pub use notification::Notification;
pub use operation_id::OperationId;
pub use rollback_log::{AbortReason, RollbackLog, RollbackMode, TableImpact, TableRestoreResult};
pub use schema::{SchemaSnapshot, SchemaVersion, SchemaVersionIndex, VersionEntry};
pub use sync_job::{
    AnonymizationRule, AnonymizationRules, EnvironmentSpec, SyncJob, SyncStatus, SyncStep,
    SyncStepKind, TableSyncResult, TableValidation, TestDataTemplate,
};
pub use table_graph::{TableGraph, TableSpec};
pub use tier::Tier;

/// One table row as a JSON object keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;
