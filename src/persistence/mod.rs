//! Persistence layer: the filesystem snapshot store.
//!
//! Holds backup artifacts and their summaries per tier, operation logs and
//! schema versions. Every document is JSON and is never rewritten once
//! written; only tier retention deletes artifacts.

pub mod models;
pub mod snapshot_store;

pub use models::{ArtifactEntry, LogKind, PruneSummary};
pub use snapshot_store::{SnapshotStore, summary_path, validate_label};
