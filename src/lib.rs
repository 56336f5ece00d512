//! # db-guardian
//!
//! Data-safety tooling for a PostgreSQL-backed application: tiered JSON
//! backups with retention, validated rollbacks, schema versioning with
//! migration scripts, scored incident response and environment sync with
//! anonymization.
//!
//! ## Architecture
//!
//! ```text
//! CLI (cli/)
//!     │
//!     ├── AppState (app_state)
//!     │
//!     ├── BackupScheduler, RollbackEngine, SchemaManager,
//!     │   EmergencyOrchestrator, SyncEngine, Daemon (service/)
//!     │
//!     ├── SnapshotStore: artifacts, logs, schema versions (persistence/)
//!     ├── NotifierSet: console, webhook (notify/)
//!     │
//!     └── DataStore: PostgreSQL or in-memory (store/)
//! ```
//!
//! Every engine is generic over [`store::DataStore`], so the whole flow
//! runs against [`store::MemoryStore`] in tests.

pub mod app_state;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod confirm;
pub mod domain;
pub mod error;
pub mod notify;
pub mod persistence;
pub mod service;
pub mod store;
