//! Command-line surface: argument parsing and handlers.

mod args;
mod commands;

pub use args::{
    BackupCommand, Cli, Command, EmergencyCommand, IncidentArgs, LogFormat, RollbackArgs,
    RollbackCommand, SchemaCommand, SyncCommand, SyncRunArgs,
};
pub use commands::{Output, backup, emergency, rollback, run, schema, sync};
