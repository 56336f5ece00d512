//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::{Incident, IncidentType, Tier};

/// Backups, rollbacks, schema versions, incident response and environment
/// sync for a PostgreSQL database.
#[derive(Parser, Debug)]
#[command(name = "db-guardian")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Log line format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Take, list and validate backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Restore tables from a backup
    #[command(subcommand)]
    Rollback(RollbackCommand),

    /// Version and compare the database schema
    #[command(subcommand)]
    Schema(SchemaCommand),

    /// Respond to incidents
    #[command(subcommand)]
    Emergency(EmergencyCommand),

    /// Copy data between environments
    #[command(subcommand)]
    Sync(SyncCommand),

    /// Run scheduled backups and the health monitor until interrupted
    Daemon,
}

/// `backup` subcommands.
#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Take a daily backup
    Daily,
    /// Take a weekly backup
    Weekly,
    /// Take a monthly backup
    Monthly,
    /// Take an emergency backup
    Emergency {
        /// Why the backup is taken
        #[arg(long)]
        reason: Option<String>,
    },
    /// Take every backup due today
    All,
    /// List backups, newest first
    List {
        /// Only this tier (daily, weekly, monthly, emergency, pre-rollback, pre-sync)
        #[arg(long)]
        tier: Option<Tier>,
    },
    /// Validate a backup file
    Validate {
        /// Backup file
        file: PathBuf,
    },
}

/// `rollback` subcommands.
#[derive(Subcommand, Debug)]
pub enum RollbackCommand {
    /// List backups available to roll back to
    List,
    /// Restore from a backup file
    Rollback(RollbackArgs),
    /// Show past rollbacks
    History,
    /// Apply retention to pre-rollback snapshots
    Cleanup,
}

/// Arguments of `rollback rollback`.
#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Backup file to restore from
    pub file: PathBuf,

    /// Only report what would change
    #[arg(long)]
    pub dry_run: bool,

    /// Restore only these tables
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Leave these tables untouched
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Skip the pre-rollback safety backup
    #[arg(long)]
    pub no_safety_backup: bool,
}

/// `schema` subcommands.
#[derive(Subcommand, Debug)]
pub enum SchemaCommand {
    /// Capture the live schema as a new version
    Capture {
        /// Version label
        #[arg(value_name = "VERSION")]
        label: String,
        /// What changed
        description: Option<String>,
    },
    /// List saved versions
    List,
    /// Compare two versions
    Compare {
        /// Older version
        v1: String,
        /// Newer version
        v2: String,
    },
    /// Write the migration script between two versions
    Migrate {
        /// Version migrated from
        from: String,
        /// Version migrated to
        to: String,
        /// Write the script here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show the differences between consecutive versions
    Changelog,
}

/// Description of an incident on the command line.
#[derive(Args, Debug)]
pub struct IncidentArgs {
    /// Incident type (corruption, data-loss, security-breach, hardware-failure, performance-degradation)
    #[arg(long = "type", default_value = "data-loss")]
    pub incident_type: IncidentType,

    /// Affected tables
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,

    /// Number of lost records
    #[arg(long, default_value_t = 0)]
    pub records_lost: u64,

    /// Downtime so far in milliseconds
    #[arg(long, default_value_t = 0)]
    pub downtime_ms: u64,

    /// Free-text description
    #[arg(long)]
    pub description: Option<String>,
}

impl IncidentArgs {
    /// Builds the incident.
    #[must_use]
    pub fn to_incident(&self) -> Incident {
        let incident = Incident::new(self.incident_type)
            .with_tables(self.tables.iter().cloned())
            .with_records_lost(self.records_lost)
            .with_downtime_ms(self.downtime_ms);
        match &self.description {
            Some(description) => incident.with_description(description.as_str()),
            None => incident,
        }
    }
}

/// `emergency` subcommands.
#[derive(Subcommand, Debug)]
pub enum EmergencyCommand {
    /// Run a drill: restores are simulated and manual steps auto-acknowledged
    Test(IncidentArgs),
    /// Respond to a live incident
    Respond {
        /// The incident
        #[command(flatten)]
        incident: IncidentArgs,

        /// Confirm manual steps and restores without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Score an incident without acting on it
    Assess(IncidentArgs),
    /// Show past incidents
    History,
    /// Show current health and the last incident
    Status,
}

/// Arguments shared by every sync run.
#[derive(Args, Debug, Clone, Default)]
pub struct SyncRunArgs {
    /// Allow overwriting a production environment
    #[arg(long)]
    pub force_production: bool,

    /// Sync only these tables
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Leave these tables untouched
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// `sync` subcommands.
#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    /// Copy one environment into another
    Sync {
        /// Source environment
        source: String,
        /// Target environment
        target: String,
        /// Apply anonymization rules
        #[arg(long)]
        anonymize: bool,
        /// Insert synthetic test data afterwards
        #[arg(long)]
        test_data: bool,
        /// Shared options
        #[command(flatten)]
        run: SyncRunArgs,
    },
    /// List configured environments
    List,
    /// Show past sync jobs
    History,
    /// Production to staging, anonymized
    RefreshStaging(SyncRunArgs),
    /// Production to development, anonymized, with test data
    SetupDev(SyncRunArgs),
    /// Apply retention to pre-sync snapshots
    Cleanup,
}
