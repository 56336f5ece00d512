//! Command handlers.
//!
//! Every handler returns `Ok(true)` when the operation succeeded and
//! `Ok(false)` when it ran but failed (invalid backup, refused sync, failed
//! playbook). Errors are reserved for problems that stop the command from
//! running at all.

use std::fmt::Write as _;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;

use super::args::{
    BackupCommand, Cli, Command, EmergencyCommand, IncidentArgs, RollbackArgs, RollbackCommand,
    SchemaCommand, SyncCommand, SyncRunArgs,
};
use crate::app_state::AppState;
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::confirm::{AutoConfirm, ConfirmationPort, PromptConfirm};
use crate::domain::{
    EmergencyLog, IncidentStatus, ResponseMode, RollbackLog, SyncJob, Tier,
};
use crate::service::{
    BackupResult, RollbackOptions, SyncRequest, ValidationReport, cleanup_pre_sync,
    list_environments, sync_history,
};
use crate::store::{DataStore, PostgresStore};

/// Where results go.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    /// Text output, or pretty JSON when `json` is set.
    #[must_use]
    pub const fn new(json: bool) -> Self {
        Self { json }
    }

    fn show<T, F>(self, value: &T, text: F) -> anyhow::Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&T) -> String,
    {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text(value));
        }
        Ok(())
    }
}

/// Loads configuration, connects and runs the parsed command.
///
/// # Errors
///
/// Returns an error if configuration is missing or invalid, or the command
/// cannot run.
pub async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = Config::from_env().context("loading configuration")?;
    let state = AppState::connect(config).context("setting up the database pool")?;
    let out = Output::new(cli.json);
    match cli.command {
        Command::Backup(cmd) => backup(&state, cmd, out).await,
        Command::Rollback(cmd) => rollback(&state, cmd, out).await,
        Command::Schema(cmd) => schema(&state, cmd, out).await,
        Command::Emergency(cmd) => emergency(&state, cmd, out).await,
        Command::Sync(cmd) => sync(&state, cmd, out).await,
        Command::Daemon => {
            let report = state.daemon().run().await;
            out.show(&report, |r| {
                format!(
                    "daemon stopped: {} backup pass(es), {} check(s), {} incident(s)",
                    r.backup_runs, r.monitor_checks, r.incidents
                )
            })?;
            Ok(true)
        }
    }
}

fn confirmation(yes: bool) -> Box<dyn ConfirmationPort> {
    if yes {
        Box::new(AutoConfirm(true))
    } else {
        Box::new(PromptConfirm)
    }
}

fn interruptible() -> CancellationToken {
    let cancel = CancellationToken::new();
    cancel.cancel_on_ctrl_c();
    cancel
}

// ----- backup -----

/// Runs a `backup` subcommand.
///
/// # Errors
///
/// Returns an error if artifacts cannot be written, listed or read.
pub async fn backup<S: DataStore>(
    state: &AppState<S>,
    cmd: BackupCommand,
    out: Output,
) -> anyhow::Result<bool> {
    let (tier, reason) = match cmd {
        BackupCommand::Daily => (Tier::Daily, None),
        BackupCommand::Weekly => (Tier::Weekly, None),
        BackupCommand::Monthly => (Tier::Monthly, None),
        BackupCommand::Emergency { reason } => (Tier::Emergency, reason),
        BackupCommand::All => {
            let results = state.backups.run_all(Utc::now().date_naive()).await?;
            out.show(&results, |results| {
                results
                    .iter()
                    .map(backup_text)
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            return Ok(results.iter().all(|r| r.validation.valid));
        }
        BackupCommand::List { tier } => {
            let entries = state.backups.list_backups(tier).await?;
            out.show(&entries, |entries| {
                if entries.is_empty() {
                    return "no backups".to_string();
                }
                entries
                    .iter()
                    .map(|e| {
                        format!(
                            "{}  {:<12} {:>10} B  {}",
                            e.created_at.format("%Y-%m-%d %H:%M:%S"),
                            e.tier,
                            e.size_bytes,
                            e.path.display()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            return Ok(true);
        }
        BackupCommand::Validate { file } => {
            let report = state.backups.validate_backup(&file).await?;
            out.show(&report, validation_text)?;
            return Ok(report.valid);
        }
    };
    let result = state.backups.run_backup(tier, reason).await?;
    out.show(&result, backup_text)?;
    Ok(result.validation.valid)
}

fn backup_text(result: &BackupResult) -> String {
    let summary = &result.summary;
    let mut text = format!(
        "{} backup written to {}\n  tables: {}, records: {}, failed tables: {}\n",
        summary.tier,
        result.artifact_path.display(),
        summary.total_tables,
        summary.total_records,
        summary.failed_tables
    );
    if !result.pruned.deleted.is_empty() {
        let _ = writeln!(text, "  pruned {} old artifact(s)", result.pruned.deleted.len());
    }
    text.push_str(&validation_text(&result.validation));
    text
}

fn validation_text(report: &ValidationReport) -> String {
    let mut text = format!(
        "  validation: {} ({} tables, {} records, {} empty)",
        report.verdict(),
        report.stats.total_tables,
        report.stats.total_records,
        report.stats.empty_tables
    );
    for error in &report.errors {
        let _ = write!(text, "\n    error: {error}");
    }
    for warning in &report.warnings {
        let _ = write!(text, "\n    warning: {warning}");
    }
    text
}

// ----- rollback -----

/// Runs a `rollback` subcommand.
///
/// # Errors
///
/// Returns an error if artifacts or logs cannot be listed, read or written.
pub async fn rollback<S: DataStore>(
    state: &AppState<S>,
    cmd: RollbackCommand,
    out: Output,
) -> anyhow::Result<bool> {
    match cmd {
        RollbackCommand::List => {
            let entries = state.rollback.list().await?;
            out.show(&entries, |entries| {
                entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| format!("{:>3}. {}  {}", i + 1, e.tier, e.path.display()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            Ok(true)
        }
        RollbackCommand::Rollback(args) => run_rollback(state, &args, out).await,
        RollbackCommand::History => {
            let history = state.rollback.history().await?;
            let logs: Vec<&RollbackLog> = history.iter().map(|(_, log)| log).collect();
            out.show(&logs, |logs| {
                logs.iter()
                    .map(|log| {
                        format!(
                            "{}  {}  {:?}  {}  {}",
                            log.started_at.format("%Y-%m-%d %H:%M:%S"),
                            log.operation_id.short(),
                            log.mode,
                            if log.overall_success { "ok" } else { "FAILED" },
                            log.source_artifact.display()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            Ok(true)
        }
        RollbackCommand::Cleanup => {
            let pruned = state.rollback.cleanup().await?;
            out.show(&pruned, |p| {
                format!("kept {}, deleted {}", p.kept, p.deleted.len())
            })?;
            Ok(true)
        }
    }
}

async fn run_rollback<S: DataStore>(
    state: &AppState<S>,
    args: &RollbackArgs,
    out: Output,
) -> anyhow::Result<bool> {
    let options = RollbackOptions {
        dry_run: args.dry_run,
        only_tables: args.only.clone(),
        skip_tables: args.skip.clone(),
        skip_safety_backup: args.no_safety_backup,
    };
    let confirm = confirmation(args.yes);
    let outcome = state
        .rollback
        .rollback(&args.file, &options, confirm.as_ref(), &interruptible())
        .await?;
    out.show(&outcome.log, rollback_text)?;
    Ok(outcome.succeeded())
}

fn rollback_text(log: &RollbackLog) -> String {
    let mut text = format!(
        "rollback {} from {}",
        log.operation_id.short(),
        log.source_artifact.display()
    );
    if let Some(path) = &log.pre_rollback_artifact {
        let _ = write!(text, "\n  safety backup: {}", path.display());
    }
    for impact in &log.impact {
        let current = impact
            .current_count
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        let _ = write!(
            text,
            "\n  {:<28} {current:>8} -> {:<8} (+{} / -{})",
            impact.table, impact.backup_count, impact.rows_to_add, impact.rows_to_remove
        );
    }
    for table in &log.processed_tables {
        let status = if table.skipped {
            "skipped"
        } else if table.success {
            "ok"
        } else {
            "FAILED"
        };
        let _ = write!(
            text,
            "\n  {:<28} deleted {:>8}, restored {:>8}  {status}",
            table.table, table.records_deleted, table.records_restored
        );
        if let Some(error) = &table.error {
            let _ = write!(text, ": {error}");
        }
    }
    match &log.abort_reason {
        Some(reason) => {
            let _ = write!(text, "\n  aborted: {reason}");
        }
        None => {
            let verdict = if log.overall_success { "succeeded" } else { "failed" };
            let _ = write!(text, "\n  {verdict}");
        }
    }
    text
}

// ----- schema -----

/// Runs a `schema` subcommand.
///
/// # Errors
///
/// Returns an error for unknown versions, taken labels and I/O failures.
pub async fn schema<S: DataStore>(
    state: &AppState<S>,
    cmd: SchemaCommand,
    out: Output,
) -> anyhow::Result<bool> {
    match cmd {
        SchemaCommand::Capture { label, description } => {
            let saved = state
                .schema
                .capture_version(&label, description.as_deref().unwrap_or_default())
                .await?;
            let counts = saved.schema.object_counts();
            let summary = serde_json::json!({
                "version": saved.version,
                "hash": saved.hash,
                "captured_at": saved.captured_at,
                "counts": counts,
            });
            out.show(&summary, |_| {
                format!(
                    "schema {} saved ({})\n  {} tables, {} columns, {} functions, {} policies, {} indexes",
                    saved.version,
                    saved.hash,
                    counts.tables,
                    counts.columns,
                    counts.functions,
                    counts.policies,
                    counts.indexes
                )
            })?;
        }
        SchemaCommand::List => {
            let versions = state.schema.list_versions().await?;
            out.show(&versions, |versions| {
                versions
                    .iter()
                    .map(|v| {
                        format!(
                            "{} {:<16} {}  {}  {}",
                            if v.current { "*" } else { " " },
                            v.version,
                            v.entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            v.entry.hash.get(..12).unwrap_or(&v.entry.hash),
                            v.entry.description
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        SchemaCommand::Compare { v1, v2 } => {
            let comparison = state.schema.compare_versions(&v1, &v2).await?;
            out.show(&comparison, |c| {
                if c.identical || c.differences.is_empty() {
                    return format!("{} and {} are identical", c.from_version, c.to_version);
                }
                let mut text = format!(
                    "{} difference(s) from {} to {}",
                    c.differences.len(),
                    c.from_version,
                    c.to_version
                );
                for difference in &c.differences {
                    let _ = write!(text, "\n  {difference}");
                }
                text
            })?;
        }
        SchemaCommand::Migrate { from, to, out: path } => {
            let sql = state.schema.generate_migration_sql(&from, &to).await?;
            match path {
                Some(path) => {
                    tokio::fs::write(&path, &sql)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    let written = serde_json::json!({ "from": from, "to": to, "path": path });
                    out.show(&written, |_| format!("migration written to {}", path.display()))?;
                }
                None => {
                    let script = serde_json::json!({ "from": from, "to": to, "sql": sql });
                    out.show(&script, |_| sql.clone())?;
                }
            }
        }
        SchemaCommand::Changelog => {
            let entries = state.schema.changelog().await?;
            out.show(&entries, |entries| {
                if entries.is_empty() {
                    return "fewer than two versions saved".to_string();
                }
                let mut text = String::new();
                for entry in entries {
                    let _ = writeln!(
                        text,
                        "{} -> {} ({}): {}",
                        entry.from_version,
                        entry.to_version,
                        entry.timestamp.format("%Y-%m-%d"),
                        entry.description
                    );
                    for difference in &entry.differences {
                        let _ = writeln!(text, "  {difference}");
                    }
                }
                text.trim_end().to_string()
            })?;
        }
    }
    Ok(true)
}

// ----- emergency -----

/// Runs an `emergency` subcommand.
///
/// # Errors
///
/// Returns an error if the incident log cannot be written or logs cannot
/// be listed.
pub async fn emergency<S: DataStore>(
    state: &AppState<S>,
    cmd: EmergencyCommand,
    out: Output,
) -> anyhow::Result<bool> {
    match cmd {
        EmergencyCommand::Test(incident) => {
            respond(state, &incident, ResponseMode::Drill, &AutoConfirm(true), out).await
        }
        EmergencyCommand::Respond { incident, yes } => {
            let confirm = confirmation(yes);
            respond(state, &incident, ResponseMode::Live, confirm.as_ref(), out).await
        }
        EmergencyCommand::Assess(incident) => {
            let assessment = state.emergency.assess(&incident.to_incident());
            out.show(&assessment, |a| {
                format!("{} (score {})\n  {}", a.level, a.score, a.reasoning.join("\n  "))
            })?;
            Ok(true)
        }
        EmergencyCommand::History => {
            let history = state.emergency.history().await?;
            let logs: Vec<&EmergencyLog> = history.iter().map(|(_, log)| log).collect();
            out.show(&logs, |logs| {
                logs.iter()
                    .map(|log| {
                        format!(
                            "{}  {}  {:<24} {:<8} {:?} {:?}",
                            log.started_at.format("%Y-%m-%d %H:%M:%S"),
                            log.incident.id.short(),
                            log.incident.incident_type,
                            log.assessment.level,
                            log.mode,
                            log.status
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            Ok(true)
        }
        EmergencyCommand::Status => {
            let status = state.emergency.status().await?;
            out.show(&status, |s| {
                let mut text = format!(
                    "database: {}, healthy: {}",
                    if s.health.connected { "reachable" } else { "UNREACHABLE" },
                    s.health.healthy
                );
                for (table, count) in &s.health.table_counts {
                    let count = count.map_or_else(|| "?".to_string(), |n| n.to_string());
                    let _ = write!(text, "\n  {table:<28} {count:>8}");
                }
                for issue in &s.health.issues {
                    let _ = write!(text, "\n  issue: {issue}");
                }
                if let Some(last) = &s.last_incident {
                    let _ = write!(
                        text,
                        "\nlast incident: {} {} ({:?})",
                        last.incident.id.short(),
                        last.incident.incident_type,
                        last.status
                    );
                }
                text
            })?;
            Ok(status.health.healthy)
        }
    }
}

async fn respond<S: DataStore>(
    state: &AppState<S>,
    incident: &IncidentArgs,
    mode: ResponseMode,
    confirm: &dyn ConfirmationPort,
    out: Output,
) -> anyhow::Result<bool> {
    let outcome = state
        .emergency
        .execute_emergency_response(incident.to_incident(), mode, confirm, &interruptible())
        .await?;
    out.show(&outcome.log, emergency_text)?;
    Ok(outcome.log.status == IncidentStatus::Resolved)
}

fn emergency_text(log: &EmergencyLog) -> String {
    let mut text = format!(
        "{} incident {} ({:?}): {} (score {})",
        log.incident.incident_type,
        log.incident.id.short(),
        log.mode,
        log.assessment.level,
        log.assessment.score
    );
    match &log.emergency_backup {
        Some(path) => {
            let _ = write!(text, "\n  emergency backup: {}", path.display());
        }
        None => text.push_str("\n  emergency backup: FAILED"),
    }
    let _ = write!(text, "\n  playbook: {}", log.playbook);
    for step in &log.steps {
        let _ = write!(
            text,
            "\n  {}. [{}] {} ({}, {} ms): {}",
            step.index,
            if step.success { "ok" } else { "FAILED" },
            step.step,
            step.action,
            step.duration_ms,
            step.detail
        );
    }
    if log.aborted_early {
        text.push_str("\n  playbook stopped early");
    }
    let _ = write!(text, "\n  status: {:?}", log.status);
    for issue in &log.health.issues {
        let _ = write!(text, "\n  issue: {issue}");
    }
    text
}

// ----- sync -----

fn with_run_args(request: SyncRequest, run: &SyncRunArgs) -> SyncRequest {
    SyncRequest {
        force_production: run.force_production,
        only_tables: run.only.clone(),
        skip_tables: run.skip.clone(),
        ..request
    }
}

/// Runs a `sync` subcommand.
///
/// # Errors
///
/// Returns an error for unknown environments, unset environment URLs and
/// I/O failures.
pub async fn sync(
    state: &AppState<PostgresStore>,
    cmd: SyncCommand,
    out: Output,
) -> anyhow::Result<bool> {
    let (request, yes) = match cmd {
        SyncCommand::Sync {
            source,
            target,
            anonymize,
            test_data,
            run,
        } => {
            let request = SyncRequest {
                anonymize,
                with_test_data: test_data,
                ..SyncRequest::new(&source, &target)
            };
            (with_run_args(request, &run), run.yes)
        }
        SyncCommand::RefreshStaging(run) => {
            (with_run_args(SyncRequest::refresh_staging(), &run), run.yes)
        }
        SyncCommand::SetupDev(run) => (with_run_args(SyncRequest::setup_dev(), &run), run.yes),
        SyncCommand::List => {
            let listing =
                list_environments(&state.config.settings.sync, |key| std::env::var(key).ok());
            out.show(&listing, |listing| {
                listing
                    .iter()
                    .map(|e| {
                        format!(
                            "{:<14} {:<28} {}{}{}",
                            e.name,
                            e.spec.url_env,
                            if e.configured { "configured" } else { "not configured" },
                            if e.spec.is_production { ", production" } else { "" },
                            if e.spec.allow_data_loss { ", allows data loss" } else { "" }
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            return Ok(true);
        }
        SyncCommand::History => {
            let history = sync_history(&state.snapshots).await?;
            let jobs: Vec<&SyncJob> = history.iter().map(|(_, job)| job).collect();
            out.show(&jobs, |jobs| {
                jobs.iter()
                    .map(|job| {
                        format!(
                            "{}  {}  {} -> {}  {:?}",
                            job.started_at.format("%Y-%m-%d %H:%M:%S"),
                            job.job_id.short(),
                            job.source_env,
                            job.target_env,
                            job.status
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            return Ok(true);
        }
        SyncCommand::Cleanup => {
            let pruned =
                cleanup_pre_sync(&state.snapshots, &state.config.settings.backup.retention).await?;
            out.show(&pruned, |p| {
                format!("kept {}, deleted {}", p.kept, p.deleted.len())
            })?;
            return Ok(true);
        }
    };

    let engine = state.sync_engine(&request, |key| std::env::var(key).ok())?;
    let confirm = confirmation(yes);
    let outcome = engine
        .sync(&request, confirm.as_ref(), &interruptible())
        .await?;
    out.show(&outcome.job, sync_text)?;
    Ok(outcome.succeeded())
}

fn sync_text(job: &SyncJob) -> String {
    let mut text = format!(
        "sync {} {} -> {}: {:?}",
        job.job_id.short(),
        job.source_env,
        job.target_env,
        job.status
    );
    if let Some(error) = &job.error {
        let _ = write!(text, "\n  {error}");
    }
    for step in &job.steps {
        let state = if step.skipped {
            "skipped"
        } else if step.success {
            "ok"
        } else {
            "FAILED"
        };
        let _ = write!(text, "\n  {:<15} {state:<8} {}", step.kind.to_string(), step.detail);
    }
    for check in job.validation.iter().filter(|v| !v.within_tolerance) {
        let target = check
            .target_count
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        let _ = write!(
            text,
            "\n  {} out of tolerance: source {}, target {target}, tolerance {}",
            check.table, check.source_count, check.tolerance
        );
    }
    text
}
