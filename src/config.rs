//! Guardian configuration loaded from environment variables and a JSON
//! settings document.
//!
//! Connection details come from the environment (or a `.env` file via
//! `dotenvy`); everything about *what* to protect and *how* lives in the
//! JSON document pointed to by `GUARDIAN_CONFIG`. A missing document means
//! the defaults below. The loaded [`Config`] is immutable; call
//! [`Config::reload`] to get a fresh one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{
    AnonymizationRule, AnonymizationRules, EnvironmentSpec, PlaybookStepSpec, TableGraph,
    TableSpec, TestDataTemplate, Tier,
};
use crate::error::GuardianError;
use crate::store::PoolSettings;

const DEFAULT_CONFIG_PATH: &str = "./guardian.json";

/// Top-level configuration.
///
/// Loaded once at startup via [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string, with `DATABASE_PASSWORD` injected.
    pub database_url: String,

    /// Root of the snapshot store.
    pub backup_dir: PathBuf,

    /// Path of the JSON settings document.
    pub config_path: PathBuf,

    /// Connection pool sizing.
    pub pool: PoolSettings,

    /// Settings from the JSON document.
    pub settings: Settings,
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Config`] if `DATABASE_URL` is missing or the
    /// settings document is unreadable or inconsistent.
    pub fn from_env() -> Result<Self, GuardianError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration using `lookup` in place of the environment.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GuardianError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| GuardianError::Config("DATABASE_URL is not set".to_string()))?;
        let database_url = match lookup("DATABASE_PASSWORD") {
            Some(password) if !password.is_empty() => inject_password(&raw_url, &password),
            _ => raw_url,
        };

        let config_path =
            PathBuf::from(lookup("GUARDIAN_CONFIG").unwrap_or_else(|| DEFAULT_CONFIG_PATH.into()));
        let settings = Settings::load(&config_path)?;

        let backup_dir = lookup("GUARDIAN_BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| settings.backup.directory.clone());

        let pool = PoolSettings {
            max_connections: parse_env(&lookup, "DATABASE_MAX_CONNECTIONS", 5),
            acquire_timeout_secs: parse_env(&lookup, "DATABASE_CONNECT_TIMEOUT_SECS", 10),
        };

        Ok(Self {
            database_url,
            backup_dir,
            config_path,
            pool,
            settings,
        })
    }

    /// Re-reads the settings document, keeping the environment-derived
    /// values.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Config`] if the document is unreadable or
    /// inconsistent.
    pub fn reload(&self) -> Result<Self, GuardianError> {
        let settings = Settings::load(&self.config_path)?;
        Ok(Self {
            settings,
            ..self.clone()
        })
    }

    /// Builds the table dependency graph.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Config`] on an invalid graph.
    pub fn table_graph(&self) -> Result<TableGraph, GuardianError> {
        TableGraph::new(self.settings.tables.clone())
    }

    /// Looks up a configured environment.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::UnknownEnvironment`] if it is not configured.
    pub fn environment(&self, name: &str) -> Result<&EnvironmentSpec, GuardianError> {
        self.settings
            .sync
            .environments
            .get(name)
            .ok_or_else(|| GuardianError::UnknownEnvironment(name.to_string()))
    }
}

/// Settings document. Every section falls back to its defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backup scheduling and retention.
    pub backup: BackupSettings,
    /// Declared table dependency graph, parents before children.
    pub tables: Vec<TableSpec>,
    /// Rollback tuning.
    pub rollback: RollbackSettings,
    /// Incident response.
    pub emergency: EmergencySettings,
    /// Environment sync.
    pub sync: SyncSettings,
    /// Notification sinks.
    pub notifications: NotificationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backup: BackupSettings::default(),
            tables: default_tables(),
            rollback: RollbackSettings::default(),
            emergency: EmergencySettings::default(),
            sync: SyncSettings::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

impl Settings {
    /// Reads the document at `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Config`] if the file cannot be read or
    /// parsed, or fails [`Settings::validate`].
    pub fn load(path: &Path) -> Result<Self, GuardianError> {
        let settings = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                GuardianError::Config(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings document, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(GuardianError::Config(format!("{}: {e}", path.display())));
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), GuardianError> {
        let graph = TableGraph::new(self.tables.clone())?;
        if let Some(table) = self
            .backup
            .critical_tables
            .iter()
            .find(|t| !graph.contains(t))
        {
            return Err(GuardianError::Config(format!(
                "critical table `{table}` is not in the dependency graph"
            )));
        }
        if let Some(tier) = Tier::ALL
            .into_iter()
            .find(|t| self.backup.retention.for_tier(*t) == Some(0))
        {
            return Err(GuardianError::Config(format!(
                "retention for {tier} must keep at least one artifact"
            )));
        }
        if self.rollback.batch_size == 0 || self.sync.batch_size == 0 {
            return Err(GuardianError::Config("batch sizes must be positive".into()));
        }
        if self.sync.tolerance_percent > 100 {
            return Err(GuardianError::Config(
                "sync tolerance must be a percentage".into(),
            ));
        }
        if !(1..=7).contains(&self.backup.weekly_weekday)
            || !(1..=28).contains(&self.backup.monthly_day)
        {
            return Err(GuardianError::Config(
                "weekly_weekday must be 1-7 and monthly_day 1-28".into(),
            ));
        }
        Ok(())
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./backups"),
            retention: RetentionPolicy::default(),
            critical_tables: ["alanlar", "ogretmenler", "isletmeler", "ogrenciler", "stajlar"]
                .into_iter()
                .map(String::from)
                .collect(),
            weekly_weekday: 7,
            monthly_day: 1,
            interval_secs: 86_400,
        }
    }
}

/// Backup scheduling and retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Snapshot store root; `GUARDIAN_BACKUP_DIR` overrides it.
    pub directory: PathBuf,
    /// Artifacts kept per tier.
    pub retention: RetentionPolicy,
    /// Tables whose absence or loss invalidates a backup.
    pub critical_tables: Vec<String>,
    /// ISO weekday of the weekly backup (1 = Monday, 7 = Sunday).
    pub weekly_weekday: u32,
    /// Day of month of the monthly backup.
    pub monthly_day: u32,
    /// Seconds between scheduled runs in daemon mode.
    pub interval_secs: u64,
}

/// Number of artifacts kept per tier; `None` never prunes. Emergency
/// artifacts are never pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetentionPolicy {
    /// Daily artifacts kept.
    pub daily: Option<usize>,
    /// Weekly artifacts kept.
    pub weekly: Option<usize>,
    /// Monthly artifacts kept.
    pub monthly: Option<usize>,
    /// Pre-rollback safety snapshots kept.
    pub pre_rollback: Option<usize>,
    /// Pre-sync safety snapshots kept.
    pub pre_sync: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily: Some(7),
            weekly: Some(4),
            monthly: Some(12),
            pre_rollback: Some(10),
            pre_sync: Some(5),
        }
    }
}

impl RetentionPolicy {
    /// Retention count of a tier.
    #[must_use]
    pub const fn for_tier(&self, tier: Tier) -> Option<usize> {
        match tier {
            Tier::Daily => self.daily,
            Tier::Weekly => self.weekly,
            Tier::Monthly => self.monthly,
            Tier::Emergency => None,
            Tier::PreRollback => self.pre_rollback,
            Tier::PreSync => self.pre_sync,
        }
    }
}

/// Rollback tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackSettings {
    /// Rows per `bulk_insert` call.
    pub batch_size: usize,
}

impl Default for RollbackSettings {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// A named sequence of response steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playbook {
    /// Display name.
    pub name: String,
    /// Steps, run in order.
    pub steps: Vec<PlaybookStepSpec>,
}

/// Incident response settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencySettings {
    /// Playbooks keyed by incident type (`data-loss`, ...).
    pub playbooks: BTreeMap<String, Playbook>,
    /// Monitoring loop thresholds.
    pub monitoring: MonitorSettings,
}

impl Default for EmergencySettings {
    fn default() -> Self {
        let playbook = |name: &str, steps: Vec<PlaybookStepSpec>| Playbook {
            name: name.to_string(),
            steps,
        };
        let playbooks = [
            (
                "corruption",
                playbook(
                    "Corruption Recovery",
                    vec![
                        PlaybookStepSpec::critical("Check database connectivity"),
                        PlaybookStepSpec::new("Verify data integrity"),
                        PlaybookStepSpec::critical("Restore affected tables from latest backup"),
                        PlaybookStepSpec::new("Capture schema for forensics"),
                        PlaybookStepSpec::new("Notify stakeholders"),
                    ],
                ),
            ),
            (
                "data-loss",
                playbook(
                    "Data Loss Recovery",
                    vec![
                        PlaybookStepSpec::critical("Check database connectivity"),
                        PlaybookStepSpec::critical("Restore lost data from latest backup"),
                        PlaybookStepSpec::new("Verify data integrity"),
                        PlaybookStepSpec::new("Notify stakeholders"),
                    ],
                ),
            ),
            (
                "security-breach",
                playbook(
                    "Security Breach Response",
                    vec![
                        PlaybookStepSpec::critical("Revoke compromised credentials"),
                        PlaybookStepSpec::new("Collect diagnostics"),
                        PlaybookStepSpec::new("Capture schema snapshot for audit"),
                        PlaybookStepSpec::new("Verify data integrity"),
                        PlaybookStepSpec::new("Notify stakeholders"),
                    ],
                ),
            ),
            (
                "performance-degradation",
                playbook(
                    "Performance Triage",
                    vec![
                        PlaybookStepSpec::new("Collect diagnostics"),
                        PlaybookStepSpec::new("Check database connectivity"),
                        PlaybookStepSpec::new("Review slow queries"),
                        PlaybookStepSpec::new("Notify stakeholders"),
                    ],
                ),
            ),
            (
                "hardware-failure",
                playbook(
                    "Hardware Failure Response",
                    vec![
                        PlaybookStepSpec::critical("Check database connectivity"),
                        PlaybookStepSpec::new("Collect diagnostics"),
                        PlaybookStepSpec::new("Verify data integrity"),
                        PlaybookStepSpec::new("Notify stakeholders"),
                    ],
                ),
            ),
        ]
        .into_iter()
        .map(|(kind, playbook)| (kind.to_string(), playbook))
        .collect();
        Self {
            playbooks,
            monitoring: MonitorSettings::default(),
        }
    }
}

/// Monitoring loop thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Seconds between checks.
    pub interval_secs: u64,
    /// Drop in a critical table's row count, in percent, that raises a
    /// data-loss incident.
    pub record_drop_percent: u64,
    /// Share of `max_connections`, in percent, that raises a
    /// performance incident.
    pub connection_alert_percent: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            record_drop_percent: 10,
            connection_alert_percent: 80,
        }
    }
}

/// Environment sync settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Known environments.
    pub environments: BTreeMap<String, EnvironmentSpec>,
    /// Field rules applied when anonymizing.
    pub anonymization: AnonymizationRules,
    /// Rows per `bulk_insert` call.
    pub batch_size: usize,
    /// Allowed row-count drift in percent.
    pub tolerance_percent: u64,
    /// Synthetic data templates per table.
    pub test_data: BTreeMap<String, TestDataTemplate>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let env = |url_env: &str, is_production: bool, allow_data_loss: bool| EnvironmentSpec {
            url_env: url_env.to_string(),
            is_production,
            allow_data_loss,
        };
        let environments = [
            ("production", env("PRODUCTION_DATABASE_URL", true, false)),
            ("staging", env("STAGING_DATABASE_URL", false, false)),
            ("development", env("DEVELOPMENT_DATABASE_URL", false, true)),
        ]
        .into_iter()
        .map(|(name, spec)| (name.to_string(), spec))
        .collect();

        let randomize = |pattern: &str| AnonymizationRule::Randomize {
            pattern: pattern.to_string(),
        };
        let person_rules = || -> BTreeMap<String, AnonymizationRule> {
            [
                ("tc_no", randomize("###########")),
                ("telefon", randomize("05#########")),
                ("email", randomize("user{id}@example.com")),
            ]
            .into_iter()
            .map(|(field, rule)| (field.to_string(), rule))
            .collect()
        };
        let mut anonymization = AnonymizationRules::new();
        anonymization.insert("ogrenciler".to_string(), person_rules());
        anonymization.insert("ogretmenler".to_string(), person_rules());
        anonymization.insert(
            "admin_kullanicilar".to_string(),
            [
                ("email".to_string(), randomize("admin{id}@example.com")),
                (
                    "password_hash".to_string(),
                    AnonymizationRule::Replace {
                        value: serde_json::Value::Null,
                    },
                ),
            ]
            .into_iter()
            .collect(),
        );

        let mut test_data = BTreeMap::new();
        test_data.insert(
            "isletmeler".to_string(),
            TestDataTemplate {
                count: 5,
                fields: [
                    ("ad", "Test Isletme ###"),
                    ("yetkili_kisi", "Test Yetkili ????"),
                    ("telefon", "0212#######"),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            },
        );

        Self {
            environments,
            anonymization,
            batch_size: 100,
            tolerance_percent: 5,
            test_data,
        }
    }
}

/// Notification sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Log notifications through `tracing`.
    pub console: bool,
    /// POST notifications as JSON to this URL.
    pub webhook_url: Option<String>,
    /// Webhook request timeout.
    pub webhook_timeout_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            console: true,
            webhook_url: None,
            webhook_timeout_secs: 10,
        }
    }
}

/// The school-internship schema this tool ships protecting.
fn default_tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new("egitim_yillari", &[]),
        TableSpec::new("alanlar", &[]),
        TableSpec::new("ogretmenler", &["alanlar"]),
        TableSpec::new("isletmeler", &[]),
        TableSpec::new("isletme_alanlar", &["isletmeler", "alanlar"]),
        TableSpec::new("ogrenciler", &["alanlar"]),
        TableSpec::new(
            "stajlar",
            &["ogrenciler", "isletmeler", "ogretmenler", "egitim_yillari"],
        ),
        TableSpec::new("dekontlar", &["stajlar"]),
        TableSpec::new("belgeler", &["isletmeler"]),
        TableSpec::new("gorev_belgeleri", &["ogretmenler"]),
        TableSpec::new("system_settings", &[]),
        TableSpec::new("admin_kullanicilar", &[]),
    ]
}

/// Inserts a password into a URL whose user info has none.
fn inject_password(url: &str, password: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    match authority.rsplit_once('@') {
        Some((user, host)) if !user.contains(':') => {
            format!("{scheme}://{user}:{password}@{host}{tail}")
        }
        _ => url.to_string(),
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_env<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
