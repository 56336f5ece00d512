//! Wiring of the engines shared by every command.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::domain::TableGraph;
use crate::error::GuardianError;
use crate::notify::NotifierSet;
use crate::persistence::SnapshotStore;
use crate::service::{
    BackupScheduler, Daemon, EmergencyOrchestrator, HealthMonitor, RollbackEngine, SchemaManager,
    SyncEngine, SyncRequest,
};
use crate::store::{DataStore, PostgresStore};

/// Engines built over one live store and one snapshot store.
#[derive(Debug)]
pub struct AppState<S> {
    /// Loaded configuration.
    pub config: Config,
    /// Live store.
    pub store: Arc<S>,
    /// Snapshot store rooted at `config.backup_dir`.
    pub snapshots: Arc<SnapshotStore>,
    /// Declared table dependencies.
    pub graph: Arc<TableGraph>,
    /// Configured notification sinks.
    pub notifier: NotifierSet,
    /// Backup capture, retention and validation.
    pub backups: Arc<BackupScheduler<S>>,
    /// Restores from artifacts.
    pub rollback: Arc<RollbackEngine<S>>,
    /// Schema versions and diffs.
    pub schema: Arc<SchemaManager<S>>,
    /// Incident response.
    pub emergency: Arc<EmergencyOrchestrator<S>>,
}

impl<S: DataStore> AppState<S> {
    /// Builds every engine over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Config`] if the table graph is invalid or a
    /// notification sink cannot be built.
    pub fn build(config: Config, store: Arc<S>) -> Result<Self, GuardianError> {
        let graph = Arc::new(config.table_graph()?);
        let notifier = NotifierSet::from_settings(&config.settings.notifications)?;
        let snapshots = Arc::new(SnapshotStore::new(config.backup_dir.clone()));

        let backups = Arc::new(BackupScheduler::new(
            Arc::clone(&store),
            Arc::clone(&snapshots),
            Arc::clone(&graph),
            config.settings.backup.clone(),
            notifier.clone(),
        ));
        let rollback = Arc::new(RollbackEngine::new(
            Arc::clone(&store),
            Arc::clone(&snapshots),
            Arc::clone(&graph),
            Arc::clone(&backups),
            config.settings.rollback,
            notifier.clone(),
        ));
        let schema = Arc::new(SchemaManager::new(Arc::clone(&store), Arc::clone(&snapshots)));
        let emergency = Arc::new(EmergencyOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&snapshots),
            Arc::clone(&backups),
            Arc::clone(&rollback),
            Arc::clone(&schema),
            config.settings.emergency.clone(),
            notifier.clone(),
        ));

        Ok(Self {
            config,
            store,
            snapshots,
            graph,
            notifier,
            backups,
            rollback,
            schema,
            emergency,
        })
    }

    /// Monitor over the critical tables.
    #[must_use]
    pub fn monitor(&self) -> HealthMonitor<S> {
        HealthMonitor::new(
            Arc::clone(&self.store),
            self.config.settings.backup.critical_tables.clone(),
            self.config.settings.emergency.monitoring,
        )
    }

    /// Daemon driving scheduled backups and the monitor.
    #[must_use]
    pub fn daemon(&self) -> Daemon<S> {
        Daemon::new(
            Arc::clone(&self.backups),
            self.monitor(),
            self.notifier.clone(),
            Duration::from_secs(self.config.settings.backup.interval_secs),
            Duration::from_secs(self.config.settings.emergency.monitoring.interval_secs),
        )
    }
}

impl AppState<PostgresStore> {
    /// Builds the state over a lazily connecting PostgreSQL pool.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Store`] for an unusable URL and the errors
    /// of [`AppState::build`].
    pub fn connect(config: Config) -> Result<Self, GuardianError> {
        let store = PostgresStore::connect_lazy(&config.database_url, config.pool)?;
        Self::build(config, Arc::new(store))
    }

    /// Connects to the environments named in `request`, resolving their
    /// URL variables with `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::UnknownEnvironment`] for an unconfigured
    /// environment, [`GuardianError::Config`] if its URL variable is unset
    /// and [`GuardianError::Store`] for an unusable URL.
    pub fn sync_engine<F>(
        &self,
        request: &SyncRequest,
        lookup: F,
    ) -> Result<SyncEngine<PostgresStore, PostgresStore>, GuardianError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connect = |name: &str| -> Result<Arc<PostgresStore>, GuardianError> {
            let spec = self.config.environment(name)?;
            let url = lookup(&spec.url_env)
                .filter(|url| !url.trim().is_empty())
                .ok_or_else(|| {
                    GuardianError::Config(format!("{} is not set for {name}", spec.url_env))
                })?;
            Ok(Arc::new(PostgresStore::connect_lazy(&url, self.config.pool)?))
        };
        let source = connect(&request.source_env)?;
        let target = connect(&request.target_env)?;
        let target_backups = Arc::new(BackupScheduler::new(
            Arc::clone(&target),
            Arc::clone(&self.snapshots),
            Arc::clone(&self.graph),
            self.config.settings.backup.clone(),
            NotifierSet::empty(),
        ));
        Ok(SyncEngine::new(
            source,
            target,
            target_backups,
            Arc::clone(&self.snapshots),
            Arc::clone(&self.graph),
            self.config.settings.sync.clone(),
            self.notifier.clone(),
        ))
    }
}
