//! Periodic health probe that turns anomalies into incidents.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::MonitorSettings;
use crate::domain::{CatalogQuery, Incident, IncidentType};
use crate::store::DataStore;

/// Compares critical-table counts and connection usage against the
/// previous observation.
#[derive(Debug)]
pub struct HealthMonitor<S> {
    store: Arc<S>,
    critical_tables: Vec<String>,
    settings: MonitorSettings,
    baseline: BTreeMap<String, u64>,
}

impl<S: DataStore> HealthMonitor<S> {
    /// Creates a monitor with an empty baseline; the first check only
    /// records counts.
    #[must_use]
    pub fn new(store: Arc<S>, critical_tables: Vec<String>, settings: MonitorSettings) -> Self {
        Self {
            store,
            critical_tables,
            settings,
            baseline: BTreeMap::new(),
        }
    }

    /// Last observed row count per critical table.
    #[must_use]
    pub fn baseline(&self) -> &BTreeMap<String, u64> {
        &self.baseline
    }

    /// Runs one probe. An unreachable store yields a single hardware
    /// incident; otherwise record drops and connection pressure are
    /// reported independently.
    pub async fn check(&mut self) -> Vec<Incident> {
        if let Err(e) = self.store.ping().await {
            tracing::error!(error = %e, "monitor cannot reach the database");
            return vec![
                Incident::new(IncidentType::HardwareFailure)
                    .with_description(format!("database unreachable: {e}")),
            ];
        }

        let mut incidents = Vec::new();
        if let Some(incident) = self.check_record_drops().await {
            incidents.push(incident);
        }
        if let Some(incident) = self.check_connections().await {
            incidents.push(incident);
        }
        incidents
    }

    async fn check_record_drops(&mut self) -> Option<Incident> {
        let mut dropped = Vec::new();
        let mut records_lost = 0u64;
        for table in &self.critical_tables {
            let current = match self.store.count(table).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "monitor count failed");
                    continue;
                }
            };
            if let Some(&previous) = self.baseline.get(table)
                && previous > 0
                && current < previous
            {
                let lost = previous - current;
                let percent = lost.saturating_mul(100) / previous;
                if percent >= self.settings.record_drop_percent {
                    tracing::warn!(table = %table, previous, current, percent, "record drop detected");
                    dropped.push(table.clone());
                    records_lost = records_lost.saturating_add(lost);
                }
            }
            self.baseline.insert(table.clone(), current);
        }
        if dropped.is_empty() {
            return None;
        }
        let description = format!(
            "row counts dropped by at least {}% in {}",
            self.settings.record_drop_percent,
            dropped.join(", ")
        );
        Some(
            Incident::new(IncidentType::DataLoss)
                .with_tables(dropped)
                .with_records_lost(records_lost)
                .with_description(description),
        )
    }

    async fn check_connections(&self) -> Option<Incident> {
        let rows = match self.store.catalog(CatalogQuery::ActiveConnections).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "monitor cannot read connection statistics");
                return None;
            }
        };
        let row = rows.first()?;
        let active = row.get("connections").and_then(serde_json::Value::as_u64)?;
        let max = row
            .get("max_connections")
            .and_then(serde_json::Value::as_u64)
            .filter(|max| *max > 0)?;
        let percent = active.saturating_mul(100) / max;
        tracing::debug!(active, max, percent, "connection usage");
        (percent >= self.settings.connection_alert_percent).then(|| {
            Incident::new(IncidentType::PerformanceDegradation).with_description(format!(
                "{active} of {max} connections in use ({percent}%)"
            ))
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::service::fixtures;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn monitor(store: &Arc<MemoryStore>) -> HealthMonitor<MemoryStore> {
        HealthMonitor::new(Arc::clone(store), fixtures::critical(), MonitorSettings::default())
    }

    #[tokio::test]
    async fn first_check_records_a_baseline() {
        let store = Arc::new(fixtures::seeded_store());
        let mut monitor = monitor(&store);
        assert!(monitor.check().await.is_empty());
        assert_eq!(monitor.baseline().get("ogrenciler"), Some(&4));
    }

    #[tokio::test]
    async fn record_drop_raises_data_loss() {
        let store = Arc::new(fixtures::seeded_store());
        let mut monitor = monitor(&store);
        monitor.check().await;
        store.set_rows("ogrenciler", fixtures::rows("ogrenciler", 1)).await;

        let incidents = monitor.check().await;
        assert_eq!(incidents.len(), 1);
        let Some(incident) = incidents.first() else {
            panic!("no incident raised");
        };
        assert_eq!(incident.incident_type, IncidentType::DataLoss);
        assert_eq!(incident.affected_tables, vec!["ogrenciler".to_string()]);
        assert_eq!(incident.records_lost, 3);

        // The baseline follows the new count, so the drop is reported once.
        assert!(monitor.check().await.is_empty());
    }

    #[tokio::test]
    async fn small_drop_is_tolerated() {
        let store = Arc::new(
            MemoryStore::new()
                .with_table("alanlar", fixtures::rows("alanlar", 100))
                .with_table("ogrenciler", fixtures::rows("ogrenciler", 100)),
        );
        let mut monitor = monitor(&store);
        monitor.check().await;
        store.set_rows("alanlar", fixtures::rows("alanlar", 95)).await;
        assert!(monitor.check().await.is_empty());
    }

    #[tokio::test]
    async fn offline_store_is_a_hardware_failure() {
        let store = Arc::new(fixtures::seeded_store());
        store.set_offline(true).await;
        let incidents = monitor(&store).check().await;
        assert_eq!(
            incidents.iter().map(|i| i.incident_type).collect::<Vec<_>>(),
            vec![IncidentType::HardwareFailure]
        );
    }

    #[tokio::test]
    async fn connection_pressure_raises_performance_incident() {
        let store = Arc::new(fixtures::seeded_store().with_catalog(
            CatalogQuery::ActiveConnections,
            vec![fixtures::record(json!({ "connections": 90, "max_connections": 100 }))],
        ));
        let incidents = monitor(&store).check().await;
        assert_eq!(
            incidents.iter().map(|i| i.incident_type).collect::<Vec<_>>(),
            vec![IncidentType::PerformanceDegradation]
        );

        store
            .set_catalog(
                CatalogQuery::ActiveConnections,
                vec![fixtures::record(json!({ "connections": 10, "max_connections": 100 }))],
            )
            .await;
        assert!(monitor(&store).check().await.is_empty());
    }
}
