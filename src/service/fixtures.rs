//! Shared builders for service tests.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::config::BackupSettings;
use crate::domain::{Record, TableGraph, TableSpec};
use crate::persistence::SnapshotStore;
use crate::store::MemoryStore;

pub(crate) fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

pub(crate) fn rows(table: &str, n: usize) -> Vec<Record> {
    (1..=n)
        .map(|id| record(json!({ "id": id, "ad": format!("{table}-{id}") })))
        .collect()
}

pub(crate) fn graph() -> Arc<TableGraph> {
    let specs = vec![
        TableSpec::new("alanlar", &[]),
        TableSpec::new("ogretmenler", &["alanlar"]),
        TableSpec::new("ogrenciler", &["alanlar"]),
        TableSpec::new("stajlar", &["ogrenciler", "ogretmenler"]),
    ];
    match TableGraph::new(specs) {
        Ok(graph) => Arc::new(graph),
        Err(e) => unreachable!("fixture graph is valid: {e}"),
    }
}

pub(crate) fn critical() -> Vec<String> {
    vec!["alanlar".to_string(), "ogrenciler".to_string()]
}

pub(crate) fn seeded_store() -> MemoryStore {
    MemoryStore::new()
        .with_table("alanlar", rows("alanlar", 3))
        .with_table("ogretmenler", rows("ogretmenler", 2))
        .with_table("ogrenciler", rows("ogrenciler", 4))
        .with_table("stajlar", rows("stajlar", 2))
}

pub(crate) fn backup_settings() -> BackupSettings {
    BackupSettings {
        critical_tables: critical(),
        ..BackupSettings::default()
    }
}

pub(crate) fn snapshots() -> (tempfile::TempDir, Arc<SnapshotStore>) {
    match tempfile::tempdir() {
        Ok(dir) => {
            let store = Arc::new(SnapshotStore::new(dir.path()));
            (dir, store)
        }
        Err(e) => unreachable!("tempdir: {e}"),
    }
}
