//! In-memory data store with failure injection.
//!
//! Backs the test suite and offline drills. Tables must be registered before
//! use; unknown tables answer [`StoreError::TableNotFound`] like a real
//! database would.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::RwLock;

use super::{DataStore, StoreError};
use crate::domain::{CatalogQuery, Record};

/// Operation a per-table failure is injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureMode {
    /// `select_all` fails.
    Read,
    /// `count` fails.
    Count,
    /// `delete_all` fails.
    Delete,
    /// `bulk_insert` fails.
    Insert,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, Vec<Record>>,
    catalog: BTreeMap<CatalogQuery, Vec<Record>>,
    failures: HashSet<(String, FailureMode)>,
    failing_catalog: HashSet<CatalogQuery>,
    rejected_values: Vec<(String, String, serde_json::Value)>,
    offline: bool,
    writes: u64,
}

impl Inner {
    fn check(&self, table: &str, mode: FailureMode) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Connection("store offline".to_string()));
        }
        if self.failures.contains(&(table.to_string(), mode)) {
            return Err(StoreError::Query(format!("{table}: injected {mode:?} failure")));
        }
        if !self.tables.contains_key(table) {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        Ok(())
    }

    fn rejects(&self, table: &str, row: &Record) -> bool {
        self.rejected_values
            .iter()
            .any(|(t, field, value)| t == table && row.get(field) == Some(value))
    }
}

/// [`DataStore`] holding every table in memory behind a `tokio` lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates a store with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table with initial rows.
    #[must_use]
    pub fn with_table(mut self, table: &str, rows: Vec<Record>) -> Self {
        self.inner.get_mut().tables.insert(table.to_string(), rows);
        self
    }

    /// Registers empty tables.
    #[must_use]
    pub fn with_empty_tables(mut self, tables: &[&str]) -> Self {
        let inner = self.inner.get_mut();
        for table in tables {
            inner.tables.entry((*table).to_string()).or_default();
        }
        self
    }

    /// Sets the rows returned for a catalog query.
    #[must_use]
    pub fn with_catalog(mut self, query: CatalogQuery, rows: Vec<Record>) -> Self {
        self.inner.get_mut().catalog.insert(query, rows);
        self
    }

    /// Replaces the rows of a table, registering it if needed.
    pub async fn set_rows(&self, table: &str, rows: Vec<Record>) {
        self.inner.write().await.tables.insert(table.to_string(), rows);
    }

    /// Replaces the rows returned for a catalog query.
    pub async fn set_catalog(&self, query: CatalogQuery, rows: Vec<Record>) {
        self.inner.write().await.catalog.insert(query, rows);
    }

    /// Returns a copy of a table's rows, or `None` if it is not registered.
    pub async fn rows(&self, table: &str) -> Option<Vec<Record>> {
        self.inner.read().await.tables.get(table).cloned()
    }

    /// Makes an operation on a table fail until [`MemoryStore::heal`].
    pub async fn fail(&self, table: &str, mode: FailureMode) {
        self.inner
            .write()
            .await
            .failures
            .insert((table.to_string(), mode));
    }

    /// Makes a catalog query fail.
    pub async fn fail_catalog(&self, query: CatalogQuery) {
        self.inner.write().await.failing_catalog.insert(query);
    }

    /// Makes any insert batch into `table` fail when one of its rows has
    /// `field == value`, like a constraint violation.
    pub async fn reject_inserts_where(&self, table: &str, field: &str, value: serde_json::Value) {
        self.inner
            .write()
            .await
            .rejected_values
            .push((table.to_string(), field.to_string(), value));
    }

    /// Clears every injected failure.
    pub async fn heal(&self) {
        let mut inner = self.inner.write().await;
        inner.failures.clear();
        inner.failing_catalog.clear();
        inner.rejected_values.clear();
        inner.offline = false;
    }

    /// Simulates losing or regaining the connection.
    pub async fn set_offline(&self, offline: bool) {
        self.inner.write().await.offline = offline;
    }

    /// Number of `delete_all` and `bulk_insert` calls received, failed or not.
    pub async fn write_count(&self) -> u64 {
        self.inner.read().await.writes
    }
}

impl DataStore for MemoryStore {
    async fn select_all(&self, table: &str) -> Result<Vec<Record>, StoreError> {
        let inner = self.inner.read().await;
        inner.check(table, FailureMode::Read)?;
        Ok(inner.tables.get(table).cloned().unwrap_or_default())
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        inner.check(table, FailureMode::Count)?;
        Ok(inner.tables.get(table).map_or(0, |rows| rows.len() as u64))
    }

    async fn delete_all(&self, table: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        inner.writes += 1;
        inner.check(table, FailureMode::Delete)?;
        let deleted = inner
            .tables
            .get_mut(table)
            .map_or(0, |rows| std::mem::take(rows).len() as u64);
        Ok(deleted)
    }

    async fn bulk_insert(&self, table: &str, rows: &[Record]) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        inner.writes += 1;
        inner.check(table, FailureMode::Insert)?;
        if rows.iter().any(|row| inner.rejects(table, row)) {
            return Err(StoreError::Query(format!(
                "{table}: insert violates a constraint"
            )));
        }
        let Some(existing) = inner.tables.get_mut(table) else {
            return Err(StoreError::TableNotFound(table.to_string()));
        };
        existing.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn catalog(&self, query: CatalogQuery) -> Result<Vec<Record>, StoreError> {
        let inner = self.inner.read().await;
        if inner.offline {
            return Err(StoreError::Connection("store offline".to_string()));
        }
        if inner.failing_catalog.contains(&query) {
            return Err(StoreError::Query(format!(
                "{}: injected catalog failure",
                query.as_str()
            )));
        }
        Ok(inner.catalog.get(&query).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.inner.read().await.offline {
            return Err(StoreError::Connection("store offline".to_string()));
        }
        Ok(())
    }
}
