//! Live data store capability.
//!
//! The engines never talk SQL directly; they go through [`DataStore`].
//! [`PostgresStore`] is the production implementation and [`MemoryStore`]
//! an in-memory double with failure injection.

pub mod memory;
pub mod postgres;

use std::future::Future;

pub use memory::{FailureMode, MemoryStore};
pub use postgres::{PoolSettings, PostgresStore};

use crate::domain::{CatalogQuery, Record};

/// Failures reported by a [`DataStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A table name is not a safe SQL identifier.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The store could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A statement failed.
    #[error("query failed: {0}")]
    Query(String),
}

/// Relational, catalog-queryable store the engines operate on.
///
/// Every method is a single round trip; none of them wraps a transaction
/// around more than one table.
pub trait DataStore: Send + Sync {
    /// Reads every row of a table.
    fn select_all(&self, table: &str)
    -> impl Future<Output = Result<Vec<Record>, StoreError>> + Send;

    /// Counts the rows of a table.
    fn count(&self, table: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Deletes every row of a table, returning the number deleted.
    fn delete_all(&self, table: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Inserts rows into a table, returning the number inserted.
    fn bulk_insert(
        &self,
        table: &str,
        rows: &[Record],
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Runs a catalog introspection query.
    fn catalog(
        &self,
        query: CatalogQuery,
    ) -> impl Future<Output = Result<Vec<Record>, StoreError>> + Send;

    /// Checks connectivity.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
