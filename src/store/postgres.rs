//! PostgreSQL implementation of the data store.
//!
//! Rows travel as JSON objects: reads go through `row_to_json` and writes
//! through `json_populate_recordset`, so no per-table Rust types are needed.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{DataStore, StoreError};
use crate::domain::{CatalogQuery, Record};

/// Connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of connections.
    pub max_connections: u32,
    /// Seconds to wait when acquiring a connection.
    pub acquire_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a lazily connecting pool; nothing is dialled until the first
    /// query, so commands that only touch the snapshot store work offline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the URL cannot be parsed.
    pub fn connect_lazy(url: &str, settings: PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .connect_lazy(url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl DataStore for PostgresStore {
    async fn select_all(&self, table: &str) -> Result<Vec<Record>, StoreError> {
        let ident = quote_ident(table)?;
        let values = sqlx::query_scalar::<_, serde_json::Value>(&format!(
            "SELECT row_to_json(t) FROM {ident} t"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx(table, e))?;
        Ok(values.into_iter().filter_map(into_record).collect())
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let ident = quote_ident(table)?;
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {ident}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx(table, e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn delete_all(&self, table: &str) -> Result<u64, StoreError> {
        let ident = quote_ident(table)?;
        let result = sqlx::query(&format!("DELETE FROM {ident}"))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx(table, e))?;
        Ok(result.rows_affected())
    }

    async fn bulk_insert(&self, table: &str, rows: &[Record]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let ident = quote_ident(table)?;
        let payload = serde_json::Value::Array(
            rows.iter()
                .cloned()
                .map(serde_json::Value::Object)
                .collect(),
        );
        let result = sqlx::query(&format!(
            "INSERT INTO {ident} SELECT * FROM json_populate_recordset(NULL::{ident}, $1)"
        ))
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx(table, e))?;
        Ok(result.rows_affected())
    }

    async fn catalog(&self, query: CatalogQuery) -> Result<Vec<Record>, StoreError> {
        let values = sqlx::query_scalar::<_, serde_json::Value>(&format!(
            "SELECT row_to_json(q) FROM ({}) q",
            catalog_sql(query)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(format!("{}: {e}", query.as_str())))?;
        Ok(values.into_iter().filter_map(into_record).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

fn into_record(value: serde_json::Value) -> Option<Record> {
    match value {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

fn map_sqlx(table: &str, error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01") => {
            StoreError::TableNotFound(table.to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(error.to_string())
        }
        _ => StoreError::Query(format!("{table}: {error}")),
    }
}

/// Quotes a table name, optionally schema-qualified, after checking that
/// every part is a plain identifier.
fn quote_ident(name: &str) -> Result<String, StoreError> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(StoreError::InvalidIdentifier(name.to_string()));
    }
    let mut quoted = Vec::with_capacity(parts.len());
    for part in parts {
        let mut chars = part.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::InvalidIdentifier(name.to_string()));
        }
        quoted.push(format!("\"{part}\""));
    }
    Ok(quoted.join("."))
}

fn catalog_sql(query: CatalogQuery) -> &'static str {
    match query {
        CatalogQuery::Functions => {
            "SELECT n.nspname AS schema, p.proname AS name, \
             pg_get_function_identity_arguments(p.oid) AS arguments, \
             pg_get_function_result(p.oid) AS return_type, \
             pg_get_functiondef(p.oid) AS definition \
             FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace \
             WHERE n.nspname = 'public' AND p.prokind = 'f'"
        }
        CatalogQuery::Triggers => {
            "SELECT event_object_schema AS schema, event_object_table AS table_name, \
             trigger_name AS name, event_manipulation AS event, action_timing, action_statement \
             FROM information_schema.triggers WHERE trigger_schema = 'public'"
        }
        CatalogQuery::Policies => {
            "SELECT schemaname AS schema, tablename AS table_name, policyname AS name, \
             cmd AS command, roles::text[] AS roles, qual AS using_expr, with_check \
             FROM pg_policies WHERE schemaname = 'public'"
        }
        CatalogQuery::Types => {
            "SELECT n.nspname AS schema, t.typname AS name, t.typtype::text AS kind, \
             array_agg(e.enumlabel ORDER BY e.enumsortorder) \
             FILTER (WHERE e.enumlabel IS NOT NULL) AS labels \
             FROM pg_type t JOIN pg_namespace n ON n.oid = t.typnamespace \
             LEFT JOIN pg_enum e ON e.enumtypid = t.oid \
             WHERE n.nspname = 'public' AND t.typtype IN ('e', 'd', 'c') \
             AND (t.typtype <> 'c' OR EXISTS (SELECT 1 FROM pg_class c \
             WHERE c.oid = t.typrelid AND c.relkind = 'c')) \
             GROUP BY n.nspname, t.typname, t.typtype"
        }
        CatalogQuery::Views => {
            "SELECT schemaname AS schema, viewname AS name, definition \
             FROM pg_views WHERE schemaname = 'public'"
        }
        CatalogQuery::Sequences => {
            "SELECT sequence_schema AS schema, sequence_name AS name, data_type, \
             start_value, increment FROM information_schema.sequences \
             WHERE sequence_schema = 'public'"
        }
        CatalogQuery::Indexes => {
            "SELECT schemaname AS schema, tablename AS table_name, indexname AS name, \
             indexdef AS definition FROM pg_indexes WHERE schemaname = 'public'"
        }
        CatalogQuery::Constraints => {
            "SELECT n.nspname AS schema, cl.relname AS table_name, c.conname AS name, \
             CASE c.contype WHEN 'p' THEN 'PRIMARY KEY' WHEN 'f' THEN 'FOREIGN KEY' \
             WHEN 'u' THEN 'UNIQUE' WHEN 'c' THEN 'CHECK' WHEN 'x' THEN 'EXCLUDE' \
             ELSE c.contype::text END AS constraint_type, \
             pg_get_constraintdef(c.oid) AS definition \
             FROM pg_constraint c JOIN pg_class cl ON cl.oid = c.conrelid \
             JOIN pg_namespace n ON n.oid = c.connamespace WHERE n.nspname = 'public'"
        }
        CatalogQuery::Extensions => {
            "SELECT extname AS name, extversion AS version FROM pg_extension"
        }
        CatalogQuery::Columns => {
            "SELECT table_name, column_name, data_type, is_nullable, column_default, \
             ordinal_position FROM information_schema.columns \
             WHERE table_schema = 'public' ORDER BY table_name, ordinal_position"
        }
        CatalogQuery::ActiveConnections => {
            "SELECT count(*) AS connections, \
             current_setting('max_connections')::int AS max_connections \
             FROM pg_stat_activity"
        }
    }
}
