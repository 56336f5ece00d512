//! Catalog introspection categories.
//!
//! The data store answers each [`CatalogQuery`] with a list of JSON rows.
//! How a category maps to SQL is the store's business; the engines only
//! rely on the field names documented on each variant.

use serde::{Deserialize, Serialize};

use super::Record;

/// A category of catalog metadata the engines can ask the data store for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogQuery {
    /// Stored functions: `schema`, `name`, `arguments`, `return_type`, `definition`.
    Functions,
    /// Triggers: `schema`, `table_name`, `name`, `event`, `action_timing`, `action_statement`.
    Triggers,
    /// Row-level security policies: `schema`, `table_name`, `name`, `command`,
    /// `roles`, `using_expr`, `with_check`.
    Policies,
    /// User-defined types: `schema`, `name`, `kind`, `labels`.
    Types,
    /// Views: `schema`, `name`, `definition`.
    Views,
    /// Sequences: `schema`, `name`, `data_type`, `start_value`, `increment`.
    Sequences,
    /// Indexes: `schema`, `table_name`, `name`, `definition`.
    Indexes,
    /// Table constraints: `schema`, `table_name`, `name`, `constraint_type`, `definition`.
    Constraints,
    /// Installed extensions: `name`, `version`.
    Extensions,
    /// Column definitions: `table_name`, `column_name`, `data_type`,
    /// `is_nullable`, `column_default`, `ordinal_position`.
    Columns,
    /// Connection statistics: `connections`, `max_connections`.
    ActiveConnections,
}

impl CatalogQuery {
    /// The schema object categories captured into every backup artifact.
    pub const SCHEMA_OBJECTS: [Self; 9] = [
        Self::Functions,
        Self::Triggers,
        Self::Policies,
        Self::Types,
        Self::Views,
        Self::Sequences,
        Self::Indexes,
        Self::Constraints,
        Self::Extensions,
    ];

    /// Returns the category name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Functions => "functions",
            Self::Triggers => "triggers",
            Self::Policies => "policies",
            Self::Types => "types",
            Self::Views => "views",
            Self::Sequences => "sequences",
            Self::Indexes => "indexes",
            Self::Constraints => "constraints",
            Self::Extensions => "extensions",
            Self::Columns => "columns",
            Self::ActiveConnections => "active_connections",
        }
    }

    /// Fields whose values, joined with `.`, form the qualified name of a row.
    #[must_use]
    pub const fn key_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Functions => &["schema", "name", "arguments"],
            Self::Triggers => &["schema", "table_name", "name", "event"],
            Self::Policies | Self::Indexes | Self::Constraints => {
                &["schema", "table_name", "name"]
            }
            Self::Types | Self::Views | Self::Sequences => &["schema", "name"],
            Self::Extensions => &["name"],
            Self::Columns => &["table_name", "column_name"],
            Self::ActiveConnections => &[],
        }
    }

    /// Builds the qualified name of a catalog row from its key fields.
    ///
    /// Returns `None` when none of the key fields are present.
    #[must_use]
    pub fn qualified_name(&self, row: &Record) -> Option<String> {
        let parts: Vec<String> = self
            .key_fields()
            .iter()
            .filter_map(|field| row.get(*field))
            .filter(|value| !value.is_null())
            .map(|value| match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("."))
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        let serde_json::Value::Object(map) = value else {
            panic!("expected object");
        };
        map
    }

    #[test]
    fn qualified_name_joins_key_fields() {
        let row = record(json!({
            "schema": "public",
            "table_name": "ogrenciler",
            "name": "ogrenciler_select",
            "command": "SELECT"
        }));
        assert_eq!(
            CatalogQuery::Policies.qualified_name(&row).as_deref(),
            Some("public.ogrenciler.ogrenciler_select")
        );
    }

    #[test]
    fn qualified_name_skips_missing_fields() {
        let row = record(json!({ "name": "uuid-ossp", "version": "1.1" }));
        assert_eq!(
            CatalogQuery::Extensions.qualified_name(&row).as_deref(),
            Some("uuid-ossp")
        );
        assert_eq!(CatalogQuery::Views.qualified_name(&row).as_deref(), Some("uuid-ossp"));
        assert!(CatalogQuery::Views.qualified_name(&Record::new()).is_none());
    }

    #[test]
    fn schema_objects_excludes_statistics() {
        assert!(!CatalogQuery::SCHEMA_OBJECTS.contains(&CatalogQuery::ActiveConnections));
        assert!(!CatalogQuery::SCHEMA_OBJECTS.contains(&CatalogQuery::Columns));
    }
}
