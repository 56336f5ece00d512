//! Structural diff between two schema snapshots and the migration skeleton
//! derived from it.
//!
//! The same diff backs `schema compare`, `schema migrate` and the
//! changelog. A table that exists on one side only yields a single
//! table-level difference; its columns, constraints, policies and indexes
//! are not listed separately.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Write as _;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::SchemaSnapshot;
use crate::domain::schema::{ColumnDef, ConstraintDef, FunctionDef, IndexDef, PolicyDef, TableSchema};

/// Kind of structural difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifferenceKind {
    /// Table dropped.
    TableOnlyInV1,
    /// Table added.
    TableOnlyInV2,
    /// Column dropped.
    ColumnOnlyInV1,
    /// Column added.
    ColumnOnlyInV2,
    /// Column data type changed.
    ColumnTypeChanged,
    /// Column switched between `NULL` and `NOT NULL`.
    ColumnNullabilityChanged,
    /// Column default added, removed or changed.
    ColumnDefaultChanged,
    /// Constraint dropped.
    ConstraintOnlyInV1,
    /// Constraint added.
    ConstraintOnlyInV2,
    /// Constraint type or definition changed.
    ConstraintChanged,
    /// Function dropped.
    FunctionOnlyInV1,
    /// Function added.
    FunctionOnlyInV2,
    /// Function result type or body changed.
    FunctionChanged,
    /// Policy dropped.
    PolicyOnlyInV1,
    /// Policy added.
    PolicyOnlyInV2,
    /// Policy command, roles or expressions changed.
    PolicyChanged,
    /// Index dropped.
    IndexOnlyInV1,
    /// Index added.
    IndexOnlyInV2,
    /// Index definition changed.
    IndexChanged,
}

/// One difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDifference {
    /// What changed.
    #[serde(rename = "type")]
    pub kind: DifferenceKind,
    /// Owning table, absent for functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Column, constraint, function, policy or index name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Old value for changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// New value for changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl SchemaDifference {
    fn new(kind: DifferenceKind, table: Option<&str>, object: Option<&str>) -> Self {
        Self {
            kind,
            table: table.map(ToString::to_string),
            object: object.map(ToString::to_string),
            from: None,
            to: None,
        }
    }

    fn changed(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self.to = Some(to.into());
        self
    }
}

impl fmt::Display for SchemaDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = serde_json::to_value(self.kind)
            .ok()
            .and_then(|v| v.as_str().map(ToString::to_string))
            .unwrap_or_default();
        f.write_str(&kind)?;
        match (&self.table, &self.object) {
            (Some(table), Some(object)) => write!(f, " {table}.{object}")?,
            (Some(name), None) | (None, Some(name)) => write!(f, " {name}")?,
            (None, None) => {}
        }
        if let (Some(from), Some(to)) = (&self.from, &self.to) {
            write!(f, ": {from} -> {to}")?;
        }
        Ok(())
    }
}

/// Computes every difference from `v1` to `v2`, tables first.
#[must_use]
pub fn diff_schemas(v1: &SchemaSnapshot, v2: &SchemaSnapshot) -> Vec<SchemaDifference> {
    let mut out = Vec::new();
    let mut shared = Vec::new();

    for name in union(v1.tables.keys(), v2.tables.keys()) {
        match (v1.tables.get(name), v2.tables.get(name)) {
            (Some(_), None) => out.push(SchemaDifference::new(
                DifferenceKind::TableOnlyInV1,
                Some(name.as_str()),
                None,
            )),
            (None, Some(_)) => out.push(SchemaDifference::new(
                DifferenceKind::TableOnlyInV2,
                Some(name.as_str()),
                None,
            )),
            (Some(a), Some(b)) => {
                diff_table(name, a, b, &mut out);
                shared.push(name);
            }
            (None, None) => {}
        }
    }

    for key in union(v1.functions.keys(), v2.functions.keys()) {
        let kind = match (v1.functions.get(key), v2.functions.get(key)) {
            (Some(_), None) => DifferenceKind::FunctionOnlyInV1,
            (None, Some(_)) => DifferenceKind::FunctionOnlyInV2,
            (Some(a), Some(b)) if a != b => DifferenceKind::FunctionChanged,
            _ => continue,
        };
        out.push(SchemaDifference::new(kind, None, Some(key.as_str())));
    }

    let none = Vec::new();
    for table in &shared {
        diff_named(
            table,
            v1.policies.get(*table).unwrap_or(&none),
            v2.policies.get(*table).unwrap_or(&none),
            |p: &PolicyDef| &p.name,
            [
                DifferenceKind::PolicyOnlyInV1,
                DifferenceKind::PolicyOnlyInV2,
                DifferenceKind::PolicyChanged,
            ],
            &mut out,
        );
    }
    let none = Vec::new();
    for table in &shared {
        diff_named(
            table,
            v1.indexes.get(*table).unwrap_or(&none),
            v2.indexes.get(*table).unwrap_or(&none),
            |i: &IndexDef| &i.name,
            [
                DifferenceKind::IndexOnlyInV1,
                DifferenceKind::IndexOnlyInV2,
                DifferenceKind::IndexChanged,
            ],
            &mut out,
        );
    }

    out
}

fn union<'a>(
    a: impl Iterator<Item = &'a String>,
    b: impl Iterator<Item = &'a String>,
) -> BTreeSet<&'a String> {
    a.chain(b).collect()
}

fn diff_table(name: &str, a: &TableSchema, b: &TableSchema, out: &mut Vec<SchemaDifference>) {
    for column in &a.columns {
        if b.column(&column.name).is_none() {
            out.push(SchemaDifference::new(
                DifferenceKind::ColumnOnlyInV1,
                Some(name),
                Some(column.name.as_str()),
            ));
        }
    }
    for new in &b.columns {
        let Some(old) = a.column(&new.name) else {
            out.push(SchemaDifference::new(
                DifferenceKind::ColumnOnlyInV2,
                Some(name),
                Some(new.name.as_str()),
            ));
            continue;
        };
        let at = |kind| SchemaDifference::new(kind, Some(name), Some(new.name.as_str()));
        if old.data_type != new.data_type {
            out.push(at(DifferenceKind::ColumnTypeChanged).changed(&old.data_type, &new.data_type));
        }
        if old.nullable != new.nullable {
            out.push(
                at(DifferenceKind::ColumnNullabilityChanged)
                    .changed(nullability(old.nullable), nullability(new.nullable)),
            );
        }
        if old.default != new.default {
            out.push(at(DifferenceKind::ColumnDefaultChanged).changed(
                old.default.as_deref().unwrap_or("none"),
                new.default.as_deref().unwrap_or("none"),
            ));
        }
    }
    diff_named(
        name,
        &a.constraints,
        &b.constraints,
        |c: &ConstraintDef| &c.name,
        [
            DifferenceKind::ConstraintOnlyInV1,
            DifferenceKind::ConstraintOnlyInV2,
            DifferenceKind::ConstraintChanged,
        ],
        out,
    );
}

fn diff_named<T: PartialEq>(
    table: &str,
    a: &[T],
    b: &[T],
    name: impl Fn(&T) -> &String,
    [only_v1, only_v2, changed]: [DifferenceKind; 3],
    out: &mut Vec<SchemaDifference>,
) {
    let a: BTreeMap<&String, &T> = a.iter().map(|x| (name(x), x)).collect();
    let b: BTreeMap<&String, &T> = b.iter().map(|x| (name(x), x)).collect();
    for key in union(a.keys().copied(), b.keys().copied()) {
        let kind = match (a.get(key), b.get(key)) {
            (Some(_), None) => only_v1,
            (None, Some(_)) => only_v2,
            (Some(x), Some(y)) if x != y => changed,
            _ => continue,
        };
        out.push(SchemaDifference::new(kind, Some(table), Some(key.as_str())));
    }
}

const fn nullability(nullable: bool) -> &'static str {
    if nullable { "NULL" } else { "NOT NULL" }
}

/// Renders a migration script from `v1` to `v2`.
///
/// Additive statements are emitted as SQL. Anything that drops objects or
/// may rewrite or reject existing rows is emitted commented out under a
/// `REVIEW REQUIRED` marker.
#[must_use]
pub fn migration_sql(
    from_label: &str,
    to_label: &str,
    v1: &SchemaSnapshot,
    v2: &SchemaSnapshot,
) -> String {
    let differences = diff_schemas(v1, v2);
    let mut sql = String::new();
    let _ = writeln!(sql, "-- Migration from {from_label} to {to_label}");
    let _ = writeln!(sql, "-- Generated at {}", Utc::now().to_rfc3339());
    if differences.is_empty() {
        sql.push_str("-- No schema differences.\n");
        return sql;
    }
    let _ = writeln!(sql, "-- {} difference(s)", differences.len());
    sql.push_str("-- Statements marked REVIEW REQUIRED are commented out.\n\nBEGIN;\n\n");

    for difference in &differences {
        let _ = writeln!(sql, "-- {difference}");
        match statement(difference, v2) {
            Statement::Apply(text) => {
                let _ = writeln!(sql, "{text}");
            }
            Statement::Review(text) => {
                sql.push_str("-- REVIEW REQUIRED:\n");
                for line in text.lines() {
                    let _ = writeln!(sql, "-- {line}");
                }
            }
            Statement::Note(text) => {
                let _ = writeln!(sql, "-- {text}");
            }
        }
        sql.push('\n');
    }
    sql.push_str("COMMIT;\n");
    sql
}

enum Statement {
    Apply(String),
    Review(String),
    Note(String),
}

fn statement(d: &SchemaDifference, v2: &SchemaSnapshot) -> Statement {
    let table = d.table.as_deref().unwrap_or_default();
    let object = d.object.as_deref().unwrap_or_default();
    let column_v2 = || v2.tables.get(table).and_then(|t| t.column(object));
    let constraint_v2 = || {
        v2.tables
            .get(table)
            .and_then(|t| t.constraints.iter().find(|c| c.name == object))
    };
    let policy_v2 = || {
        v2.policies
            .get(table)
            .and_then(|ps| ps.iter().find(|p| p.name == object))
    };
    let index_v2 = || {
        v2.indexes
            .get(table)
            .and_then(|is| is.iter().find(|i| i.name == object))
    };

    match d.kind {
        DifferenceKind::TableOnlyInV2 => match v2.tables.get(table) {
            Some(schema) => Statement::Apply(create_table(table, schema, v2)),
            None => Statement::Note(format!("table {table} not found")),
        },
        DifferenceKind::TableOnlyInV1 => Statement::Review(format!("DROP TABLE {table};")),
        DifferenceKind::ColumnOnlyInV2 => match column_v2() {
            Some(c) if !c.nullable && c.default.is_none() => Statement::Review(format!(
                "ALTER TABLE {table} ADD COLUMN {};\n(NOT NULL without a default fails on existing rows)",
                column_sql(c)
            )),
            Some(c) => Statement::Apply(format!("ALTER TABLE {table} ADD COLUMN {};", column_sql(c))),
            None => Statement::Note(format!("column {table}.{object} not found")),
        },
        DifferenceKind::ColumnOnlyInV1 => {
            Statement::Review(format!("ALTER TABLE {table} DROP COLUMN {object};"))
        }
        DifferenceKind::ColumnTypeChanged => Statement::Review(format!(
            "ALTER TABLE {table} ALTER COLUMN {object} TYPE {};",
            d.to.as_deref().unwrap_or_default()
        )),
        DifferenceKind::ColumnNullabilityChanged => match column_v2() {
            Some(c) if c.nullable => Statement::Apply(format!(
                "ALTER TABLE {table} ALTER COLUMN {object} DROP NOT NULL;"
            )),
            _ => Statement::Review(format!(
                "ALTER TABLE {table} ALTER COLUMN {object} SET NOT NULL;"
            )),
        },
        DifferenceKind::ColumnDefaultChanged => match column_v2().and_then(|c| c.default.as_deref()) {
            Some(default) => Statement::Apply(format!(
                "ALTER TABLE {table} ALTER COLUMN {object} SET DEFAULT {default};"
            )),
            None => Statement::Apply(format!(
                "ALTER TABLE {table} ALTER COLUMN {object} DROP DEFAULT;"
            )),
        },
        DifferenceKind::ConstraintOnlyInV2 => match constraint_v2() {
            Some(c) => add_constraint(table, c),
            None => Statement::Note(format!("constraint {object} not found")),
        },
        DifferenceKind::ConstraintOnlyInV1 => {
            Statement::Review(format!("ALTER TABLE {table} DROP CONSTRAINT {object};"))
        }
        DifferenceKind::ConstraintChanged => match constraint_v2() {
            Some(c) => Statement::Review(format!(
                "ALTER TABLE {table} DROP CONSTRAINT {object};\n{}",
                constraint_text(table, c)
            )),
            None => Statement::Note(format!("constraint {object} not found")),
        },
        DifferenceKind::FunctionOnlyInV2 => match v2.functions.get(object) {
            Some(FunctionDef {
                definition: Some(def),
                ..
            }) => Statement::Apply(terminated(def)),
            _ => Statement::Note(format!("function {object} has no captured definition")),
        },
        DifferenceKind::FunctionOnlyInV1 => Statement::Review(format!("DROP FUNCTION {object};")),
        DifferenceKind::FunctionChanged => match v2.functions.get(object) {
            Some(FunctionDef {
                definition: Some(def),
                ..
            }) => Statement::Review(terminated(def)),
            _ => Statement::Note(format!("function {object} has no captured definition")),
        },
        DifferenceKind::PolicyOnlyInV2 => match policy_v2() {
            Some(p) => Statement::Apply(create_policy(table, p)),
            None => Statement::Note(format!("policy {object} not found")),
        },
        DifferenceKind::PolicyOnlyInV1 => {
            Statement::Review(format!("DROP POLICY {object} ON {table};"))
        }
        DifferenceKind::PolicyChanged => match policy_v2() {
            Some(p) => Statement::Review(format!(
                "DROP POLICY {object} ON {table};\n{}",
                create_policy(table, p)
            )),
            None => Statement::Note(format!("policy {object} not found")),
        },
        DifferenceKind::IndexOnlyInV2 => match index_v2() {
            Some(i) => Statement::Apply(terminated(&i.definition)),
            None => Statement::Note(format!("index {object} not found")),
        },
        DifferenceKind::IndexOnlyInV1 => Statement::Review(format!("DROP INDEX {object};")),
        DifferenceKind::IndexChanged => match index_v2() {
            Some(i) => Statement::Review(format!(
                "DROP INDEX {object};\n{}",
                terminated(&i.definition)
            )),
            None => Statement::Note(format!("index {object} not found")),
        },
    }
}

fn column_sql(column: &ColumnDef) -> String {
    let mut sql = format!("{} {}", column.name, column.data_type);
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        let _ = write!(sql, " DEFAULT {default}");
    }
    sql
}

fn create_table(table: &str, schema: &TableSchema, v2: &SchemaSnapshot) -> String {
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| format!("    {}", column_sql(c)))
        .collect();
    let mut sql = format!("CREATE TABLE {table} (\n{}\n);", columns.join(",\n"));
    for constraint in &schema.constraints {
        if constraint.definition.is_some() {
            let _ = write!(sql, "\n{}", constraint_text(table, constraint));
        }
    }
    for index in v2.indexes.get(table).into_iter().flatten() {
        let _ = write!(sql, "\n{}", terminated(&index.definition));
    }
    for policy in v2.policies.get(table).into_iter().flatten() {
        let _ = write!(sql, "\n{}", create_policy(table, policy));
    }
    sql
}

fn constraint_text(table: &str, constraint: &ConstraintDef) -> String {
    match &constraint.definition {
        Some(def) => format!("ALTER TABLE {table} ADD CONSTRAINT {} {def};", constraint.name),
        None => format!(
            "-- constraint {} ({}) has no captured definition",
            constraint.name, constraint.constraint_type
        ),
    }
}

fn add_constraint(table: &str, constraint: &ConstraintDef) -> Statement {
    match constraint.definition {
        Some(_) => Statement::Apply(constraint_text(table, constraint)),
        None => Statement::Note(format!(
            "constraint {} ({}) has no captured definition",
            constraint.name, constraint.constraint_type
        )),
    }
}

fn create_policy(table: &str, policy: &PolicyDef) -> String {
    let mut sql = format!("CREATE POLICY {} ON {table} FOR {}", policy.name, policy.command);
    if !policy.roles.is_empty() {
        let _ = write!(sql, " TO {}", policy.roles.join(", "));
    }
    if let Some(using) = &policy.using_expr {
        let _ = write!(sql, " USING ({using})");
    }
    if let Some(check) = &policy.with_check {
        let _ = write!(sql, " WITH CHECK ({check})");
    }
    sql.push(';');
    sql
}

fn terminated(statement: &str) -> String {
    let trimmed = statement.trim_end();
    if trimmed.ends_with(';') {
        trimmed.to_string()
    } else {
        format!("{trimmed};")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn column(name: &str, data_type: &str, nullable: bool) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            default: None,
        }
    }

    pub(crate) fn base() -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::default();
        snapshot.tables.insert(
            "alanlar".to_string(),
            TableSchema {
                columns: vec![column("id", "integer", false), column("ad", "text", false)],
                constraints: vec![ConstraintDef {
                    name: "alanlar_pkey".to_string(),
                    constraint_type: "PRIMARY KEY".to_string(),
                    definition: Some("PRIMARY KEY (id)".to_string()),
                }],
            },
        );
        snapshot
    }

    pub(crate) fn with_coordinators(mut snapshot: SchemaSnapshot) -> SchemaSnapshot {
        snapshot.tables.insert(
            "isletme_koordinatorler".to_string(),
            TableSchema {
                columns: vec![
                    column("id", "uuid", false),
                    column("isletme_id", "uuid", false),
                    column("ogretmen_id", "uuid", true),
                ],
                constraints: Vec::new(),
            },
        );
        snapshot.indexes.insert(
            "isletme_koordinatorler".to_string(),
            vec![IndexDef {
                name: "isletme_koordinatorler_pkey".to_string(),
                definition: "CREATE UNIQUE INDEX isletme_koordinatorler_pkey ON public.isletme_koordinatorler USING btree (id)".to_string(),
            }],
        );
        snapshot.policies.insert(
            "isletme_koordinatorler".to_string(),
            vec![PolicyDef {
                name: "koordinator_select".to_string(),
                command: "SELECT".to_string(),
                roles: vec!["authenticated".to_string()],
                using_expr: Some("true".to_string()),
                with_check: None,
            }],
        );
        snapshot
    }

    #[test]
    fn new_table_is_a_single_difference() {
        let v1 = base();
        let v2 = with_coordinators(base());
        let diff = diff_schemas(&v1, &v2);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.first().map(|d| d.kind), Some(DifferenceKind::TableOnlyInV2));
        assert_eq!(
            diff.first().and_then(|d| d.table.as_deref()),
            Some("isletme_koordinatorler")
        );

        let reverse = diff_schemas(&v2, &v1);
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse.first().map(|d| d.kind), Some(DifferenceKind::TableOnlyInV1));
    }

    #[test]
    fn identical_snapshots_have_no_differences() {
        assert!(diff_schemas(&base(), &base()).is_empty());
    }

    #[test]
    fn column_changes_are_itemized() {
        let v1 = base();
        let mut v2 = base();
        if let Some(table) = v2.tables.get_mut("alanlar") {
            table.columns = vec![
                column("id", "bigint", false),
                ColumnDef {
                    default: Some("'yok'::text".to_string()),
                    ..column("ad", "text", true)
                },
                column("kod", "text", false),
            ];
        }
        let kinds: Vec<DifferenceKind> = diff_schemas(&v1, &v2).iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DifferenceKind::ColumnTypeChanged,
                DifferenceKind::ColumnNullabilityChanged,
                DifferenceKind::ColumnDefaultChanged,
                DifferenceKind::ColumnOnlyInV2,
            ]
        );
    }

    #[test]
    fn functions_and_indexes_are_compared() {
        let mut v1 = base();
        let mut v2 = base();
        let function = FunctionDef {
            name: "ogrenci_sayisi".to_string(),
            arguments: "alan integer".to_string(),
            return_type: "integer".to_string(),
            definition: Some("CREATE FUNCTION ogrenci_sayisi(alan integer) ...".to_string()),
        };
        v1.functions
            .insert("ogrenci_sayisi(alan integer)".to_string(), function.clone());
        v2.functions.insert(
            "ogrenci_sayisi(alan integer)".to_string(),
            FunctionDef {
                return_type: "bigint".to_string(),
                ..function
            },
        );
        v2.indexes.insert(
            "alanlar".to_string(),
            vec![IndexDef {
                name: "alanlar_ad_idx".to_string(),
                definition: "CREATE INDEX alanlar_ad_idx ON public.alanlar USING btree (ad)"
                    .to_string(),
            }],
        );
        let kinds: Vec<DifferenceKind> = diff_schemas(&v1, &v2).iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DifferenceKind::FunctionChanged, DifferenceKind::IndexOnlyInV2]
        );
    }

    #[test]
    fn migration_applies_additive_and_comments_destructive() {
        let v1 = with_coordinators(base());
        let mut v2 = base();
        if let Some(table) = v2.tables.get_mut("alanlar") {
            table.columns.push(column("kod", "text", false));
            table.columns.push(column("aciklama", "text", true));
        }
        let sql = migration_sql("1.0.0", "1.1.0", &v1, &v2);
        assert!(sql.contains("\nALTER TABLE alanlar ADD COLUMN aciklama text;"));
        assert!(sql.contains("-- ALTER TABLE alanlar ADD COLUMN kod text NOT NULL;"));
        assert!(sql.contains("-- DROP TABLE isletme_koordinatorler;"));
        assert!(sql.contains("REVIEW REQUIRED"));
        assert!(sql.trim_end().ends_with("COMMIT;"));
    }

    #[test]
    fn migration_for_new_table_creates_its_objects() {
        let sql = migration_sql("1.0.0", "2.0.0", &base(), &with_coordinators(base()));
        assert!(sql.contains("CREATE TABLE isletme_koordinatorler ("));
        assert!(sql.contains("    ogretmen_id uuid"));
        assert!(sql.contains("CREATE UNIQUE INDEX isletme_koordinatorler_pkey"));
        assert!(sql.contains("CREATE POLICY koordinator_select ON isletme_koordinatorler FOR SELECT TO authenticated USING (true);"));
        assert!(!sql.contains("REVIEW REQUIRED:"));
    }

    #[test]
    fn identical_migration_is_a_note() {
        let sql = migration_sql("1.0.0", "1.0.0", &base(), &base());
        assert!(sql.contains("No schema differences"));
        assert!(!sql.contains("BEGIN;"));
    }

    #[test]
    fn difference_renders_for_humans() {
        let d = SchemaDifference::new(DifferenceKind::ColumnTypeChanged, Some("alanlar"), Some("id"))
            .changed("integer", "bigint");
        assert_eq!(d.to_string(), "COLUMN_TYPE_CHANGED alanlar.id: integer -> bigint");
    }
}
