//! Declared table dependency graph.
//!
//! A single [`TableGraph`] drives every ordering decision: parents are
//! inserted before children and children are deleted before parents. The
//! graph is static configuration; it is never inferred from the live schema.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::GuardianError;

/// A table and the tables it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Tables that must be populated before this one.
    #[serde(default)]
    pub parents: Vec<String>,
}

impl TableSpec {
    /// Convenience constructor.
    #[must_use]
    pub fn new(name: &str, parents: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            parents: parents.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Validated dependency graph with a precomputed insert order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableGraph {
    specs: Vec<TableSpec>,
    order: Vec<String>,
}

impl TableGraph {
    /// Builds the graph from declared specs.
    ///
    /// The insert order is a stable topological sort: among the tables whose
    /// parents are already placed, the one declared first goes next.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Config`] on duplicate tables, unknown
    /// parents or dependency cycles.
    pub fn new(specs: Vec<TableSpec>) -> Result<Self, GuardianError> {
        let mut names = HashSet::new();
        for spec in &specs {
            if !names.insert(spec.name.as_str()) {
                return Err(GuardianError::Config(format!(
                    "table `{}` declared twice in the dependency graph",
                    spec.name
                )));
            }
        }
        for spec in &specs {
            if let Some(parent) = spec.parents.iter().find(|p| !names.contains(p.as_str())) {
                return Err(GuardianError::Config(format!(
                    "table `{}` depends on undeclared table `{parent}`",
                    spec.name
                )));
            }
        }

        let mut placed: HashSet<&str> = HashSet::with_capacity(specs.len());
        let mut order = Vec::with_capacity(specs.len());
        while order.len() < specs.len() {
            let next = specs.iter().find(|spec| {
                !placed.contains(spec.name.as_str())
                    && spec.parents.iter().all(|p| placed.contains(p.as_str()))
            });
            let Some(next) = next else {
                let stuck: Vec<&str> = specs
                    .iter()
                    .map(|s| s.name.as_str())
                    .filter(|name| !placed.contains(name))
                    .collect();
                return Err(GuardianError::Config(format!(
                    "dependency cycle between tables: {}",
                    stuck.join(", ")
                )));
            };
            placed.insert(next.name.as_str());
            order.push(next.name.clone());
        }

        Ok(Self { specs, order })
    }

    /// Tables in insert order (parents first).
    #[must_use]
    pub fn insert_order(&self) -> &[String] {
        &self.order
    }

    /// Tables in delete order (children first).
    #[must_use]
    pub fn delete_order(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }

    /// Returns `true` if the table is declared.
    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.order.iter().any(|t| t == table)
    }

    /// Declared parents of a table.
    #[must_use]
    pub fn parents(&self, table: &str) -> &[String] {
        self.specs
            .iter()
            .find(|s| s.name == table)
            .map(|s| s.parents.as_slice())
            .unwrap_or(&[])
    }

    /// Orders an arbitrary set of tables for insertion: declared tables in
    /// graph order, undeclared ones afterwards in name order.
    #[must_use]
    pub fn order_subset<'a, I>(&self, tables: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: BTreeSet<&str> = tables.into_iter().collect();
        let mut ordered: Vec<String> = self
            .order
            .iter()
            .filter(|t| wanted.contains(t.as_str()))
            .cloned()
            .collect();
        ordered.extend(
            wanted
                .into_iter()
                .filter(|t| !self.contains(t))
                .map(ToString::to_string),
        );
        ordered
    }
}
