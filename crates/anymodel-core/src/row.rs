//! Rows returned by drivers and records exchanged with backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::value::Value;

/// A stored row as the model layer sees it: field name to value.
///
/// `BTreeMap` keeps iteration deterministic, which keeps generated SQL and
/// file-backend output stable.
pub type Record = BTreeMap<String, Value>;

/// Column names shared by all rows of one result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSet {
    names: Vec<String>,
}

impl ColumnSet {
    /// Create a column set from names in result order.
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Position of a column by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Column names in result order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A positional row produced by a SQL driver.
///
/// The column set is shared across all rows of a result set via `Arc`, the
/// same trick the wire drivers use to avoid cloning names per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<ColumnSet>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row over a shared column set.
    #[must_use]
    pub fn new(columns: Arc<ColumnSet>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value at a position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value by column name.
    #[must_use]
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// The shared column set.
    #[must_use]
    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    /// Number of values in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert into a named [`Record`].
    #[must_use]
    pub fn into_record(self) -> Record {
        self.columns
            .names()
            .iter()
            .cloned()
            .zip(self.values)
            .collect()
    }
}
