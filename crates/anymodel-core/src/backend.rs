//! The backend adapter contract.
//!
//! Every storage engine implements [`Backend`]: the in-memory store, the
//! flat-file JSON store, and the two SQL adapters. The trait is the seam the
//! model facade delegates to; a `Predicate` handed to any implementation must
//! select the same logical row set.

use std::future::Future;

use asupersync::{Cx, Outcome};

use crate::error::Error;
use crate::field::TableSchema;
use crate::predicate::Predicate;
use crate::row::Record;

/// Sort direction for one order-by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Direction {
    /// SQL keyword for this direction.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Ordered list of (field, direction) sort keys; first key has highest
/// priority, and ties are broken by the next key (stable multi-key sort).
pub type OrderBy = Vec<(String, Direction)>;

/// Ordering and windowing options for a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Sort keys; empty means backend default order (SQL backends order by
    /// the auto field ascending for determinism, in-process backends keep
    /// insertion order).
    pub order: OrderBy,
    /// Cap on the number of returned rows.
    pub limit: Option<u64>,
    /// Rows to skip after filtering and sorting.
    pub offset: Option<u64>,
}

impl SearchOptions {
    /// No ordering, no window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sort key.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push((field.into(), direction));
        self
    }

    /// Cap the result count.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip leading matches.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A storage engine a model can be bound to.
///
/// All methods suspend at I/O boundaries. None are reentrant across
/// overlapping calls to the same row set: the in-process backends perform
/// full read-modify-write cycles with no locking, so concurrent mutations of
/// one table can race (callers needing atomicity must serialize externally).
pub trait Backend: Send + Sync {
    /// Ensure the backend has a table matching `schema`.
    ///
    /// Idempotent: creates the table and version record if absent, no-ops if
    /// the stored version matches, otherwise runs additive reconciliation and
    /// bumps the stored version.
    fn initialize_table(
        &self,
        cx: &Cx,
        schema: &TableSchema,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Rows matching `predicate`, ordered and windowed per `options`.
    fn search(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        predicate: &Predicate,
        options: &SearchOptions,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send;

    /// Insert a validated record; returns the generated auto-field value.
    fn insert(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        data: &Record,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Update the row with the given id; returns the id.
    fn update(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        id: i64,
        data: &Record,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Delete the row with the given id. Absent ids are a no-op, not an
    /// error.
    fn delete(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        id: i64,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Number of rows matching `predicate`. Semantically
    /// `search(..).len()`, but SQL backends compute it natively.
    fn count(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        predicate: &Predicate,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;
}

impl<B: Backend> Backend for std::sync::Arc<B> {
    fn initialize_table(
        &self,
        cx: &Cx,
        schema: &TableSchema,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        (**self).initialize_table(cx, schema)
    }

    fn search(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        predicate: &Predicate,
        options: &SearchOptions,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send {
        (**self).search(cx, schema, predicate, options)
    }

    fn insert(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        data: &Record,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        (**self).insert(cx, schema, data)
    }

    fn update(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        id: i64,
        data: &Record,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        (**self).update(cx, schema, id, data)
    }

    fn delete(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        id: i64,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        (**self).delete(cx, schema, id)
    }

    fn count(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        predicate: &Predicate,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        (**self).count(cx, schema, predicate)
    }
}
