//! The driver-level SQL execution contract.
//!
//! SQL backend adapters (`anymodel-mysql`, `anymodel-postgres`) are written
//! against [`SqlConnection`] rather than a concrete socket type, so their
//! compiler and reconciliation logic can be exercised against a scripted fake
//! in tests while production wires in a real connection.

use std::future::Future;

use asupersync::{Cx, Outcome};

use crate::error::Error;
use crate::identifiers::{quote_ident, quote_ident_mysql};
use crate::row::Row;
use crate::value::Value;

/// Placeholder and quoting dialect of a SQL backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// MySQL: `?` placeholders, backtick quoting.
    MySql,
    /// PostgreSQL: `$n` placeholders, double-quote quoting.
    Postgres,
}

impl Dialect {
    /// The placeholder for the 1-based parameter position `n`.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::MySql => "?".to_string(),
            Dialect::Postgres => format!("${n}"),
        }
    }

    /// Quote an identifier in this dialect.
    #[must_use]
    pub fn quote(self, name: &str) -> String {
        match self {
            Dialect::MySql => quote_ident_mysql(name),
            Dialect::Postgres => quote_ident(name),
        }
    }
}

/// A live SQL connection capable of running parameterized statements.
///
/// Methods suspend at I/O boundaries and surface cancellation through
/// [`Outcome`]. Implementations are expected to verify the bound-value count
/// against the statement's placeholders before anything reaches the wire and
/// to attempt exactly one transparent reconnect when no live handle exists.
pub trait SqlConnection: Send + Sync {
    /// The dialect this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Run a statement and return all result rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Run an INSERT and return the generated id.
    ///
    /// PostgreSQL implementations expect `RETURNING <id>` in the statement;
    /// MySQL implementations read the OK packet's last-insert-id.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;
}

/// Count the placeholders a statement expects in the given dialect.
///
/// Used by drivers to reject statements whose bound-value count does not
/// match before anything is sent to the server. Quoted strings and quoted
/// identifiers are skipped so literal `?`/`$` characters inside them do not
/// count.
#[must_use]
pub fn count_placeholders(sql: &str, dialect: Dialect) -> usize {
    let bytes = sql.as_bytes();
    let mut count = 0usize;
    let mut max_numbered = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // Doubled quote is an escape, not a terminator.
                        if i + 1 < bytes.len() && bytes[i + 1] == quote {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            b'?' if dialect == Dialect::MySql => count += 1,
            b'$' if dialect == Dialect::Postgres => {
                let mut j = i + 1;
                let mut n = 0usize;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    n = n * 10 + usize::from(bytes[j] - b'0');
                    j += 1;
                }
                if j > i + 1 {
                    max_numbered = max_numbered.max(n);
                    i = j;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    match dialect {
        Dialect::MySql => count,
        Dialect::Postgres => max_numbered,
    }
}
