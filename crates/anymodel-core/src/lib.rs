//! Core types and traits for anymodel.
//!
//! `anymodel-core` is the **foundation layer** for the entire workspace. It
//! defines the data types and contracts every other crate builds on.
//!
//! # Role In The Architecture
//!
//! - **Contract layer**: [`Backend`] is the adapter trait implemented by every
//!   storage engine (memory, file, MySQL, PostgreSQL); [`SqlConnection`] is the
//!   lower-level driver trait the SQL adapters run on.
//! - **Data model**: [`Value`], [`Row`], [`Record`], and the schema metadata
//!   ([`FieldDef`], [`TableSchema`]) represent everything that crosses the
//!   backend boundary.
//! - **Predicates**: [`Where`] and [`Filter`] describe search conditions
//!   independently of the engine that will evaluate them.
//! - **Structured concurrency**: re-exports `Cx` and `Outcome` from asupersync
//!   so every async backend operation is cancel-correct.
//!
//! # Who Uses This Crate
//!
//! - `anymodel-query` consumes predicates and `Value` to compile filters.
//! - `anymodel-schema` inspects `TableSchema` to generate DDL.
//! - Backend crates (`anymodel-memory`, `anymodel-file`, `anymodel-mysql`,
//!   `anymodel-postgres`) implement [`Backend`] and operate on [`Record`]s.
//!
//! Most applications should use the `anymodel` facade; reach for
//! `anymodel-core` directly when writing backends or advanced integrations.

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod backend;
pub mod connection;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod predicate;
pub mod row;
pub mod value;

pub use backend::{Backend, Direction, OrderBy, SearchOptions};
pub use connection::{Dialect, SqlConnection};
pub use error::{
    ConnectionError, ConnectionErrorKind, DatabaseError, Error, Result, SchemaError,
    SchemaErrorKind, ValidationError, ValidationErrorKind,
};
pub use field::{FieldDef, FieldType, ForeignKeyDef, IndexDef, TableSchema};
pub use identifiers::{quote_ident, quote_ident_mysql};
pub use predicate::{BoolOp, Comparator, Filter, Predicate, Where};
pub use row::{ColumnSet, Record, Row};
pub use value::Value;
