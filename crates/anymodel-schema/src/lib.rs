//! Schema reconciliation for anymodel.
//!
//! `initialize_table` on a SQL backend drives a small state machine:
//!
//! 1. no stored version — create the table from the declared field list,
//!    create the declared indexes, record the version;
//! 2. stored version matches — nothing to do (idempotent re-init);
//! 3. stored version differs — diff the declared fields against the live
//!    columns and apply **additive** DDL only (`ADD COLUMN`, follow-up
//!    `ADD CONSTRAINT ... FOREIGN KEY`, missing indexes), then bump the
//!    stored version.
//!
//! This crate is pure planning and SQL text: [`reconcile::plan`] produces
//! [`reconcile::SchemaOperation`]s from declared+live state, and [`ddl`]
//! renders each operation for a dialect. Executing the statements is the
//! backend adapter's job, which keeps every branch of the state machine
//! testable against a scripted connection.

pub mod ddl;
pub mod introspect;
pub mod reconcile;

pub use ddl::{VERSION_TABLE, apply_prefix};
pub use introspect::LiveColumn;
pub use reconcile::{SchemaOperation, plan};
