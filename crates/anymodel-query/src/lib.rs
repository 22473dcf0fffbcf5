//! Predicate compilers for anymodel.
//!
//! One predicate tree, two targets:
//!
//! - [`eval`] walks rows in process and is the engine behind the memory and
//!   file backends;
//! - [`sql`] lowers the same tree into a parameterized SQL fragment with
//!   backend-specific placeholder syntax and builds the CRUD statements the
//!   SQL adapters execute.
//!
//! The two compilers agree on semantics by contract: a filter evaluated here
//! must select the same logical row set as its lowered SQL, including the
//! `false`/NULL coalescing rules for equality.

pub mod eval;
pub mod sql;

pub use eval::{apply_window, compare_order, matches, sort_records};
pub use sql::{
    build_count, build_delete, build_insert, build_select, build_update, compile_predicate,
};
