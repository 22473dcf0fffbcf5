//! The reconciliation planner.
//!
//! [`plan`] compares the declared schema with what the backend reports and
//! produces the operations `initialize_table` must apply. Planning is pure,
//! so every branch of the state machine is unit-tested here without a
//! database; the adapters render and execute the operations.

use anymodel_core::{FieldDef, IndexDef, TableSchema};

use crate::introspect::LiveColumn;

/// One step of a reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOperation {
    /// Create the table from the full declared field list.
    CreateTable,
    /// Additively add one declared field missing from the live table.
    AddColumn(FieldDef),
    /// Add the foreign-key constraint for an added column.
    AddForeignKey(FieldDef),
    /// Create one declared index (skip-if-exists at execution).
    CreateIndex(IndexDef),
    /// Record the declared version for the first time.
    InsertVersion(i64),
    /// Bump the recorded version after a migration.
    UpdateVersion(i64),
}

/// Plan the reconciliation of `schema` against the backend's stored state.
///
/// `stored_version` is the version row for this table, if any; `live` is the
/// live column list, only consulted when versions differ. Indexes over
/// undeclared fields cannot occur here: the schema factory rejects them
/// before a `TableSchema` exists.
#[must_use]
pub fn plan(
    schema: &TableSchema,
    stored_version: Option<i64>,
    live: &[LiveColumn],
) -> Vec<SchemaOperation> {
    let mut ops = Vec::new();
    match stored_version {
        None => {
            ops.push(SchemaOperation::CreateTable);
            for index in schema.indexes() {
                ops.push(SchemaOperation::CreateIndex(index.clone()));
            }
            ops.push(SchemaOperation::InsertVersion(schema.version()));
        }
        Some(version) if version == schema.version() => {
            tracing::debug!(table = schema.table(), version, "schema already synced");
        }
        Some(version) => {
            tracing::debug!(
                table = schema.table(),
                from = version,
                to = schema.version(),
                "reconciling schema version"
            );
            for field in schema.fields() {
                if live.iter().any(|c| c.name == field.name) {
                    continue;
                }
                ops.push(SchemaOperation::AddColumn(field.clone()));
                if field.foreign.is_some() {
                    ops.push(SchemaOperation::AddForeignKey(field.clone()));
                }
            }
            // Indexes are re-asserted on every migration; execution skips
            // the ones that already exist.
            for index in schema.indexes() {
                ops.push(SchemaOperation::CreateIndex(index.clone()));
            }
            ops.push(SchemaOperation::UpdateVersion(schema.version()));
        }
    }
    ops
}
