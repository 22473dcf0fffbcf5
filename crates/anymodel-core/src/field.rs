//! Field metadata and table schemas.

use crate::error::{Error, Result, SchemaErrorKind};

/// The storage type of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// 32-bit-class integer column.
    Int,
    /// 64-bit integer column.
    BigInt,
    /// Variable-length string; width comes from [`FieldDef::size`].
    String,
    /// JSON document, stored serialized.
    Json,
    /// Boolean.
    Boolean,
}

impl FieldType {
    /// Human-readable name, used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Int => "INT",
            FieldType::BigInt => "BIGINT",
            FieldType::String => "STRING",
            FieldType::Json => "JSON",
            FieldType::Boolean => "BOOLEAN",
        }
    }

    /// Whether auto-increment is permitted on this type.
    #[must_use]
    pub const fn supports_auto(self) -> bool {
        matches!(self, FieldType::Int | FieldType::BigInt)
    }
}

/// A foreign-key reference to a field of another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    /// Referenced table name (unprefixed).
    pub table: String,
    /// Referenced field name.
    pub field: String,
}

/// Metadata for one model field.
///
/// Built with chained setters, consumed by the schema factory:
///
/// ```
/// use anymodel_core::{FieldDef, FieldType};
///
/// let field = FieldDef::new("name", FieldType::String)
///     .required()
///     .size(100);
/// assert!(field.required);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name as stored.
    pub name: String,
    /// Storage type.
    pub field_type: FieldType,
    /// Assigned by an increasing counter on insert; primary key on SQL.
    pub auto: bool,
    /// Must be present and non-null on insert.
    pub required: bool,
    /// Stripped from exported/public views.
    pub filtered: bool,
    /// Maximum length (STRING only); constrains DDL width and validation.
    pub size: Option<u32>,
    /// Foreign-key reference, if any.
    pub foreign: Option<ForeignKeyDef>,
}

impl FieldDef {
    /// Create a field with no metadata flags set.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            auto: false,
            required: false,
            filtered: false,
            size: None,
            foreign: None,
        }
    }

    /// Mark as auto-increment.
    #[must_use]
    pub fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    /// Mark as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as filtered from exports.
    #[must_use]
    pub fn filtered(mut self) -> Self {
        self.filtered = true;
        self
    }

    /// Set the maximum string length.
    #[must_use]
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Set a foreign-key reference.
    #[must_use]
    pub fn foreign(mut self, table: impl Into<String>, field: impl Into<String>) -> Self {
        self.foreign = Some(ForeignKeyDef {
            table: table.into(),
            field: field.into(),
        });
        self
    }
}

/// A declared index over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Indexed fields, in priority order.
    pub fields: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Explicit name override.
    pub name: Option<String>,
}

impl IndexDef {
    /// Create a non-unique index over the given fields.
    #[must_use]
    pub fn new(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            unique: false,
            name: None,
        }
    }

    /// Mark the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Override the generated name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Deterministic name: the override, else `<table>_<fields_joined>_idx`.
    #[must_use]
    pub fn effective_name(&self, table: &str) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}_{}_idx", table, self.fields.join("_")))
    }
}

/// A complete table schema: name, ordered fields, version, indexes.
///
/// Construct via [`TableSchema::builder`]; the factory injects an implicit
/// `id` AUTO INT field unless one named `id` is declared, and rejects
/// inconsistent metadata before anything touches a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    table: String,
    fields: Vec<FieldDef>,
    version: i64,
    indexes: Vec<IndexDef>,
}

impl TableSchema {
    /// Start building a schema for `table` at the given declared version.
    #[must_use]
    pub fn builder(table: impl Into<String>, version: i64) -> TableSchemaBuilder {
        TableSchemaBuilder {
            table: table.into(),
            version,
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Table name (unprefixed).
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Declared fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Declared schema version.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Declared indexes.
    #[must_use]
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether a field with this name is declared.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// The auto-increment field, if any (at most one by construction).
    #[must_use]
    pub fn auto_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.auto)
    }

    /// Field names in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Validating factory for [`TableSchema`].
#[derive(Debug)]
pub struct TableSchemaBuilder {
    table: String,
    version: i64,
    fields: Vec<FieldDef>,
    indexes: Vec<IndexDef>,
}

impl TableSchemaBuilder {
    /// Add a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add an index.
    #[must_use]
    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Validate and build the schema.
    ///
    /// Injects an implicit `id` AUTO INT field at position zero unless a field
    /// named `id` is declared explicitly.
    pub fn build(self) -> Result<TableSchema> {
        let mut fields = self.fields;

        if !fields.iter().any(|f| f.name == "id") {
            fields.insert(0, FieldDef::new("id", FieldType::Int).auto());
        }

        let mut auto_seen: Option<&str> = None;
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::schema(
                    &self.table,
                    SchemaErrorKind::DuplicateField(field.name.clone()),
                ));
            }
            if field.auto {
                if auto_seen.is_some() {
                    return Err(Error::schema(
                        &self.table,
                        SchemaErrorKind::MultipleAutoFields(field.name.clone()),
                    ));
                }
                if !field.field_type.supports_auto() {
                    return Err(Error::schema(
                        &self.table,
                        SchemaErrorKind::AutoTypeInvalid(field.name.clone()),
                    ));
                }
                auto_seen = Some(&field.name);
            }
            if field.size.is_some() && field.field_type != FieldType::String {
                return Err(Error::schema(
                    &self.table,
                    SchemaErrorKind::SizeOnNonString(field.name.clone()),
                ));
            }
        }

        for index in &self.indexes {
            for field in &index.fields {
                if !fields.iter().any(|f| &f.name == field) {
                    return Err(Error::schema(
                        &self.table,
                        SchemaErrorKind::FieldNotFoundForIndex {
                            index: index.effective_name(&self.table),
                            field: field.clone(),
                        },
                    ));
                }
            }
        }

        Ok(TableSchema {
            table: self.table,
            fields,
            version: self.version,
            indexes: self.indexes,
        })
    }
}
