//! The model facade: payload validation, serialization, and row
//! post-processing over any [`Backend`].

use anymodel_core::{
    Backend, Cx, Error, FieldType, Filter, Outcome, Record, Result, SearchOptions, TableSchema,
    ValidationErrorKind, Value,
};

/// A table schema bound to one storage backend.
///
/// `Model` owns no connection state of its own; many models can share one
/// backend (the foreign-key checks depend on it). `init` must complete before
/// any data operation so the backend's schema is reconciled.
///
/// ```no_run
/// use anymodel::prelude::*;
/// use anymodel_memory::MemoryBackend;
///
/// # fn build() -> anymodel_core::Result<()> {
/// let schema = TableSchema::builder("things", 1)
///     .field(FieldDef::new("foo", FieldType::String).required())
///     .field(FieldDef::new("bar", FieldType::String))
///     .build()?;
/// let model = Model::new(schema, MemoryBackend::new());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Model<B> {
    schema: TableSchema,
    backend: B,
}

impl<B: Backend> Model<B> {
    /// Bind a schema to a backend.
    #[must_use]
    pub fn new(schema: TableSchema, backend: B) -> Self {
        Self { schema, backend }
    }

    /// The bound schema.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// The bound backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Reconcile the backend with the declared schema. Idempotent.
    pub async fn init(&self, cx: &Cx) -> Outcome<(), Error> {
        self.backend.initialize_table(cx, &self.schema).await
    }

    /// Validate and insert a record; returns the generated id.
    pub async fn insert(&self, cx: &Cx, data: Record) -> Outcome<i64, Error> {
        let mut data = data;
        if let Err(e) = self.validate_payload(&data, true) {
            return Outcome::Err(e);
        }
        // The auto counter owns the id; a supplied value is dropped rather
        // than letting backends disagree about explicit ids.
        if let Some(auto) = self.schema.auto_field() {
            data.remove(&auto.name);
        }
        match self.check_foreign_keys(cx, &data).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.backend.insert(cx, &self.schema, &data).await
    }

    /// Validate and apply a partial update to the row with the given id.
    pub async fn update(&self, cx: &Cx, id: i64, data: Record) -> Outcome<i64, Error> {
        let mut data = data;
        if let Err(e) = self.validate_payload(&data, false) {
            return Outcome::Err(e);
        }
        if let Some(auto) = self.schema.auto_field() {
            data.remove(&auto.name);
        }
        if data.is_empty() {
            return Outcome::Ok(id);
        }
        match self.check_foreign_keys(cx, &data).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        self.backend.update(cx, &self.schema, id, &data).await
    }

    /// The row with the given id, post-processed, or `None`.
    pub async fn get(&self, cx: &Cx, id: i64) -> Outcome<Option<Record>, Error> {
        let id_field = self
            .schema
            .auto_field()
            .map_or("id", |f| f.name.as_str())
            .to_string();
        let options = SearchOptions::new().limit(1);
        match self
            .search(cx, Filter::by(id_field, Value::Int(id)), &options)
            .await
        {
            Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Rows matching `filter`, ordered and windowed per `options`.
    ///
    /// Every row comes back post-processed: stored keys the schema does not
    /// declare are dropped (forward compatibility across schema versions),
    /// declared fields the row lacks materialize as null, JSON fields are
    /// decoded, and BOOLEAN fields are coerced to strict booleans.
    pub async fn search(
        &self,
        cx: &Cx,
        filter: impl Into<Filter>,
        options: &SearchOptions,
    ) -> Outcome<Vec<Record>, Error> {
        let filter = filter.into();
        if let Err(e) = self.validate_filter_fields(&filter, options) {
            return Outcome::Err(e);
        }
        let predicate = filter.into_predicate();
        match self
            .backend
            .search(cx, &self.schema, &predicate, options)
            .await
        {
            Outcome::Ok(rows) => Outcome::Ok(
                rows.into_iter()
                    .map(|row| self.postprocess_row(row))
                    .collect(),
            ),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Number of rows matching `filter`.
    pub async fn count(&self, cx: &Cx, filter: impl Into<Filter>) -> Outcome<u64, Error> {
        let filter = filter.into();
        if let Err(e) = self.validate_filter_fields(&filter, &SearchOptions::new()) {
            return Outcome::Err(e);
        }
        let predicate = filter.into_predicate();
        self.backend.count(cx, &self.schema, &predicate).await
    }

    /// Delete the row with the given id; absent ids are a no-op.
    pub async fn delete(&self, cx: &Cx, id: i64) -> Outcome<(), Error> {
        self.backend.delete(cx, &self.schema, id).await
    }

    /// Strip FILTERED fields from a record. Pure; no backend access. Keys
    /// the schema does not declare pass through untouched.
    #[must_use]
    pub fn filter_for_export(&self, record: &Record) -> Record {
        record
            .iter()
            .filter(|(name, _)| {
                self.schema.field(name).is_none_or(|field| !field.filtered)
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// [`Model::filter_for_export`] over many records.
    #[must_use]
    pub fn filter_many_for_export(&self, records: &[Record]) -> Vec<Record> {
        records.iter().map(|r| self.filter_for_export(r)).collect()
    }

    /// Synchronous payload validation, run before any backend I/O.
    fn validate_payload(&self, data: &Record, inserting: bool) -> Result<()> {
        for (name, value) in data {
            let Some(field) = self.schema.field(name) else {
                return Err(Error::validation(name, ValidationErrorKind::UnknownField));
            };
            if let (Some(max), Value::Text(s)) = (field.size, value) {
                let actual = s.chars().count();
                if actual > max as usize {
                    return Err(Error::validation(
                        name,
                        ValidationErrorKind::TooLong { max, actual },
                    ));
                }
            }
            if field.required && !field.auto && value.is_null() {
                return Err(Error::validation(name, ValidationErrorKind::RequiredNull));
            }
        }
        if inserting {
            for field in self.schema.fields() {
                if field.required && !field.auto && !data.contains_key(&field.name) {
                    return Err(Error::validation(
                        &field.name,
                        ValidationErrorKind::RequiredMissing,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Verify every supplied non-null foreign-key value references an
    /// existing parent row on the same backend.
    async fn check_foreign_keys(&self, cx: &Cx, data: &Record) -> Outcome<(), Error> {
        for field in self.schema.fields() {
            let Some(fk) = &field.foreign else { continue };
            let Some(value) = data.get(&field.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            // Count only needs the referenced table's name, so a minimal
            // schema stands in for the full declaration of the parent.
            let parent = match TableSchema::builder(&fk.table, 0).build() {
                Ok(s) => s,
                Err(e) => return Outcome::Err(e),
            };
            let predicate = Filter::by(fk.field.clone(), value.clone()).into_predicate();
            match self.backend.count(cx, &parent, &predicate).await {
                Outcome::Ok(0) => {
                    return Outcome::Err(Error::validation(
                        &field.name,
                        ValidationErrorKind::ForeignKey {
                            table: fk.table.clone(),
                            field: fk.field.clone(),
                        },
                    ));
                }
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(())
    }

    fn validate_filter_fields(&self, filter: &Filter, options: &SearchOptions) -> Result<()> {
        for name in filter.field_names() {
            if !self.schema.has_field(name) {
                return Err(Error::validation(name, ValidationErrorKind::UnknownField));
            }
        }
        for (name, _) in &options.order {
            if !self.schema.has_field(name) {
                return Err(Error::validation(name, ValidationErrorKind::UnknownField));
            }
        }
        Ok(())
    }

    /// Drop undeclared keys, materialize absent fields as null, decode JSON,
    /// coerce booleans.
    fn postprocess_row(&self, row: Record) -> Record {
        let mut out = Record::new();
        for field in self.schema.fields() {
            let value = row.get(&field.name).cloned().unwrap_or(Value::Null);
            let value = match field.field_type {
                FieldType::Json => decode_json(value),
                FieldType::Boolean => coerce_boolean(value),
                _ => value,
            };
            out.insert(field.name.clone(), value);
        }
        out
    }
}

impl<B: Backend + 'static> Model<std::sync::Arc<B>> {
    /// Bind a schema to the process-wide default backend of type `B`.
    ///
    /// Fails with [`Error::NoDefaultConnection`] when no default was
    /// registered via [`crate::registry::set_default`].
    pub fn from_registry(schema: TableSchema) -> Result<Self> {
        Ok(Self::new(schema, crate::registry::default_backend::<B>()?))
    }
}

/// Decode a JSON field stored as its serialized text. Values that fail to
/// parse stay as text rather than erroring a whole result set.
fn decode_json(value: Value) -> Value {
    match value {
        Value::Text(s) => match serde_json::from_str(&s) {
            Ok(json) => Value::Json(json),
            Err(_) => Value::Text(s),
        },
        other => other,
    }
}

/// Coerce a BOOLEAN field to a strict boolean. Null stays null so the
/// false≈null search semantics keep working on post-processed rows.
fn coerce_boolean(value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(b),
        Value::Int(i) => Value::Bool(i != 0),
        Value::Text(s) => match s.as_str() {
            "" | "0" | "f" | "false" => Value::Bool(false),
            _ => Value::Bool(true),
        },
        other => Value::Bool(!matches!(other, Value::Array(ref a) if a.is_empty())),
    }
}
