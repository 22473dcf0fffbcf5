//! In-memory storage backend for anymodel.
//!
//! Tables live in a shared map guarded by an asupersync mutex; rows are plain
//! [`Record`]s and filtering runs through the in-process predicate evaluator.
//! Suitable for tests and ephemeral data. Like the file backend, mutations
//! are read-modify-write with no per-row locking: overlapping writes to the
//! same table are not serialized by this layer.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use asupersync::sync::Mutex;
use asupersync::{Cx, Outcome};

use anymodel_core::{
    Backend, Error, Predicate, Record, SearchOptions, TableSchema, Value,
};
use anymodel_query::{apply_window, matches, sort_records};

/// Auto-increment counters and rows for one table.
#[derive(Debug, Default, Clone)]
struct TableStore {
    auto: BTreeMap<String, i64>,
    rows: Vec<Record>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, TableStore>,
    versions: HashMap<String, i64>,
}

/// An in-memory backend.
///
/// Cloning shares the underlying store, so many models can be bound to one
/// `MemoryBackend` and see each other's writes (the foreign-key checks rely
/// on this).
#[derive(Clone)]
pub struct MemoryBackend {
    prefix: Option<String>,
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefix: None,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Create an empty backend whose physical table names carry `prefix`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// The physical table name after prefixing.
    #[must_use]
    pub fn table_name(&self, table: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{p}{table}"),
            None => table.to_string(),
        }
    }

    /// Stored schema version for a table, if initialized. Test hook.
    pub async fn stored_version(&self, cx: &Cx, table: &str) -> Option<i64> {
        let name = self.table_name(table);
        let Ok(state) = self.state.lock(cx).await else {
            return None;
        };
        state.versions.get(&name).copied()
    }
}

fn next_auto_id(store: &mut TableStore, field: &str) -> i64 {
    let counter = store.auto.entry(field.to_string()).or_insert(1);
    let id = *counter;
    *counter += 1;
    id
}

impl Backend for MemoryBackend {
    fn initialize_table(
        &self,
        cx: &Cx,
        schema: &TableSchema,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let name = self.table_name(schema.table());
        let state = Arc::clone(&self.state);
        let version = schema.version();
        async move {
            let Ok(mut state) = state.lock(cx).await else {
                return Outcome::Err(Error::protocol("memory store lock poisoned"));
            };
            state.tables.entry(name.clone()).or_default();
            // Rows are schemaless; a version change needs no structural
            // work, absent fields simply read as null.
            let previous = state.versions.insert(name.clone(), version);
            tracing::debug!(table = %name, ?previous, version, "initialized memory table");
            Outcome::Ok(())
        }
    }

    fn search(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        predicate: &Predicate,
        options: &SearchOptions,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send {
        let name = self.table_name(schema.table());
        let state = Arc::clone(&self.state);
        let predicate = predicate.clone();
        let options = options.clone();
        async move {
            let Ok(state) = state.lock(cx).await else {
                return Outcome::Err(Error::protocol("memory store lock poisoned"));
            };
            let Some(store) = state.tables.get(&name) else {
                return Outcome::Ok(Vec::new());
            };
            let mut hits: Vec<Record> = store
                .rows
                .iter()
                .filter(|row| matches(&predicate, row))
                .cloned()
                .collect();
            drop(state);
            sort_records(&mut hits, &options.order);
            Outcome::Ok(apply_window(hits, options.limit, options.offset))
        }
    }

    fn insert(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        data: &Record,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let name = self.table_name(schema.table());
        let state = Arc::clone(&self.state);
        let auto = schema.auto_field().map(|f| f.name.clone());
        let mut row = data.clone();
        async move {
            let Ok(mut state) = state.lock(cx).await else {
                return Outcome::Err(Error::protocol("memory store lock poisoned"));
            };
            let store = state.tables.entry(name).or_default();
            let id = match auto {
                Some(field) => {
                    let id = next_auto_id(store, &field);
                    row.insert(field, Value::Int(id));
                    id
                }
                None => 0,
            };
            store.rows.push(row);
            Outcome::Ok(id)
        }
    }

    fn update(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        id: i64,
        data: &Record,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let name = self.table_name(schema.table());
        let state = Arc::clone(&self.state);
        let id_field = schema
            .auto_field()
            .map_or_else(|| "id".to_string(), |f| f.name.clone());
        let data = data.clone();
        async move {
            let Ok(mut state) = state.lock(cx).await else {
                return Outcome::Err(Error::protocol("memory store lock poisoned"));
            };
            if let Some(store) = state.tables.get_mut(&name) {
                for row in &mut store.rows {
                    if row.get(&id_field).and_then(Value::as_i64) == Some(id) {
                        for (k, v) in &data {
                            row.insert(k.clone(), v.clone());
                        }
                        break;
                    }
                }
            }
            Outcome::Ok(id)
        }
    }

    fn delete(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        id: i64,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let name = self.table_name(schema.table());
        let state = Arc::clone(&self.state);
        let id_field = schema
            .auto_field()
            .map_or_else(|| "id".to_string(), |f| f.name.clone());
        async move {
            let Ok(mut state) = state.lock(cx).await else {
                return Outcome::Err(Error::protocol("memory store lock poisoned"));
            };
            if let Some(store) = state.tables.get_mut(&name) {
                // Absent ids are a no-op by contract.
                store
                    .rows
                    .retain(|row| row.get(&id_field).and_then(Value::as_i64) != Some(id));
            }
            Outcome::Ok(())
        }
    }

    fn count(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        predicate: &Predicate,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let name = self.table_name(schema.table());
        let state = Arc::clone(&self.state);
        let predicate = predicate.clone();
        async move {
            let Ok(state) = state.lock(cx).await else {
                return Outcome::Err(Error::protocol("memory store lock poisoned"));
            };
            let count = state
                .tables
                .get(&name)
                .map_or(0, |store| {
                    store.rows.iter().filter(|row| matches(&predicate, row)).count()
                });
            Outcome::Ok(count as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anymodel_core::{Direction, FieldDef, FieldType, Filter};
    use asupersync::runtime::RuntimeBuilder;

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn schema() -> TableSchema {
        TableSchema::builder("things", 1)
            .field(FieldDef::new("foo", FieldType::String).required())
            .field(FieldDef::new("bar", FieldType::String))
            .build()
            .unwrap()
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_insert_assigns_sequential_ids() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let backend = MemoryBackend::new();
            let schema = schema();
            unwrap_outcome(backend.initialize_table(&cx, &schema).await);

            let id1 = unwrap_outcome(
                backend
                    .insert(&cx, &schema, &record(&[("foo", Value::Text("bar".into()))]))
                    .await,
            );
            let id2 = unwrap_outcome(
                backend
                    .insert(&cx, &schema, &record(&[("foo", Value::Text("bin".into()))]))
                    .await,
            );
            assert_eq!(id1, 1);
            assert_eq!(id2, 2);
        });
    }

    #[test]
    fn test_search_sort_and_window() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let backend = MemoryBackend::new();
            let schema = schema();
            unwrap_outcome(backend.initialize_table(&cx, &schema).await);
            for name in ["arg_a", "arg_b", "arg_c"] {
                unwrap_outcome(
                    backend
                        .insert(&cx, &schema, &record(&[("bar", Value::Text(name.into()))]))
                        .await,
                );
            }

            let desc = unwrap_outcome(
                backend
                    .search(
                        &cx,
                        &schema,
                        &Predicate::match_all(),
                        &SearchOptions::new().order_by("bar", Direction::Desc),
                    )
                    .await,
            );
            assert_eq!(desc[0].get("bar"), Some(&Value::Text("arg_c".into())));

            let windowed = unwrap_outcome(
                backend
                    .search(
                        &cx,
                        &schema,
                        &Predicate::match_all(),
                        &SearchOptions::new()
                            .order_by("bar", Direction::Asc)
                            .limit(1)
                            .offset(1),
                    )
                    .await,
            );
            assert_eq!(windowed.len(), 1);
            assert_eq!(windowed[0].get("bar"), Some(&Value::Text("arg_b".into())));
        });
    }

    #[test]
    fn test_update_delete_and_count() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let backend = MemoryBackend::new();
            let schema = schema();
            unwrap_outcome(backend.initialize_table(&cx, &schema).await);
            let id = unwrap_outcome(
                backend
                    .insert(&cx, &schema, &record(&[("foo", Value::Text("bar".into()))]))
                    .await,
            );

            unwrap_outcome(
                backend
                    .update(&cx, &schema, id, &record(&[("foo", Value::Text("baz".into()))]))
                    .await,
            );
            let rows = unwrap_outcome(
                backend
                    .search(
                        &cx,
                        &schema,
                        &Filter::by("foo", "baz").into_predicate(),
                        &SearchOptions::new(),
                    )
                    .await,
            );
            assert_eq!(rows.len(), 1);

            // Deleting a missing id is a no-op.
            unwrap_outcome(backend.delete(&cx, &schema, 999).await);
            assert_eq!(
                unwrap_outcome(backend.count(&cx, &schema, &Predicate::match_all()).await),
                1
            );
            unwrap_outcome(backend.delete(&cx, &schema, id).await);
            assert_eq!(
                unwrap_outcome(backend.count(&cx, &schema, &Predicate::match_all()).await),
                0
            );
        });
    }

    #[test]
    fn test_reinit_preserves_rows_and_bumps_version() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let backend = MemoryBackend::new();
            let v1 = schema();
            unwrap_outcome(backend.initialize_table(&cx, &v1).await);
            unwrap_outcome(
                backend
                    .insert(&cx, &v1, &record(&[("foo", Value::Text("bar".into()))]))
                    .await,
            );

            let v2 = TableSchema::builder("things", 2)
                .field(FieldDef::new("foo", FieldType::String).required())
                .field(FieldDef::new("bar", FieldType::String))
                .field(FieldDef::new("extra", FieldType::Int))
                .build()
                .unwrap();
            unwrap_outcome(backend.initialize_table(&cx, &v2).await);

            assert_eq!(backend.stored_version(&cx, "things").await, Some(2));
            let rows = unwrap_outcome(
                backend
                    .search(&cx, &v2, &Predicate::match_all(), &SearchOptions::new())
                    .await,
            );
            assert_eq!(rows.len(), 1);
            // The old row has no value for the new field.
            assert_eq!(rows[0].get("extra"), None);
        });
    }

    #[test]
    fn test_prefix_isolates_tables() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let backend = MemoryBackend::with_prefix("app_");
            assert_eq!(backend.table_name("things"), "app_things");
            let schema = schema();
            unwrap_outcome(backend.initialize_table(&cx, &schema).await);
            assert_eq!(backend.stored_version(&cx, "things").await, Some(1));
        });
    }
}
