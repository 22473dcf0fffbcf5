//! The PostgreSQL [`Backend`] adapter.

use std::future::Future;

use asupersync::{Cx, Outcome};

use anymodel_core::{
    Backend, Dialect, Error, Predicate, Record, Row, SearchOptions, SqlConnection, TableSchema,
    Value,
};
use anymodel_query::{build_count, build_delete, build_insert, build_select, build_update};
use anymodel_schema::reconcile::SchemaOperation;
use anymodel_schema::{VERSION_TABLE, apply_prefix, ddl, introspect, plan};

use crate::config::PgConfig;
use crate::connection::PostgresConnection;

const DIALECT: Dialect = Dialect::Postgres;

/// PostgreSQL storage backend, generic over the connection so the adapter
/// logic can run against a scripted fake in tests.
#[derive(Debug, Clone)]
pub struct PostgresBackend<C> {
    conn: C,
    prefix: Option<String>,
}

impl PostgresBackend<PostgresConnection> {
    /// Build a backend over a lazily-connecting handle for `config`,
    /// carrying the config's table prefix.
    #[must_use]
    pub fn connect(config: PgConfig) -> Self {
        let prefix = config.table_prefix.clone();
        Self {
            conn: PostgresConnection::new(config),
            prefix,
        }
    }
}

impl<C: SqlConnection> PostgresBackend<C> {
    /// Wrap an existing connection.
    #[must_use]
    pub fn new(conn: C) -> Self {
        Self { conn, prefix: None }
    }

    /// Wrap an existing connection with a table-name prefix.
    #[must_use]
    pub fn with_prefix(conn: C, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: Some(prefix.into()),
        }
    }

    /// The physical table name after prefixing.
    #[must_use]
    pub fn table_name(&self, table: &str) -> String {
        apply_prefix(self.prefix.as_deref(), table)
    }

    /// The shared connection.
    #[must_use]
    pub fn connection(&self) -> &C {
        &self.conn
    }

    async fn apply_operation(
        &self,
        cx: &Cx,
        table: &str,
        version_table: &str,
        schema: &TableSchema,
        op: &SchemaOperation,
    ) -> Outcome<(), Error> {
        let prefix = self.prefix.as_deref();
        let (sql, params) = match op {
            SchemaOperation::CreateTable => {
                (ddl::create_table(table, schema, prefix, DIALECT), Vec::new())
            }
            SchemaOperation::AddColumn(field) => {
                (ddl::add_column(table, field, DIALECT), Vec::new())
            }
            SchemaOperation::AddForeignKey(field) => {
                match ddl::add_foreign_key(table, field, prefix, DIALECT) {
                    Some(sql) => (sql, Vec::new()),
                    None => return Outcome::Ok(()),
                }
            }
            // CREATE INDEX IF NOT EXISTS keeps re-initialization idempotent.
            SchemaOperation::CreateIndex(index) => {
                (ddl::create_index(table, index, DIALECT), Vec::new())
            }
            SchemaOperation::InsertVersion(version) => {
                ddl::insert_version(version_table, table, *version, DIALECT)
            }
            SchemaOperation::UpdateVersion(version) => {
                ddl::update_version(version_table, table, *version, DIALECT)
            }
        };
        match self.conn.execute(cx, &sql, &params).await {
            Outcome::Ok(_) => Outcome::Ok(()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl<C: SqlConnection> Backend for PostgresBackend<C> {
    fn initialize_table(
        &self,
        cx: &Cx,
        schema: &TableSchema,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            let table = self.table_name(schema.table());
            let version_table = self.table_name(VERSION_TABLE);

            let vt_ddl = ddl::create_version_table(&version_table, DIALECT);
            match self.conn.execute(cx, &vt_ddl, &[]).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }

            let (sql, params) = ddl::select_version(&version_table, &table, DIALECT);
            let stored = match self.conn.query(cx, &sql, &params).await {
                Outcome::Ok(rows) => rows
                    .first()
                    .and_then(|row| row.get(0))
                    .and_then(Value::coerce_i64),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            let live = if stored.is_some() && stored != Some(schema.version()) {
                let (sql, params) = introspect::columns_query(&table, DIALECT);
                match self.conn.query(cx, &sql, &params).await {
                    Outcome::Ok(rows) => introspect::columns_from_rows(&rows),
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            } else {
                Vec::new()
            };

            for op in plan(schema, stored, &live) {
                match self
                    .apply_operation(cx, &table, &version_table, schema, &op)
                    .await
                {
                    Outcome::Ok(()) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
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
        async move {
            let table = self.table_name(schema.table());
            let (sql, params) = match build_select(&table, schema, predicate, options, DIALECT) {
                Ok(v) => v,
                Err(e) => return Outcome::Err(e),
            };
            match self.conn.query(cx, &sql, &params).await {
                Outcome::Ok(rows) => {
                    Outcome::Ok(rows.into_iter().map(Row::into_record).collect())
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn insert(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        data: &Record,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        async move {
            let table = self.table_name(schema.table());
            let (sql, params) = match build_insert(&table, schema, data, DIALECT) {
                Ok(v) => v,
                Err(e) => return Outcome::Err(e),
            };
            self.conn.insert(cx, &sql, &params).await
        }
    }

    fn update(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        id: i64,
        data: &Record,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        async move {
            let table = self.table_name(schema.table());
            let (sql, params) = match build_update(&table, schema, id, data, DIALECT) {
                Ok(v) => v,
                Err(e) => return Outcome::Err(e),
            };
            match self.conn.execute(cx, &sql, &params).await {
                Outcome::Ok(_) => Outcome::Ok(id),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn delete(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        id: i64,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            let table = self.table_name(schema.table());
            let (sql, params) = match build_delete(&table, schema, id, DIALECT) {
                Ok(v) => v,
                Err(e) => return Outcome::Err(e),
            };
            // Zero affected rows means the id was absent; that is a no-op.
            match self.conn.execute(cx, &sql, &params).await {
                Outcome::Ok(_) => Outcome::Ok(()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn count(
        &self,
        cx: &Cx,
        schema: &TableSchema,
        predicate: &Predicate,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let table = self.table_name(schema.table());
            let (sql, params) = match build_count(&table, predicate, DIALECT) {
                Ok(v) => v,
                Err(e) => return Outcome::Err(e),
            };
            match self.conn.query(cx, &sql, &params).await {
                Outcome::Ok(rows) => {
                    let count = rows
                        .first()
                        .and_then(|row| row.get(0))
                        .and_then(Value::coerce_i64)
                        .unwrap_or(0);
                    Outcome::Ok(count.max(0) as u64)
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anymodel_core::{ColumnSet, FieldDef, FieldType, Filter, IndexDef};
    use asupersync::runtime::RuntimeBuilder;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    /// Scripted connection: logs every statement, pops queued query results.
    #[derive(Debug, Clone, Default)]
    struct FakeConnection {
        log: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
        query_results: Arc<Mutex<VecDeque<Vec<Row>>>>,
    }

    impl FakeConnection {
        fn push_rows(&self, rows: Vec<Row>) {
            self.query_results.lock().unwrap().push_back(rows);
        }

        fn statements(&self) -> Vec<String> {
            self.log.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
        }
    }

    fn single_value_row(value: Value) -> Row {
        Row::new(Arc::new(ColumnSet::new(vec!["c0".to_string()])), vec![value])
    }

    impl SqlConnection for FakeConnection {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            self.log
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            let rows = self
                .query_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            async move { Outcome::Ok(rows) }
        }

        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            self.log
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            async move { Outcome::Ok(1) }
        }

        fn insert(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<i64, Error>> + Send {
            self.log
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            async move { Outcome::Ok(7) }
        }
    }

    fn schema_v1() -> TableSchema {
        TableSchema::builder("users", 1)
            .field(FieldDef::new("name", FieldType::String).required())
            .index(IndexDef::new(&["name"]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_initialize_fresh_table() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            // select_version returns no rows -> fresh table.
            conn.push_rows(vec![]);
            let backend = PostgresBackend::new(conn.clone());

            unwrap_outcome(backend.initialize_table(&cx, &schema_v1()).await);

            let stmts = conn.statements();
            assert!(stmts[0].contains("CREATE TABLE IF NOT EXISTS \"schema_versions\""));
            assert!(stmts[1].contains("SELECT \"version\" FROM \"schema_versions\""));
            assert!(stmts[2].contains("CREATE TABLE IF NOT EXISTS \"users\""));
            assert!(stmts[3].contains("CREATE INDEX IF NOT EXISTS \"users_name_idx\""));
            assert!(stmts[4].contains("INSERT INTO \"schema_versions\""));
            assert_eq!(stmts.len(), 5);
        });
    }

    #[test]
    fn test_initialize_synced_table_is_noop() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            conn.push_rows(vec![single_value_row(Value::Int(1))]);
            let backend = PostgresBackend::new(conn.clone());

            unwrap_outcome(backend.initialize_table(&cx, &schema_v1()).await);

            let stmts = conn.statements();
            // Version table DDL + version select only; no table DDL.
            assert_eq!(stmts.len(), 2);
        });
    }

    #[test]
    fn test_initialize_version_upgrade() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            conn.push_rows(vec![single_value_row(Value::Int(1))]);
            // Live columns reported by information_schema.
            let cols = Arc::new(ColumnSet::new(vec![
                "column_name".to_string(),
                "data_type".to_string(),
            ]));
            conn.push_rows(vec![
                Row::new(
                    Arc::clone(&cols),
                    vec![Value::Text("id".into()), Value::Text("integer".into())],
                ),
                Row::new(
                    Arc::clone(&cols),
                    vec![Value::Text("name".into()), Value::Text("varchar".into())],
                ),
            ]);

            let v2 = TableSchema::builder("users", 2)
                .field(FieldDef::new("name", FieldType::String).required())
                .field(FieldDef::new("team_id", FieldType::Int).foreign("teams", "id"))
                .build()
                .unwrap();
            let backend = PostgresBackend::new(conn.clone());
            unwrap_outcome(backend.initialize_table(&cx, &v2).await);

            let stmts = conn.statements();
            assert!(stmts[2].contains("information_schema.columns"));
            assert_eq!(
                stmts[3],
                "ALTER TABLE \"users\" ADD COLUMN \"team_id\" INTEGER"
            );
            assert!(stmts[4].contains("ADD CONSTRAINT \"fk_users_team_id\""));
            assert!(stmts[5].starts_with("UPDATE \"schema_versions\""));
        });
    }

    #[test]
    fn test_search_converts_rows_and_prefixes_table() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            let cols = Arc::new(ColumnSet::new(vec!["id".to_string(), "name".to_string()]));
            conn.push_rows(vec![Row::new(
                Arc::clone(&cols),
                vec![Value::Int(1), Value::Text("arg_a".into())],
            )]);

            let backend = PostgresBackend::with_prefix(conn.clone(), "app_");
            let rows = unwrap_outcome(
                backend
                    .search(
                        &cx,
                        &schema_v1(),
                        &Filter::by("name", "arg_a").into_predicate(),
                        &SearchOptions::new(),
                    )
                    .await,
            );
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].get("name"), Some(&Value::Text("arg_a".into())));

            let (sql, params) = conn.log.lock().unwrap()[0].clone();
            assert!(sql.contains("FROM \"app_users\""));
            assert!(sql.contains("WHERE (\"name\" = $1)"));
            assert_eq!(params, vec![Value::Text("arg_a".into())]);
        });
    }

    #[test]
    fn test_insert_and_count() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            conn.push_rows(vec![single_value_row(Value::Int(3))]);
            let backend = PostgresBackend::new(conn.clone());
            let schema = schema_v1();

            let mut data = Record::new();
            data.insert("name".to_string(), Value::Text("arg_a".into()));
            let id = unwrap_outcome(backend.insert(&cx, &schema, &data).await);
            assert_eq!(id, 7);

            let count =
                unwrap_outcome(backend.count(&cx, &schema, &Predicate::match_all()).await);
            assert_eq!(count, 3);

            let stmts = conn.statements();
            assert!(stmts[0].ends_with("RETURNING \"id\""));
            assert!(stmts[1].starts_with("SELECT COUNT(*)"));
        });
    }

    #[test]
    fn test_update_returns_id_and_delete_is_silent() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            let backend = PostgresBackend::new(conn.clone());
            let schema = schema_v1();

            let mut data = Record::new();
            data.insert("name".to_string(), Value::Text("x".into()));
            let id = unwrap_outcome(backend.update(&cx, &schema, 5, &data).await);
            assert_eq!(id, 5);

            unwrap_outcome(backend.delete(&cx, &schema, 5).await);
            let stmts = conn.statements();
            assert!(stmts[1].starts_with("DELETE FROM \"users\""));
        });
    }
}
