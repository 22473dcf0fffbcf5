//! The MySQL [`Backend`] adapter.

use std::future::Future;

use asupersync::{Cx, Outcome};

use anymodel_core::{
    Backend, Dialect, Error, Predicate, Record, Row, SearchOptions, SqlConnection, TableSchema,
    Value,
};
use anymodel_query::{build_count, build_delete, build_insert, build_select, build_update};
use anymodel_schema::reconcile::SchemaOperation;
use anymodel_schema::{VERSION_TABLE, apply_prefix, ddl, introspect, plan};

use crate::config::MySqlConfig;
use crate::connection::MySqlConnection;

const DIALECT: Dialect = Dialect::MySql;

/// MySQL storage backend, generic over the connection so the adapter logic
/// can run against a scripted fake in tests.
#[derive(Debug, Clone)]
pub struct MySqlBackend<C> {
    conn: C,
    prefix: Option<String>,
}

impl MySqlBackend<MySqlConnection> {
    /// Build a backend over a lazily-connecting handle for `config`,
    /// carrying the config's table prefix.
    #[must_use]
    pub fn connect(config: MySqlConfig) -> Self {
        let prefix = config.table_prefix.clone();
        Self {
            conn: MySqlConnection::new(config),
            prefix,
        }
    }
}

impl<C: SqlConnection> MySqlBackend<C> {
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

    async fn index_exists(&self, cx: &Cx, table: &str, index: &str) -> Outcome<bool, Error> {
        let (sql, params) = introspect::index_exists_query(table, index, DIALECT);
        match self.conn.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => {
                let count = rows
                    .first()
                    .and_then(|row| row.get(0))
                    .and_then(Value::coerce_i64)
                    .unwrap_or(0);
                Outcome::Ok(count > 0)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
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
            SchemaOperation::CreateIndex(index) => {
                // MySQL has no CREATE INDEX IF NOT EXISTS; probe the catalog
                // first so re-initialization stays idempotent.
                let name = index.effective_name(table);
                match self.index_exists(cx, table, &name).await {
                    Outcome::Ok(true) => return Outcome::Ok(()),
                    Outcome::Ok(false) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
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

impl<C: SqlConnection> Backend for MySqlBackend<C> {
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
    use anymodel_core::{ColumnSet, FieldDef, FieldType, IndexDef};
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
            Dialect::MySql
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
            async move { Outcome::Ok(11) }
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
    fn test_initialize_fresh_table_probes_index() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            conn.push_rows(vec![]); // select_version: no row
            conn.push_rows(vec![single_value_row(Value::Int(0))]); // index probe: absent
            let backend = MySqlBackend::new(conn.clone());

            unwrap_outcome(backend.initialize_table(&cx, &schema_v1()).await);

            let stmts = conn.statements();
            assert!(stmts[0].contains("CREATE TABLE IF NOT EXISTS `schema_versions`"));
            assert!(stmts[1].contains("SELECT `version` FROM `schema_versions`"));
            assert!(stmts[2].contains("CREATE TABLE IF NOT EXISTS `users`"));
            assert!(stmts[3].contains("information_schema.statistics"));
            assert!(stmts[4].contains("CREATE INDEX `users_name_idx`"));
            assert!(stmts[5].contains("INSERT INTO `schema_versions`"));
        });
    }

    #[test]
    fn test_existing_index_is_skipped() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            conn.push_rows(vec![]); // select_version: no row
            conn.push_rows(vec![single_value_row(Value::Int(1))]); // index probe: exists
            let backend = MySqlBackend::new(conn.clone());

            unwrap_outcome(backend.initialize_table(&cx, &schema_v1()).await);

            let stmts = conn.statements();
            assert!(!stmts.iter().any(|s| s.starts_with("CREATE INDEX")));
            assert!(stmts.iter().any(|s| s.contains("INSERT INTO `schema_versions`")));
        });
    }

    #[test]
    fn test_offset_without_limit_fails_before_io() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            let backend = MySqlBackend::new(conn.clone());
            let outcome = backend
                .search(
                    &cx,
                    &schema_v1(),
                    &Predicate::match_all(),
                    &SearchOptions::new().offset(5),
                )
                .await;
            let Outcome::Err(err) = outcome else {
                panic!("expected UnsupportedQuery");
            };
            assert!(matches!(err, Error::UnsupportedQuery(_)));
            // Nothing was sent to the connection.
            assert!(conn.statements().is_empty());
        });
    }

    #[test]
    fn test_insert_uses_last_insert_id() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            let backend = MySqlBackend::new(conn.clone());
            let mut data = Record::new();
            data.insert("name".to_string(), Value::Text("arg_a".into()));

            let id = unwrap_outcome(backend.insert(&cx, &schema_v1(), &data).await);
            assert_eq!(id, 11);
            let stmts = conn.statements();
            assert_eq!(stmts[0], "INSERT INTO `users` (`name`) VALUES (?)");
            assert!(!stmts[0].contains("RETURNING"));
        });
    }

    #[test]
    fn test_count_coerces_text_protocol_numbers() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = FakeConnection::default();
            conn.push_rows(vec![single_value_row(Value::Text("3".into()))]);
            let backend = MySqlBackend::new(conn.clone());
            let count = unwrap_outcome(
                backend
                    .count(&cx, &schema_v1(), &Predicate::match_all())
                    .await,
            );
            assert_eq!(count, 3);
        });
    }
}
