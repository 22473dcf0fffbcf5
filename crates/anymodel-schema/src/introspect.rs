//! Live-table introspection queries and their result model.

use anymodel_core::{Dialect, Row, Value};

/// One column of a live table, as reported by the backend's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    /// Column name.
    pub name: String,
    /// Backend-reported type, when available. Informational only: the
    /// additive migration policy never alters existing columns.
    pub data_type: Option<String>,
}

/// The catalog query returning the live columns of `table`.
///
/// Both backends go through `information_schema.columns`; MySQL scopes by
/// the current database, PostgreSQL by the current schema.
#[must_use]
pub fn columns_query(table: &str, dialect: Dialect) -> (String, Vec<Value>) {
    let sql = match dialect {
        Dialect::MySql => {
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? \
             ORDER BY ordinal_position"
        }
        Dialect::Postgres => {
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position"
        }
    };
    (sql.to_string(), vec![Value::Text(table.to_string())])
}

/// The catalog query that checks whether an index exists (MySQL has no
/// `CREATE INDEX IF NOT EXISTS`, so the adapter probes first).
#[must_use]
pub fn index_exists_query(table: &str, index: &str, dialect: Dialect) -> (String, Vec<Value>) {
    let sql = match dialect {
        Dialect::MySql => {
            "SELECT COUNT(*) FROM information_schema.statistics \
             WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?"
        }
        Dialect::Postgres => {
            "SELECT COUNT(*) FROM pg_indexes \
             WHERE schemaname = current_schema() AND tablename = $1 AND indexname = $2"
        }
    };
    (
        sql.to_string(),
        vec![Value::Text(table.to_string()), Value::Text(index.to_string())],
    )
}

/// Decode catalog rows into [`LiveColumn`]s.
#[must_use]
pub fn columns_from_rows(rows: &[Row]) -> Vec<LiveColumn> {
    rows.iter()
        .filter_map(|row| {
            let name = match row.get(0) {
                Some(Value::Text(s)) => s.clone(),
                _ => return None,
            };
            let data_type = match row.get(1) {
                Some(Value::Text(s)) => Some(s.clone()),
                _ => None,
            };
            Some(LiveColumn { name, data_type })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anymodel_core::ColumnSet;
    use std::sync::Arc;

    #[test]
    fn test_columns_query_dialects() {
        let (mysql, params) = columns_query("users", Dialect::MySql);
        assert!(mysql.contains("DATABASE()"));
        assert!(mysql.contains("table_name = ?"));
        assert_eq!(params, vec![Value::Text("users".to_string())]);

        let (pg, _) = columns_query("users", Dialect::Postgres);
        assert!(pg.contains("current_schema()"));
        assert!(pg.contains("table_name = $1"));
    }

    #[test]
    fn test_columns_from_rows() {
        let cols = Arc::new(ColumnSet::new(vec![
            "column_name".to_string(),
            "data_type".to_string(),
        ]));
        let rows = vec![
            Row::new(
                Arc::clone(&cols),
                vec![Value::Text("id".into()), Value::Text("integer".into())],
            ),
            Row::new(Arc::clone(&cols), vec![Value::Text("foo".into()), Value::Null]),
        ];
        let live = columns_from_rows(&rows);
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].name, "id");
        assert_eq!(live[0].data_type.as_deref(), Some("integer"));
        assert_eq!(live[1].data_type, None);
    }
}
