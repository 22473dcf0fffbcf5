//! Flat-file JSON storage backend for anymodel.
//!
//! One file per table, named `<table>.json` under the backend's directory,
//! with the fixed shape:
//!
//! ```json
//! { "auto": { "id": 3 }, "data": [ { "id": 1, "foo": "bar" } ] }
//! ```
//!
//! `auto` tracks the next value per auto-increment field; `data` is the row
//! array in insertion order. Version records live in a regular
//! `schema_versions` table file of the same shape.
//!
//! Every operation is a full-file read-modify-write with **no locking**:
//! concurrent mutations of the same table can race and lose updates. That is
//! an accepted simplification of this backend, not a guarantee — callers
//! needing atomicity must serialize externally.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};

use anymodel_core::{
    Backend, ConnectionErrorKind, Error, Predicate, Record, Result, SearchOptions, TableSchema,
    Value,
};
use anymodel_query::{apply_window, matches, sort_records};

/// Table file holding the version records.
const VERSION_TABLE: &str = "schema_versions";

/// On-disk shape of one table.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TableFile {
    /// Next value per auto-increment field.
    auto: BTreeMap<String, i64>,
    /// Rows in insertion order.
    data: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// A flat-file JSON backend rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    prefix: Option<String>,
}

impl FileBackend {
    /// Create a backend storing its table files under `dir`.
    ///
    /// The directory is created lazily on the first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: None,
        }
    }

    /// Same, with a table-name prefix applied to every file.
    #[must_use]
    pub fn with_prefix(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: Some(prefix.into()),
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

    /// Path of the file backing `table` (already prefixed).
    #[must_use]
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.json"))
    }

    fn load(&self, table: &str) -> Result<TableFile> {
        let path = self.table_path(table);
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                Error::database(format!("malformed table file {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TableFile::default()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn store(&self, table: &str, file: &TableFile) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let path = self.table_path(table);
        let text = serde_json::to_string(file)
            .map_err(|e| Error::database(format!("failed to encode table file: {e}")))?;
        std::fs::write(&path, text).map_err(|e| io_error(&path, e))
    }

    fn load_version(&self, table: &str) -> Result<Option<i64>> {
        let versions = self.load(&self.table_name(VERSION_TABLE))?;
        Ok(versions.data.iter().find_map(|row| {
            (row.get("table_name").and_then(serde_json::Value::as_str) == Some(table))
                .then(|| row.get("version").and_then(serde_json::Value::as_i64))
                .flatten()
        }))
    }

    fn store_version(&self, table: &str, version: i64) -> Result<()> {
        let mut versions = self.load(&self.table_name(VERSION_TABLE))?;
        let existing = versions
            .data
            .iter_mut()
            .find(|row| row.get("table_name").and_then(serde_json::Value::as_str) == Some(table));
        match existing {
            Some(row) => {
                row.insert("version".to_string(), serde_json::Value::from(version));
            }
            None => {
                let mut row = serde_json::Map::new();
                row.insert("table_name".to_string(), serde_json::Value::from(table));
                row.insert("version".to_string(), serde_json::Value::from(version));
                versions.data.push(row);
            }
        }
        self.store(&self.table_name(VERSION_TABLE), &versions)
    }

    /// Stored schema version for a table, if initialized. Test hook.
    pub fn stored_version(&self, table: &str) -> Result<Option<i64>> {
        self.load_version(&self.table_name(table))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    Error::Connection(anymodel_core::ConnectionError {
        kind: ConnectionErrorKind::Io,
        message: format!("{}: {e}", path.display()),
        source: Some(Box::new(e)),
    })
}

fn record_to_json(record: &Record) -> serde_json::Map<String, serde_json::Value> {
    record
        .iter()
        .map(|(k, v)| (k.clone(), v.clone().into_json()))
        .collect()
}

fn record_from_json(row: &serde_json::Map<String, serde_json::Value>) -> Record {
    row.iter()
        .map(|(k, v)| (k.clone(), Value::from_json(v.clone())))
        .collect()
}

fn row_id(row: &serde_json::Map<String, serde_json::Value>, id_field: &str) -> Option<i64> {
    row.get(id_field).and_then(serde_json::Value::as_i64)
}

impl Backend for FileBackend {
    fn initialize_table(
        &self,
        _cx: &Cx,
        schema: &TableSchema,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let backend = self.clone();
        let table = self.table_name(schema.table());
        let version = schema.version();
        async move {
            let result = (|| {
                match backend.load_version(&table)? {
                    None => {
                        // Create the table file if this is the first init.
                        let file = backend.load(&table)?;
                        backend.store(&table, &file)?;
                        backend.store_version(&table, version)?;
                        tracing::debug!(table = %table, version, "created table file");
                    }
                    Some(stored) if stored == version => {
                        tracing::debug!(table = %table, version, "table file already synced");
                    }
                    Some(stored) => {
                        // Rows are schemaless; bumping the version is the
                        // whole migration. Old rows read new fields as null.
                        backend.store_version(&table, version)?;
                        tracing::debug!(table = %table, from = stored, to = version, "bumped table version");
                    }
                }
                Ok(())
            })();
            match result {
                Ok(()) => Outcome::Ok(()),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn search(
        &self,
        _cx: &Cx,
        schema: &TableSchema,
        predicate: &Predicate,
        options: &SearchOptions,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send {
        let backend = self.clone();
        let table = self.table_name(schema.table());
        let predicate = predicate.clone();
        let options = options.clone();
        async move {
            let file = match backend.load(&table) {
                Ok(f) => f,
                Err(e) => return Outcome::Err(e),
            };
            let mut hits: Vec<Record> = file
                .data
                .iter()
                .map(record_from_json)
                .filter(|row| matches(&predicate, row))
                .collect();
            sort_records(&mut hits, &options.order);
            Outcome::Ok(apply_window(hits, options.limit, options.offset))
        }
    }

    fn insert(
        &self,
        _cx: &Cx,
        schema: &TableSchema,
        data: &Record,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let backend = self.clone();
        let table = self.table_name(schema.table());
        let auto = schema.auto_field().map(|f| f.name.clone());
        let data = data.clone();
        async move {
            let result = (|| {
                let mut file = backend.load(&table)?;
                let mut row = record_to_json(&data);
                let id = match auto {
                    Some(field) => {
                        let counter = file.auto.entry(field.clone()).or_insert(1);
                        let id = *counter;
                        *counter += 1;
                        row.insert(field, serde_json::Value::from(id));
                        id
                    }
                    None => 0,
                };
                file.data.push(row);
                backend.store(&table, &file)?;
                Ok(id)
            })();
            match result {
                Ok(id) => Outcome::Ok(id),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn update(
        &self,
        _cx: &Cx,
        schema: &TableSchema,
        id: i64,
        data: &Record,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let backend = self.clone();
        let table = self.table_name(schema.table());
        let id_field = schema
            .auto_field()
            .map_or_else(|| "id".to_string(), |f| f.name.clone());
        let data = data.clone();
        async move {
            let result = (|| {
                let mut file = backend.load(&table)?;
                let mut touched = false;
                for row in &mut file.data {
                    if row_id(row, &id_field) == Some(id) {
                        for (k, v) in &data {
                            row.insert(k.clone(), v.clone().into_json());
                        }
                        touched = true;
                        break;
                    }
                }
                if touched {
                    backend.store(&table, &file)?;
                }
                Ok(id)
            })();
            match result {
                Ok(id) => Outcome::Ok(id),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn delete(
        &self,
        _cx: &Cx,
        schema: &TableSchema,
        id: i64,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let backend = self.clone();
        let table = self.table_name(schema.table());
        let id_field = schema
            .auto_field()
            .map_or_else(|| "id".to_string(), |f| f.name.clone());
        async move {
            let result = (|| {
                let mut file = backend.load(&table)?;
                let before = file.data.len();
                file.data.retain(|row| row_id(row, &id_field) != Some(id));
                if file.data.len() != before {
                    backend.store(&table, &file)?;
                }
                // Absent ids are a no-op by contract.
                Ok(())
            })();
            match result {
                Ok(()) => Outcome::Ok(()),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn count(
        &self,
        _cx: &Cx,
        schema: &TableSchema,
        predicate: &Predicate,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let backend = self.clone();
        let table = self.table_name(schema.table());
        let predicate = predicate.clone();
        async move {
            let file = match backend.load(&table) {
                Ok(f) => f,
                Err(e) => return Outcome::Err(e),
            };
            let count = file
                .data
                .iter()
                .map(record_from_json)
                .filter(|row| matches(&predicate, row))
                .count();
            Outcome::Ok(count as u64)
        }
    }
}
