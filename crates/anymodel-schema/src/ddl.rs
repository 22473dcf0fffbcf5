//! DDL text generation, per dialect.

use anymodel_core::{Dialect, FieldDef, FieldType, IndexDef, TableSchema, Value};

/// Name of the version-tracking table (before prefixing).
pub const VERSION_TABLE: &str = "schema_versions";

/// Default width for STRING columns without an explicit size.
const DEFAULT_STRING_SIZE: u32 = 255;

/// Apply a connection's optional table prefix.
#[must_use]
pub fn apply_prefix(prefix: Option<&str>, table: &str) -> String {
    match prefix {
        Some(p) => format!("{p}{table}"),
        None => table.to_string(),
    }
}

/// The column type text for a field in the given dialect.
#[must_use]
pub fn column_type(field: &FieldDef, dialect: Dialect) -> String {
    let size = field.size.unwrap_or(DEFAULT_STRING_SIZE);
    match (dialect, field.field_type) {
        (Dialect::MySql, FieldType::Int) => "INT".to_string(),
        (Dialect::MySql, FieldType::BigInt) => "BIGINT".to_string(),
        (Dialect::MySql, FieldType::String) => format!("VARCHAR({size})"),
        (Dialect::MySql, FieldType::Json) => "JSON".to_string(),
        (Dialect::MySql, FieldType::Boolean) => "TINYINT(1)".to_string(),
        (Dialect::Postgres, FieldType::Int) => {
            if field.auto { "SERIAL" } else { "INTEGER" }.to_string()
        }
        (Dialect::Postgres, FieldType::BigInt) => {
            if field.auto { "BIGSERIAL" } else { "BIGINT" }.to_string()
        }
        (Dialect::Postgres, FieldType::String) => format!("VARCHAR({size})"),
        (Dialect::Postgres, FieldType::Json) => "JSONB".to_string(),
        (Dialect::Postgres, FieldType::Boolean) => "BOOLEAN".to_string(),
    }
}

fn column_def(field: &FieldDef, dialect: Dialect) -> String {
    let mut def = format!("{} {}", dialect.quote(&field.name), column_type(field, dialect));
    if field.auto {
        match dialect {
            Dialect::MySql => def.push_str(" NOT NULL AUTO_INCREMENT PRIMARY KEY"),
            Dialect::Postgres => def.push_str(" PRIMARY KEY"),
        }
    } else if field.required {
        def.push_str(" NOT NULL");
    }
    def
}

/// Deterministic foreign-key constraint name.
#[must_use]
pub fn foreign_key_name(table: &str, field: &str) -> String {
    format!("fk_{table}_{field}")
}

/// `CREATE TABLE IF NOT EXISTS` from the full declared field list.
///
/// `table` is the prefixed physical name; foreign-key targets are prefixed
/// with the same connection prefix.
#[must_use]
pub fn create_table(
    table: &str,
    schema: &TableSchema,
    prefix: Option<&str>,
    dialect: Dialect,
) -> String {
    let mut items: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| column_def(f, dialect))
        .collect();

    // MySQL ignores inline column REFERENCES, so both dialects get
    // table-level constraints.
    for field in schema.fields() {
        if let Some(fk) = &field.foreign {
            let ref_table = apply_prefix(prefix, &fk.table);
            items.push(format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                dialect.quote(&foreign_key_name(table, &field.name)),
                dialect.quote(&field.name),
                dialect.quote(&ref_table),
                dialect.quote(&fk.field),
            ));
        }
    }

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        dialect.quote(table),
        items.join(", ")
    );
    tracing::debug!(sql = %sql, "generated CREATE TABLE");
    sql
}

/// `ALTER TABLE ... ADD COLUMN` for one additively-migrated field.
#[must_use]
pub fn add_column(table: &str, field: &FieldDef, dialect: Dialect) -> String {
    // Added columns are never NOT NULL: rows created under the old version
    // must keep reading as null until explicitly set.
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        dialect.quote(table),
        dialect.quote(&field.name),
        column_type(field, dialect),
    );
    tracing::debug!(sql = %sql, "generated ADD COLUMN");
    sql
}

/// Follow-up `ADD CONSTRAINT ... FOREIGN KEY` for an added column.
#[must_use]
pub fn add_foreign_key(
    table: &str,
    field: &FieldDef,
    prefix: Option<&str>,
    dialect: Dialect,
) -> Option<String> {
    let fk = field.foreign.as_ref()?;
    let ref_table = apply_prefix(prefix, &fk.table);
    Some(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        dialect.quote(table),
        dialect.quote(&foreign_key_name(table, &field.name)),
        dialect.quote(&field.name),
        dialect.quote(&ref_table),
        dialect.quote(&fk.field),
    ))
}

/// `CREATE INDEX` with the deterministic name.
///
/// PostgreSQL carries `IF NOT EXISTS`; MySQL cannot, so the adapter probes
/// `information_schema.statistics` before executing this statement.
#[must_use]
pub fn create_index(table: &str, index: &IndexDef, dialect: Dialect) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let if_not_exists = match dialect {
        Dialect::MySql => "",
        Dialect::Postgres => "IF NOT EXISTS ",
    };
    let columns: Vec<String> = index.fields.iter().map(|f| dialect.quote(f)).collect();
    let sql = format!(
        "CREATE {unique}INDEX {if_not_exists}{} ON {} ({})",
        dialect.quote(&index.effective_name(table)),
        dialect.quote(table),
        columns.join(", ")
    );
    tracing::debug!(sql = %sql, "generated CREATE INDEX");
    sql
}

/// `CREATE TABLE IF NOT EXISTS` for the version-tracking table.
#[must_use]
pub fn create_version_table(version_table: &str, dialect: Dialect) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({} VARCHAR(255) NOT NULL PRIMARY KEY, {} BIGINT NOT NULL)",
        dialect.quote(version_table),
        dialect.quote("table_name"),
        dialect.quote("version"),
    )
}

/// Statement + binds selecting the stored version of `table`.
#[must_use]
pub fn select_version(version_table: &str, table: &str, dialect: Dialect) -> (String, Vec<Value>) {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        dialect.quote("version"),
        dialect.quote(version_table),
        dialect.quote("table_name"),
        dialect.placeholder(1),
    );
    (sql, vec![Value::Text(table.to_string())])
}

/// Statement + binds inserting the first version row for `table`.
#[must_use]
pub fn insert_version(
    version_table: &str,
    table: &str,
    version: i64,
    dialect: Dialect,
) -> (String, Vec<Value>) {
    let sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {})",
        dialect.quote(version_table),
        dialect.quote("table_name"),
        dialect.quote("version"),
        dialect.placeholder(1),
        dialect.placeholder(2),
    );
    (
        sql,
        vec![Value::Text(table.to_string()), Value::Int(version)],
    )
}

/// Statement + binds bumping the stored version for `table`.
#[must_use]
pub fn update_version(
    version_table: &str,
    table: &str,
    version: i64,
    dialect: Dialect,
) -> (String, Vec<Value>) {
    let sql = format!(
        "UPDATE {} SET {} = {} WHERE {} = {}",
        dialect.quote(version_table),
        dialect.quote("version"),
        dialect.placeholder(1),
        dialect.quote("table_name"),
        dialect.placeholder(2),
    );
    (
        sql,
        vec![Value::Int(version), Value::Text(table.to_string())],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anymodel_core::TableSchema;

    fn schema() -> TableSchema {
        TableSchema::builder("heroes", 1)
            .field(FieldDef::new("name", FieldType::String).required().size(100))
            .field(FieldDef::new("power", FieldType::Json))
            .field(FieldDef::new("active", FieldType::Boolean))
            .field(FieldDef::new("team_id", FieldType::Int).foreign("teams", "id"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_table_mysql() {
        let sql = create_table("heroes", &schema(), None, Dialect::MySql);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `heroes` ("));
        assert!(sql.contains("`id` INT NOT NULL AUTO_INCREMENT PRIMARY KEY"));
        assert!(sql.contains("`name` VARCHAR(100) NOT NULL"));
        assert!(sql.contains("`power` JSON"));
        assert!(sql.contains("`active` TINYINT(1)"));
        assert!(sql.contains(
            "CONSTRAINT `fk_heroes_team_id` FOREIGN KEY (`team_id`) REFERENCES `teams` (`id`)"
        ));
    }

    #[test]
    fn test_create_table_postgres() {
        let sql = create_table("heroes", &schema(), None, Dialect::Postgres);
        assert!(sql.contains("\"id\" SERIAL PRIMARY KEY"));
        assert!(sql.contains("\"name\" VARCHAR(100) NOT NULL"));
        assert!(sql.contains("\"power\" JSONB"));
        assert!(sql.contains("\"active\" BOOLEAN"));
    }

    #[test]
    fn test_create_table_applies_prefix_to_fk_target() {
        let sql = create_table("app_heroes", &schema(), Some("app_"), Dialect::Postgres);
        assert!(sql.contains("REFERENCES \"app_teams\" (\"id\")"));
    }

    #[test]
    fn test_bigint_auto_postgres() {
        let schema = TableSchema::builder("events", 1)
            .field(FieldDef::new("id", FieldType::BigInt).auto())
            .build()
            .unwrap();
        let sql = create_table("events", &schema, None, Dialect::Postgres);
        assert!(sql.contains("\"id\" BIGSERIAL PRIMARY KEY"));
    }

    #[test]
    fn test_add_column_is_nullable() {
        let field = FieldDef::new("nickname", FieldType::String).required();
        let sql = add_column("heroes", &field, Dialect::MySql);
        assert_eq!(sql, "ALTER TABLE `heroes` ADD COLUMN `nickname` VARCHAR(255)");
        assert!(!sql.contains("NOT NULL"));
    }

    #[test]
    fn test_add_foreign_key() {
        let field = FieldDef::new("team_id", FieldType::Int).foreign("teams", "id");
        let sql = add_foreign_key("heroes", &field, None, Dialect::Postgres).unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE \"heroes\" ADD CONSTRAINT \"fk_heroes_team_id\" \
             FOREIGN KEY (\"team_id\") REFERENCES \"teams\" (\"id\")"
        );
        assert!(add_foreign_key("heroes", &FieldDef::new("x", FieldType::Int), None, Dialect::Postgres).is_none());
    }

    #[test]
    fn test_create_index() {
        let idx = IndexDef::new(&["name", "team_id"]);
        let pg = create_index("heroes", &idx, Dialect::Postgres);
        assert_eq!(
            pg,
            "CREATE INDEX IF NOT EXISTS \"heroes_name_team_id_idx\" ON \"heroes\" (\"name\", \"team_id\")"
        );

        let unique = IndexDef::new(&["name"]).unique();
        let mysql = create_index("heroes", &unique, Dialect::MySql);
        assert_eq!(
            mysql,
            "CREATE UNIQUE INDEX `heroes_name_idx` ON `heroes` (`name`)"
        );
    }

    #[test]
    fn test_version_table_statements() {
        let sql = create_version_table("schema_versions", Dialect::MySql);
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS `schema_versions`"));

        let (sql, params) = select_version("schema_versions", "heroes", Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT \"version\" FROM \"schema_versions\" WHERE \"table_name\" = $1"
        );
        assert_eq!(params, vec![Value::Text("heroes".to_string())]);

        let (sql, params) = insert_version("schema_versions", "heroes", 2, Dialect::MySql);
        assert_eq!(
            sql,
            "INSERT INTO `schema_versions` (`table_name`, `version`) VALUES (?, ?)"
        );
        assert_eq!(params.len(), 2);

        let (sql, params) = update_version("schema_versions", "heroes", 3, Dialect::Postgres);
        assert_eq!(
            sql,
            "UPDATE \"schema_versions\" SET \"version\" = $1 WHERE \"table_name\" = $2"
        );
        assert_eq!(
            params,
            vec![Value::Int(3), Value::Text("heroes".to_string())]
        );
    }

    #[test]
    fn test_apply_prefix() {
        assert_eq!(apply_prefix(None, "users"), "users");
        assert_eq!(apply_prefix(Some("app_"), "users"), "app_users");
    }
}
