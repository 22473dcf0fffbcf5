//! SQL lowering: predicate trees to parameterized fragments, plus the CRUD
//! statement builders shared by the MySQL and PostgreSQL adapters.
//!
//! Placeholders follow the connection's [`Dialect`] (`?` for MySQL, `$n` for
//! PostgreSQL with one shared position counter). The rewrites that keep SQL
//! row sets identical to the in-process evaluator:
//!
//! - EQ/NE against an array lowers to `IN (...)` / `NOT IN (...)`
//!   (empty arrays become constant false/true);
//! - EQ/NE against NULL lowers to `IS NULL` / `IS NOT NULL`;
//! - EQ against `false` lowers to `(col = ? OR col IS NULL)`, NE to its
//!   negation, preserving the false≈null coalescing.

use anymodel_core::{
    BoolOp, Comparator, Dialect, Error, Predicate, Record, Result, SearchOptions, TableSchema,
    Value,
};

/// Lower a predicate into a SQL fragment, pushing bound values onto `params`.
///
/// The fragment is parenthesized wherever precedence could bite; callers can
/// splice it after `WHERE` untouched.
pub fn compile_predicate(
    predicate: &Predicate,
    dialect: Dialect,
    params: &mut Vec<Value>,
) -> Result<String> {
    match predicate {
        Predicate::Compare { field, op, value } => {
            compile_compare(field, *op, value, dialect, params)
        }
        Predicate::Group { op, children } => {
            if children.is_empty() {
                // An empty AND matches everything, an empty OR nothing.
                return Ok(match op {
                    BoolOp::And => "1 = 1".to_string(),
                    BoolOp::Or => "1 = 0".to_string(),
                });
            }
            let joiner = match op {
                BoolOp::And => " AND ",
                BoolOp::Or => " OR ",
            };
            let mut parts = Vec::with_capacity(children.len());
            for child in children {
                parts.push(compile_predicate(child, dialect, params)?);
            }
            Ok(format!("({})", parts.join(joiner)))
        }
    }
}

fn push_param(params: &mut Vec<Value>, value: Value, dialect: Dialect) -> String {
    params.push(value);
    dialect.placeholder(params.len())
}

fn compile_compare(
    field: &str,
    op: Comparator,
    value: &Value,
    dialect: Dialect,
    params: &mut Vec<Value>,
) -> Result<String> {
    let col = dialect.quote(field);
    match (op, value) {
        (Comparator::Eq | Comparator::Ne, Value::Array(items)) => {
            if items.is_empty() {
                return Ok(match op {
                    Comparator::Eq => "1 = 0".to_string(),
                    _ => "1 = 1".to_string(),
                });
            }
            let placeholders: Vec<String> = items
                .iter()
                .map(|item| push_param(params, item.clone(), dialect))
                .collect();
            let keyword = if op == Comparator::Eq { "IN" } else { "NOT IN" };
            Ok(format!("{col} {keyword} ({})", placeholders.join(", ")))
        }
        (Comparator::Eq, Value::Null) => Ok(format!("{col} IS NULL")),
        (Comparator::Ne, Value::Null) => Ok(format!("{col} IS NOT NULL")),
        (Comparator::Eq, Value::Bool(false)) => {
            let ph = push_param(params, Value::Bool(false), dialect);
            Ok(format!("({col} = {ph} OR {col} IS NULL)"))
        }
        (Comparator::Ne, Value::Bool(false)) => {
            let ph = push_param(params, Value::Bool(false), dialect);
            Ok(format!("({col} <> {ph} AND {col} IS NOT NULL)"))
        }
        // An ordering comparison against NULL matches nothing, same as the
        // in-process evaluator.
        (_, Value::Null) => Ok("1 = 0".to_string()),
        _ => {
            let ph = push_param(params, value.clone(), dialect);
            Ok(format!("{col} {} {ph}", op.as_sql()))
        }
    }
}

fn is_match_all(predicate: &Predicate) -> bool {
    matches!(
        predicate,
        Predicate::Group {
            op: BoolOp::And,
            children
        } if children.is_empty()
    )
}

fn where_clause(
    predicate: &Predicate,
    dialect: Dialect,
    params: &mut Vec<Value>,
) -> Result<String> {
    if is_match_all(predicate) {
        return Ok(String::new());
    }
    let fragment = compile_predicate(predicate, dialect, params)?;
    Ok(format!(" WHERE {fragment}"))
}

fn order_clause(schema: &TableSchema, options: &SearchOptions, dialect: Dialect) -> String {
    if options.order.is_empty() {
        // Deterministic default: ascending by the auto field.
        return match schema.auto_field() {
            Some(auto) => format!(" ORDER BY {} ASC", dialect.quote(&auto.name)),
            None => String::new(),
        };
    }
    let keys: Vec<String> = options
        .order
        .iter()
        .map(|(field, direction)| format!("{} {}", dialect.quote(field), direction.as_sql()))
        .collect();
    format!(" ORDER BY {}", keys.join(", "))
}

fn window_clause(options: &SearchOptions, dialect: Dialect) -> Result<String> {
    match (dialect, options.limit, options.offset) {
        (_, None, None) => Ok(String::new()),
        (Dialect::MySql, Some(limit), Some(offset)) => Ok(format!(" LIMIT {offset}, {limit}")),
        (Dialect::MySql, Some(limit), None) => Ok(format!(" LIMIT {limit}")),
        (Dialect::MySql, None, Some(_)) => Err(Error::UnsupportedQuery(
            "MySQL cannot apply an offset without a limit".to_string(),
        )),
        (Dialect::Postgres, limit, offset) => {
            let mut clause = String::new();
            if let Some(l) = limit {
                clause.push_str(&format!(" LIMIT {l}"));
            }
            if let Some(o) = offset {
                clause.push_str(&format!(" OFFSET {o}"));
            }
            Ok(clause)
        }
    }
}

/// Build a SELECT over the schema's declared columns.
///
/// Selecting the declared columns explicitly (rather than `*`) keeps live
/// columns this model version does not know about out of the result set.
pub fn build_select(
    table: &str,
    schema: &TableSchema,
    predicate: &Predicate,
    options: &SearchOptions,
    dialect: Dialect,
) -> Result<(String, Vec<Value>)> {
    let columns: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| dialect.quote(&f.name))
        .collect();

    let mut params = Vec::new();
    let where_sql = where_clause(predicate, dialect, &mut params)?;
    let order_sql = order_clause(schema, options, dialect);
    let window_sql = window_clause(options, dialect)?;

    let sql = format!(
        "SELECT {} FROM {}{where_sql}{order_sql}{window_sql}",
        columns.join(", "),
        dialect.quote(table),
    );
    tracing::debug!(sql = %sql, "built SELECT");
    Ok((sql, params))
}

/// Build a native `SELECT COUNT(*)`.
pub fn build_count(
    table: &str,
    predicate: &Predicate,
    dialect: Dialect,
) -> Result<(String, Vec<Value>)> {
    let mut params = Vec::new();
    let where_sql = where_clause(predicate, dialect, &mut params)?;
    let sql = format!("SELECT COUNT(*) FROM {}{where_sql}", dialect.quote(table));
    Ok((sql, params))
}

/// Build an INSERT from a validated record.
///
/// The auto field is never in `data` (the facade strips it), so the engine's
/// native auto-increment assigns the id. On PostgreSQL a `RETURNING` clause
/// is appended so the driver can hand the id back.
pub fn build_insert(
    table: &str,
    schema: &TableSchema,
    data: &Record,
    dialect: Dialect,
) -> Result<(String, Vec<Value>)> {
    let mut params = Vec::new();
    let mut sql = if data.is_empty() {
        match dialect {
            Dialect::MySql => format!("INSERT INTO {} () VALUES ()", dialect.quote(table)),
            Dialect::Postgres => {
                format!("INSERT INTO {} DEFAULT VALUES", dialect.quote(table))
            }
        }
    } else {
        let mut columns = Vec::with_capacity(data.len());
        let mut placeholders = Vec::with_capacity(data.len());
        for (name, value) in data {
            columns.push(dialect.quote(name));
            placeholders.push(push_param(&mut params, value.clone(), dialect));
        }
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote(table),
            columns.join(", "),
            placeholders.join(", ")
        )
    };

    if dialect == Dialect::Postgres {
        if let Some(auto) = schema.auto_field() {
            sql.push_str(&format!(" RETURNING {}", dialect.quote(&auto.name)));
        }
    }
    tracing::debug!(sql = %sql, "built INSERT");
    Ok((sql, params))
}

/// Build an UPDATE of the given row id.
pub fn build_update(
    table: &str,
    schema: &TableSchema,
    id: i64,
    data: &Record,
    dialect: Dialect,
) -> Result<(String, Vec<Value>)> {
    if data.is_empty() {
        return Err(Error::UnsupportedQuery(
            "UPDATE with no columns to set".to_string(),
        ));
    }
    let id_field = schema.auto_field().map_or("id", |f| f.name.as_str());

    let mut params = Vec::new();
    let assignments: Vec<String> = data
        .iter()
        .map(|(name, value)| {
            let ph = push_param(&mut params, value.clone(), dialect);
            format!("{} = {ph}", dialect.quote(name))
        })
        .collect();
    let id_ph = push_param(&mut params, Value::Int(id), dialect);

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {id_ph}",
        dialect.quote(table),
        assignments.join(", "),
        dialect.quote(id_field),
    );
    tracing::debug!(sql = %sql, "built UPDATE");
    Ok((sql, params))
}

/// Build a DELETE of the given row id. Deleting an absent id affects zero
/// rows, which the adapter treats as success.
pub fn build_delete(
    table: &str,
    schema: &TableSchema,
    id: i64,
    dialect: Dialect,
) -> Result<(String, Vec<Value>)> {
    let id_field = schema.auto_field().map_or("id", |f| f.name.as_str());
    let mut params = Vec::new();
    let id_ph = push_param(&mut params, Value::Int(id), dialect);
    let sql = format!(
        "DELETE FROM {} WHERE {} = {id_ph}",
        dialect.quote(table),
        dialect.quote(id_field),
    );
    Ok((sql, params))
}
