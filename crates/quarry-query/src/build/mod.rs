//! Query building for the dynamic record API.
//!
//! Every builder is a pure function from snapshot metadata plus request
//! parameters to a [`Query`]. Identifiers are interpolated only after
//! they passed snapshot validation, always double-quote-escaped; every
//! free-form value travels as a positional argument.

use crate::CompileError;
use crate::filter::compile_filter;
use quarry_schema::{Column, JsonType, Table};
use quarry_sql::{Record, Value, placeholder, qualify, quote_ident};

mod sort;
pub use sort::{SortField, parse_sort};

/// A SQL statement with its ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The SQL string with `$1`, `$2`, ... placeholders.
    pub sql: String,
    /// Arguments in placeholder order.
    pub args: Vec<Value>,
}

/// The statements backing one list request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// Total-count statement; `None` when the caller skipped counting.
    /// Shares the data statement's filter-argument prefix.
    pub count: Option<Query>,
    /// The data statement. LIMIT and OFFSET are always its final two
    /// placeholders, after any filter arguments.
    pub data: Query,
}

/// Parameters for a list request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListParams {
    /// Filter expression; empty means no filter.
    pub filter: String,
    /// Sort expression; empty means no ordering.
    pub sort: String,
    /// Requested projection; empty means all columns.
    pub fields: Vec<String>,
    /// 1-based page number; values below 1 are clamped.
    pub page: i64,
    /// Page size; values below 1 are clamped.
    pub per_page: i64,
    /// Skip the COUNT statement entirely.
    pub skip_count: bool,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            filter: String::new(),
            sort: String::new(),
            fields: vec![],
            page: 1,
            per_page: 30,
            skip_count: false,
        }
    }
}

/// Build the projection list: requested fields intersected with known
/// columns, in requested order. An empty intersection falls back to `*`
/// rather than an invalid empty select list.
fn projection(table: &Table, fields: &[String]) -> String {
    let known: Vec<String> = fields
        .iter()
        .filter(|f| table.has_column(f))
        .map(|f| quote_ident(f))
        .collect();
    if known.is_empty() {
        "*".to_string()
    } else {
        known.join(", ")
    }
}

/// Coerce one part of a primary-key identifier by the column's JSON
/// classification, so numeric keys bind numerically. Parts that fail to
/// parse bind as text; the resulting type error is the caller's concern.
fn coerce_id_part(column: Option<&Column>, raw: &str) -> Value {
    match column.map(|c| c.json_type) {
        Some(JsonType::Integer) => raw
            .parse::<i64>()
            .map(Value::I64)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some(JsonType::Number) => raw
            .parse::<f64>()
            .map(Value::F64)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some(JsonType::Boolean) => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        _ => Value::String(raw.to_string()),
    }
}

/// Build the primary-key predicate for a caller-supplied identifier.
///
/// Composite keys split the identifier into exactly as many
/// comma-separated parts as there are key columns (a count mismatch is
/// the caller's concern); parts bind in declared key order, numbered
/// after `offset` already-allocated placeholders.
fn pk_predicate(
    table: &Table,
    id: &str,
    offset: usize,
) -> Result<(String, Vec<Value>), CompileError> {
    let pk = &table.primary_key;
    if pk.is_empty() {
        return Err(CompileError::NoPrimaryKey {
            table: table.key(),
        });
    }

    let parts: Vec<&str> = id.splitn(pk.len(), ',').collect();
    let mut sql = String::new();
    let mut args = Vec::with_capacity(pk.len());
    for (i, col) in pk.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        sql.push_str(&quote_ident(col));
        sql.push_str(" = ");
        sql.push_str(&placeholder(offset + i + 1));
        let raw = parts.get(i).copied().unwrap_or_default();
        args.push(coerce_id_part(table.column(col), raw));
    }
    Ok((sql, args))
}

/// Build a single-row select by primary key.
pub fn select_one(table: &Table, id: &str, fields: &[String]) -> Result<Query, CompileError> {
    let (pk_sql, args) = pk_predicate(table, id, 0)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        projection(table, fields),
        qualify(&table.schema, &table.name),
        pk_sql
    );
    Ok(Query { sql, args })
}

/// Build the count and data statements for a list request.
pub fn list(table: &Table, params: &ListParams) -> Result<ListQuery, CompileError> {
    let filter = compile_filter(table, &params.filter)?;
    let from = qualify(&table.schema, &table.name);
    let where_clause = if filter.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filter.sql)
    };

    let count = (!params.skip_count).then(|| Query {
        sql: format!("SELECT COUNT(*) FROM {from}{where_clause}"),
        args: filter.args.clone(),
    });

    let order_fields = parse_sort(table, &params.sort);
    let order_clause = if order_fields.is_empty() {
        String::new()
    } else {
        let rendered: Vec<String> = order_fields.iter().map(|f| f.to_sql()).collect();
        format!(" ORDER BY {}", rendered.join(", "))
    };

    let page = params.page.max(1);
    let per_page = params.per_page.max(1);
    let mut args = filter.args;
    let limit_idx = args.len() + 1;
    args.push(Value::I64(per_page));
    args.push(Value::I64((page - 1) * per_page));

    let data = Query {
        sql: format!(
            "SELECT {} FROM {from}{where_clause}{order_clause} LIMIT {} OFFSET {}",
            projection(table, &params.fields),
            placeholder(limit_idx),
            placeholder(limit_idx + 1),
        ),
        args,
    };

    Ok(ListQuery { count, data })
}

/// Build an insert from a dynamic payload.
///
/// Payload keys that don't name a known column are silently dropped. An
/// empty effective payload inserts defaults only. The full row comes
/// back via `RETURNING *`.
pub fn insert(table: &Table, payload: &Record) -> Query {
    let from = qualify(&table.schema, &table.name);
    let mut columns = Vec::new();
    let mut args = Vec::new();
    for (key, value) in payload {
        if table.has_column(key) {
            columns.push(quote_ident(key));
            args.push(value.clone());
        }
    }

    if columns.is_empty() {
        return Query {
            sql: format!("INSERT INTO {from} DEFAULT VALUES RETURNING *"),
            args: vec![],
        };
    }

    let placeholders: Vec<String> = (1..=args.len()).map(placeholder).collect();
    Query {
        sql: format!(
            "INSERT INTO {from} ({}) VALUES ({}) RETURNING *",
            columns.join(", "),
            placeholders.join(", ")
        ),
        args,
    }
}

/// Build an update by primary key from a dynamic payload.
///
/// SET columns come from payload keys matching known columns; the WHERE
/// clause's placeholders continue numbering after the SET list.
pub fn update(table: &Table, id: &str, payload: &Record) -> Result<Query, CompileError> {
    let from = qualify(&table.schema, &table.name);
    let mut sets = Vec::new();
    let mut args = Vec::new();
    for (key, value) in payload {
        if table.has_column(key) {
            args.push(value.clone());
            sets.push(format!("{} = {}", quote_ident(key), placeholder(args.len())));
        }
    }

    if sets.is_empty() {
        return Err(CompileError::EmptyPayload {
            table: table.key(),
        });
    }

    let (pk_sql, pk_args) = pk_predicate(table, id, args.len())?;
    args.extend(pk_args);

    Ok(Query {
        sql: format!(
            "UPDATE {from} SET {} WHERE {} RETURNING *",
            sets.join(", "),
            pk_sql
        ),
        args,
    })
}

/// Build a delete by primary key.
///
/// No RETURNING clause: "not found" is decided upstream from the
/// affected-row count.
pub fn delete(table: &Table, id: &str) -> Result<Query, CompileError> {
    let (pk_sql, args) = pk_predicate(table, id, 0)?;
    Ok(Query {
        sql: format!(
            "DELETE FROM {} WHERE {}",
            qualify(&table.schema, &table.name),
            pk_sql
        ),
        args,
    })
}
