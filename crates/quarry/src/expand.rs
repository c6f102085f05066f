//! Relationship expansion.
//!
//! Attaches related rows to a batch of same-table records via the
//! snapshot's derived relationships. Expansion is strictly best-effort:
//! a failed lookup is logged and that relation omitted, never failing
//! the parent request.

use crate::conn::Connection;
use crate::error::Error;
use crate::record::{decode_row, sql_params};
use quarry_schema::{Relationship, RelationshipKind, Snapshot, Table};
use quarry_sql::{Record, Value, placeholder, qualify, quote_ident};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio_postgres::types::ToSql;
use tracing::{debug, warn};

/// Relation paths may nest at most this deep; deeper segments are
/// silently truncated.
pub const MAX_EXPAND_DEPTH: usize = 2;

/// The key under which expanded relations are attached.
const EXPAND_FIELD: &str = "expand";

/// Where the expander gets related records from.
///
/// The production implementation decodes rows fetched through a
/// [`Connection`]; tests substitute canned data.
pub trait RecordSource: Send + Sync {
    /// Run a query and decode every row into a [`Record`].
    fn query_records<'a>(
        &'a self,
        table: &'a str,
        sql: &'a str,
        args: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>, Error>> + Send + 'a>>;
}

/// A [`RecordSource`] over a live connection.
pub struct DbRecords<'c> {
    conn: &'c dyn Connection,
}

impl<'c> DbRecords<'c> {
    pub fn new(conn: &'c dyn Connection) -> Self {
        Self { conn }
    }
}

impl RecordSource for DbRecords<'_> {
    fn query_records<'a>(
        &'a self,
        table: &'a str,
        sql: &'a str,
        args: &'a [Value],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>, Error>> + Send + 'a>> {
        Box::pin(async move {
            let params = sql_params(args);
            let refs: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
            let rows = self.conn.query(sql, &refs).await?;
            rows.iter().map(|row| decode_row(row, table)).collect()
        })
    }
}

/// Expand the requested relations onto `records` in place.
///
/// `spec` is a comma-separated list of relation paths, each optionally
/// dot-nested (e.g. `"author,comments.author"`).
pub async fn expand(
    conn: &dyn Connection,
    snapshot: &Snapshot,
    table: &Table,
    records: &mut [Record],
    spec: &str,
) {
    let source = DbRecords::new(conn);
    expand_with(&source, snapshot, table, records, spec).await;
}

/// Like [`expand`], over any [`RecordSource`].
pub async fn expand_with(
    source: &dyn RecordSource,
    snapshot: &Snapshot,
    table: &Table,
    records: &mut [Record],
    spec: &str,
) {
    if records.is_empty() {
        return;
    }
    for path in parse_expand_spec(spec) {
        expand_path(source, snapshot, table, records, &path).await;
    }
}

/// Split an expand spec into depth-limited relation paths.
fn parse_expand_spec(spec: &str) -> Vec<Vec<String>> {
    spec.split(',')
        .filter_map(|path| {
            let segments: Vec<String> = path
                .split('.')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .take(MAX_EXPAND_DEPTH)
                .collect();
            (!segments.is_empty()).then_some(segments)
        })
        .collect()
}

/// Resolve one path segment against a table's relationships: the
/// relationship's field name first, then the raw FK column name for
/// single-column many-to-one relations. First match wins.
fn resolve_segment<'a>(table: &'a Table, segment: &str) -> Option<&'a Relationship> {
    table
        .relationships
        .iter()
        .find(|r| r.field_name == segment)
        .or_else(|| {
            table.relationships.iter().find(|r| {
                r.kind == RelationshipKind::ManyToOne
                    && matches!(r.from_columns.as_slice(), [column] if column == segment)
            })
        })
}

/// Render a join value as a map key. Non-scalar values don't join.
fn join_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(v) => Some(v.to_string()),
        Value::I16(v) => Some(v.to_string()),
        Value::I32(v) => Some(v.to_string()),
        Value::I64(v) => Some(v.to_string()),
        Value::F32(v) => Some(v.to_string()),
        Value::F64(v) => Some(v.to_string()),
        Value::Decimal(v) => Some(v.to_string()),
        Value::String(v) => Some(v.clone()),
        Value::Uuid(v) => Some(v.to_string()),
        Value::Bytes(_) | Value::Json(_) | Value::Array(_) | Value::Record(_) => None,
    }
}

/// Get (or lazily create) a record's `expand` container, so multiple
/// relation paths on the same record compose.
fn expand_container(record: &mut Record) -> &mut Record {
    let entry = record
        .entry(EXPAND_FIELD.to_string())
        .or_insert_with(|| Value::Record(Record::new()));
    if entry.as_record().is_none() {
        *entry = Value::Record(Record::new());
    }
    entry.as_record_mut().expect("entry was just made a record")
}

fn expand_path<'a>(
    source: &'a dyn RecordSource,
    snapshot: &'a Snapshot,
    table: &'a Table,
    records: &'a mut [Record],
    path: &'a [String],
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        let Some((segment, rest)) = path.split_first() else {
            return;
        };
        let Some(rel) = resolve_segment(table, segment) else {
            // No match silently skips the segment and anything nested
            // under it.
            debug!(table = %table.name, segment = %segment, "no relation matches expand segment");
            return;
        };
        if rel.from_columns.len() != 1 || rel.to_columns.len() != 1 {
            debug!(relation = %rel.name, "multi-column relationships are not expandable");
            return;
        }
        let Some(target) = snapshot.table_named(&rel.to_schema, &rel.to_table) else {
            debug!(relation = %rel.name, "expand target is not in the snapshot");
            return;
        };

        let local = &rel.from_columns[0];
        let remote = &rel.to_columns[0];

        // Distinct non-null join values across the whole batch,
        // duplicates removed, first-seen order.
        let mut seen: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        for record in records.iter() {
            let Some(value) = record.get(local) else {
                continue;
            };
            if let Some(key) = join_key(value)
                && !seen.contains(&key)
            {
                seen.push(key);
                values.push(value.clone());
            }
        }
        if values.is_empty() {
            return;
        }

        // Exactly one extra query per relation, batched via an IN list.
        let columns: Vec<String> = target
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect();
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(", ")
        };
        let placeholders: Vec<String> = (1..=values.len()).map(placeholder).collect();
        let sql = format!(
            "SELECT {projection} FROM {} WHERE {} IN ({})",
            qualify(&target.schema, &target.name),
            quote_ident(remote),
            placeholders.join(", ")
        );

        let target_key = target.key();
        let mut related = match source.query_records(&target_key, &sql, &values).await {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    error = %e,
                    relation = %rel.field_name,
                    "expansion query failed, omitting relation"
                );
                return;
            }
        };

        // Nesting recurses into the just-fetched related records, one
        // depth level at a time, before they are attached.
        if !rest.is_empty() {
            expand_path(source, snapshot, target, &mut related, rest).await;
        }

        match rel.kind {
            RelationshipKind::ManyToOne => {
                let mut by_key: HashMap<String, Record> = HashMap::new();
                for record in related {
                    if let Some(key) = record.get(remote).and_then(join_key) {
                        by_key.entry(key).or_insert(record);
                    }
                }
                for record in records.iter_mut() {
                    let Some(key) = record.get(local).and_then(join_key) else {
                        continue;
                    };
                    // Unmatched records are left unexpanded.
                    let Some(matched) = by_key.get(&key) else {
                        continue;
                    };
                    expand_container(record)
                        .insert(rel.field_name.clone(), Value::Record(matched.clone()));
                }
            }
            RelationshipKind::OneToMany => {
                // Child order is whatever the backing query returned.
                let mut by_key: HashMap<String, Vec<Record>> = HashMap::new();
                for record in related {
                    if let Some(key) = record.get(remote).and_then(join_key) {
                        by_key.entry(key).or_default().push(record);
                    }
                }
                for record in records.iter_mut() {
                    let Some(key) = record.get(local).and_then(join_key) else {
                        continue;
                    };
                    let Some(matched) = by_key.get(&key) else {
                        continue;
                    };
                    let list = matched.iter().cloned().map(Value::Record).collect();
                    expand_container(record).insert(rel.field_name.clone(), Value::Array(list));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests;
