//! Catalog introspection.
//!
//! [`Introspector::snapshot`] reads the live catalog into a
//! [`Snapshot`] through a caller-supplied executor. It is pure and
//! read-only: a fixed, ordered sequence of catalog queries where later
//! steps resolve against the column/position data loaded by earlier
//! ones. Any query failure aborts the pass; the caller's previous
//! snapshot stays in effect.

use crate::conn::Connection;
use crate::error::IntrospectError;
use crate::record::sql_params;
use chrono::Utc;
use indexmap::IndexMap;
use quarry_schema::{
    Column, EnumType, ForeignKey, Function, FunctionParameter, Index, RefAction, Snapshot, Table,
    TableKind, classify_type, derive_relationships, table_key,
};
use quarry_sql::{Value, escape_like, placeholder};
use std::collections::HashMap;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// The shared schema-exclusion predicate.
///
/// A fixed system-namespace blacklist plus a wildcard pattern, combined
/// with an internal-table name-prefix exclusion. The rendered clause is
/// parameterized with a configurable placeholder offset so it composes
/// after other filter arguments, and it is applied identically to every
/// catalog query.
#[derive(Debug, Clone)]
pub struct SchemaFilter {
    /// Schemas that are never exposed.
    pub hidden_schemas: Vec<String>,
    /// LIKE pattern for further hidden schemas (e.g. per-session temp
    /// namespaces).
    pub hidden_schema_pattern: String,
    /// Tables whose name starts with this prefix are internal and never
    /// exposed. Matched literally, not as a pattern.
    pub internal_table_prefix: String,
}

impl Default for SchemaFilter {
    fn default() -> Self {
        Self {
            hidden_schemas: vec![
                "pg_catalog".to_string(),
                "information_schema".to_string(),
                "pg_toast".to_string(),
            ],
            hidden_schema_pattern: "pg_temp_%".to_string(),
            internal_table_prefix: "_quarry_".to_string(),
        }
    }
}

impl SchemaFilter {
    /// Render the schema-level exclusion for `column` (an SQL reference
    /// like `n.nspname`), with placeholders numbered after `offset`
    /// already-allocated arguments.
    pub fn schema_clause(&self, column: &str, offset: usize) -> (String, Vec<Value>) {
        let mut args = Vec::with_capacity(self.hidden_schemas.len() + 1);
        let mut placeholders = Vec::with_capacity(self.hidden_schemas.len());
        for schema in &self.hidden_schemas {
            args.push(Value::String(schema.clone()));
            placeholders.push(placeholder(offset + args.len()));
        }
        let mut sql = format!("{column} NOT IN ({})", placeholders.join(", "));
        args.push(Value::String(self.hidden_schema_pattern.clone()));
        sql.push_str(&format!(
            " AND {column} NOT LIKE {}",
            placeholder(offset + args.len())
        ));
        (sql, args)
    }

    /// Render the combined schema + internal-table exclusion.
    pub fn table_clause(
        &self,
        schema_column: &str,
        name_column: &str,
        offset: usize,
    ) -> (String, Vec<Value>) {
        let (mut sql, mut args) = self.schema_clause(schema_column, offset);
        args.push(Value::String(format!(
            "{}%",
            escape_like(&self.internal_table_prefix)
        )));
        sql.push_str(&format!(
            " AND {name_column} NOT LIKE {}",
            placeholder(offset + args.len())
        ));
        (sql, args)
    }
}

/// Reads the catalog into a [`Snapshot`]. Stateless; safe to share.
#[derive(Debug, Clone, Default)]
pub struct Introspector {
    pub filter: SchemaFilter,
}

/// Per-table attribute-number to column-name map, used to resolve the
/// ordinal arrays the catalog stores for keys and indexes.
type Positions = HashMap<u32, HashMap<i16, String>>;

impl Introspector {
    /// Create an introspector with the default exclusions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one full introspection pass.
    pub async fn snapshot(&self, conn: &dyn Connection) -> Result<Snapshot, IntrospectError> {
        let enums = self.load_enums(conn).await?;
        let (mut tables, keys_by_oid, positions) = self.load_tables(conn, &enums).await?;
        self.load_primary_keys(conn, &mut tables, &keys_by_oid, &positions)
            .await?;
        self.load_foreign_keys(conn, &mut tables, &keys_by_oid, &positions)
            .await?;
        self.load_indexes(conn, &mut tables, &keys_by_oid, &positions)
            .await?;
        derive_relationships(&mut tables);
        let functions = self.load_functions(conn).await?;

        let mut schemas: Vec<String> = Vec::new();
        for table in tables.values() {
            if !schemas.contains(&table.schema) {
                schemas.push(table.schema.clone());
            }
        }

        Ok(Snapshot {
            tables,
            functions,
            enums: enums.into_iter().collect(),
            schemas,
            built_at: Utc::now(),
        })
    }

    async fn query(
        &self,
        conn: &dyn Connection,
        step: &'static str,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<Row>, IntrospectError> {
        let params = sql_params(args);
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        conn.query(sql, &refs)
            .await
            .map_err(|source| IntrospectError::Catalog { step, source })
    }

    /// Load enum types, grouped by OID with labels in sort order.
    async fn load_enums(
        &self,
        conn: &dyn Connection,
    ) -> Result<HashMap<u32, EnumType>, IntrospectError> {
        let step = "enums";
        let (clause, args) = self.filter.schema_clause("n.nspname", 0);
        let sql = format!(
            "SELECT t.oid, n.nspname, t.typname, e.enumlabel \
             FROM pg_type t \
             JOIN pg_namespace n ON n.oid = t.typnamespace \
             JOIN pg_enum e ON e.enumtypid = t.oid \
             WHERE {clause} \
             ORDER BY t.oid, e.enumsortorder"
        );

        let mut enums: HashMap<u32, EnumType> = HashMap::new();
        for row in self.query(conn, step, &sql, &args).await? {
            let oid: u32 = row
                .try_get(0)
                .map_err(|source| IntrospectError::Catalog { step, source })?;
            let schema: String = row
                .try_get(1)
                .map_err(|source| IntrospectError::Catalog { step, source })?;
            let name: String = row
                .try_get(2)
                .map_err(|source| IntrospectError::Catalog { step, source })?;
            let label: String = row
                .try_get(3)
                .map_err(|source| IntrospectError::Catalog { step, source })?;
            enums
                .entry(oid)
                .or_insert_with(|| EnumType {
                    schema,
                    name,
                    oid,
                    values: vec![],
                })
                .values
                .push(label);
        }
        Ok(enums)
    }

    /// Load tables and their columns: one batched query per set, never
    /// one query per table.
    async fn load_tables(
        &self,
        conn: &dyn Connection,
        enums: &HashMap<u32, EnumType>,
    ) -> Result<(IndexMap<String, Table>, HashMap<u32, String>, Positions), IntrospectError> {
        let step = "tables";
        let (clause, args) = self.filter.table_clause("n.nspname", "c.relname", 0);
        let sql = format!(
            "SELECT c.oid, n.nspname, c.relname, c.relkind::text, obj_description(c.oid, 'pg_class') \
             FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relkind IN ('r', 'v', 'm', 'p') AND {clause} \
             ORDER BY n.nspname, c.relname"
        );

        let mut tables: IndexMap<String, Table> = IndexMap::new();
        let mut keys_by_oid: HashMap<u32, String> = HashMap::new();
        for row in self.query(conn, step, &sql, &args).await? {
            let err = |source| IntrospectError::Catalog { step, source };
            let oid: u32 = row.try_get(0).map_err(err)?;
            let schema: String = row.try_get(1).map_err(err)?;
            let name: String = row.try_get(2).map_err(err)?;
            let relkind: String = row.try_get(3).map_err(err)?;
            let comment: Option<String> = row.try_get(4).map_err(err)?;

            let Some(kind) = TableKind::from_relkind(&relkind) else {
                continue;
            };
            let key = table_key(&schema, &name);
            keys_by_oid.insert(oid, key.clone());
            tables.insert(
                key,
                Table {
                    schema,
                    name,
                    kind,
                    columns: vec![],
                    primary_key: vec![],
                    foreign_keys: vec![],
                    indexes: vec![],
                    relationships: vec![],
                    comment,
                },
            );
        }

        let step = "columns";
        let (clause, args) = self.filter.table_clause("n.nspname", "c.relname", 0);
        let sql = format!(
            "SELECT a.attrelid, a.attname, a.attnum, t.typname, a.atttypid, t.typcategory::text, \
                    a.attnotnull, pg_get_expr(d.adbin, d.adrelid), col_description(a.attrelid, a.attnum) \
             FROM pg_attribute a \
             JOIN pg_class c ON c.oid = a.attrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             JOIN pg_type t ON t.oid = a.atttypid \
             LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
             WHERE a.attnum > 0 AND NOT a.attisdropped \
               AND c.relkind IN ('r', 'v', 'm', 'p') AND {clause} \
             ORDER BY a.attrelid, a.attnum"
        );

        let mut positions: Positions = HashMap::new();
        for row in self.query(conn, step, &sql, &args).await? {
            let err = |source| IntrospectError::Catalog { step, source };
            let attrelid: u32 = row.try_get(0).map_err(err)?;
            let name: String = row.try_get(1).map_err(err)?;
            let position: i16 = row.try_get(2).map_err(err)?;
            let type_name: String = row.try_get(3).map_err(err)?;
            let type_oid: u32 = row.try_get(4).map_err(err)?;
            let type_category: String = row.try_get(5).map_err(err)?;
            let not_null: bool = row.try_get(6).map_err(err)?;
            let default_expr: Option<String> = row.try_get(7).map_err(err)?;
            let comment: Option<String> = row.try_get(8).map_err(err)?;

            let Some(table) = keys_by_oid.get(&attrelid).and_then(|k| tables.get_mut(k)) else {
                continue;
            };

            let is_array = type_category == "A";
            let is_json = type_name == "json" || type_name == "jsonb";
            let (is_enum, enum_values) = match enums.get(&type_oid) {
                Some(e) => (true, e.values.clone()),
                None => (false, vec![]),
            };

            positions
                .entry(attrelid)
                .or_default()
                .insert(position, name.clone());

            table.columns.push(Column {
                json_type: classify_type(&type_name, is_array, is_enum, is_json),
                name,
                position,
                type_name,
                type_oid,
                nullable: !not_null,
                primary_key: false,
                is_enum,
                enum_values,
                is_array,
                is_json,
                default_expr,
                comment,
            });
        }

        Ok((tables, keys_by_oid, positions))
    }

    /// Resolve primary-key ordinal positions to column names, in
    /// declared key order.
    async fn load_primary_keys(
        &self,
        conn: &dyn Connection,
        tables: &mut IndexMap<String, Table>,
        keys_by_oid: &HashMap<u32, String>,
        positions: &Positions,
    ) -> Result<(), IntrospectError> {
        let step = "primary keys";
        let (clause, args) = self.filter.table_clause("n.nspname", "c.relname", 0);
        let sql = format!(
            "SELECT i.indrelid, i.indkey::int2[] \
             FROM pg_index i \
             JOIN pg_class c ON c.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE i.indisprimary AND {clause}"
        );

        for row in self.query(conn, step, &sql, &args).await? {
            let err = |source| IntrospectError::Catalog { step, source };
            let indrelid: u32 = row.try_get(0).map_err(err)?;
            let ordinals: Vec<i16> = row.try_get(1).map_err(err)?;

            let Some(table) = keys_by_oid.get(&indrelid).and_then(|k| tables.get_mut(k)) else {
                continue;
            };
            let Some(by_position) = positions.get(&indrelid) else {
                continue;
            };

            for ordinal in ordinals {
                if let Some(name) = by_position.get(&ordinal) {
                    table.primary_key.push(name.clone());
                    if let Some(column) = table.columns.iter_mut().find(|c| c.name == *name) {
                        column.primary_key = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve foreign-key ordinal arrays (both sides) to column-name
    /// arrays, preserving declared order. The referenced side is
    /// resolved in SQL because the referenced table may be excluded
    /// from the snapshot.
    async fn load_foreign_keys(
        &self,
        conn: &dyn Connection,
        tables: &mut IndexMap<String, Table>,
        keys_by_oid: &HashMap<u32, String>,
        positions: &Positions,
    ) -> Result<(), IntrospectError> {
        let step = "foreign keys";
        let (clause, args) = self.filter.table_clause("n.nspname", "c.relname", 0);
        let sql = format!(
            "SELECT con.conname, con.conrelid, con.conkey, fn.nspname, fc.relname, \
                    ARRAY( \
                      SELECT a.attname FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord) \
                      JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum \
                      ORDER BY k.ord \
                    )::text[], \
                    con.confupdtype::text, con.confdeltype::text \
             FROM pg_constraint con \
             JOIN pg_class c ON c.oid = con.conrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             JOIN pg_class fc ON fc.oid = con.confrelid \
             JOIN pg_namespace fn ON fn.oid = fc.relnamespace \
             WHERE con.contype = 'f' AND {clause} \
             ORDER BY n.nspname, c.relname, con.conname"
        );

        for row in self.query(conn, step, &sql, &args).await? {
            let err = |source| IntrospectError::Catalog { step, source };
            let constraint_name: String = row.try_get(0).map_err(err)?;
            let conrelid: u32 = row.try_get(1).map_err(err)?;
            let ordinals: Vec<i16> = row.try_get(2).map_err(err)?;
            let referenced_schema: String = row.try_get(3).map_err(err)?;
            let referenced_table: String = row.try_get(4).map_err(err)?;
            let referenced_columns: Vec<String> = row.try_get(5).map_err(err)?;
            let on_update: String = row.try_get(6).map_err(err)?;
            let on_delete: String = row.try_get(7).map_err(err)?;

            let Some(table) = keys_by_oid.get(&conrelid).and_then(|k| tables.get_mut(k)) else {
                continue;
            };
            let Some(by_position) = positions.get(&conrelid) else {
                continue;
            };

            let columns: Vec<String> = ordinals
                .iter()
                .filter_map(|o| by_position.get(o).cloned())
                .collect();
            if columns.len() != referenced_columns.len() {
                // A column we can't resolve means a constraint mid-change;
                // skip rather than record a lopsided key.
                continue;
            }

            table.foreign_keys.push(ForeignKey {
                constraint_name,
                columns,
                referenced_schema,
                referenced_table,
                referenced_columns,
                on_update: RefAction::from_code(&on_update),
                on_delete: RefAction::from_code(&on_delete),
            });
        }
        Ok(())
    }

    /// Load secondary indexes, resolving member ordinals to column
    /// names. Expression members (ordinal 0) are omitted.
    async fn load_indexes(
        &self,
        conn: &dyn Connection,
        tables: &mut IndexMap<String, Table>,
        keys_by_oid: &HashMap<u32, String>,
        positions: &Positions,
    ) -> Result<(), IntrospectError> {
        let step = "indexes";
        let (clause, args) = self.filter.table_clause("n.nspname", "c.relname", 0);
        let sql = format!(
            "SELECT i.indrelid, ic.relname, i.indisunique, i.indkey::int2[] \
             FROM pg_index i \
             JOIN pg_class ic ON ic.oid = i.indexrelid \
             JOIN pg_class c ON c.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE NOT i.indisprimary AND {clause} \
             ORDER BY ic.relname"
        );

        for row in self.query(conn, step, &sql, &args).await? {
            let err = |source| IntrospectError::Catalog { step, source };
            let indrelid: u32 = row.try_get(0).map_err(err)?;
            let name: String = row.try_get(1).map_err(err)?;
            let unique: bool = row.try_get(2).map_err(err)?;
            let ordinals: Vec<i16> = row.try_get(3).map_err(err)?;

            let Some(table) = keys_by_oid.get(&indrelid).and_then(|k| tables.get_mut(k)) else {
                continue;
            };
            let columns = match positions.get(&indrelid) {
                Some(by_position) => ordinals
                    .iter()
                    .filter_map(|o| by_position.get(o).cloned())
                    .collect(),
                None => vec![],
            };

            table.indexes.push(Index { name, columns, unique });
        }
        Ok(())
    }

    /// Load function signatures: name, ordered parameters, return type,
    /// set-returning flag, void flag.
    async fn load_functions(
        &self,
        conn: &dyn Connection,
    ) -> Result<IndexMap<String, Function>, IntrospectError> {
        let step = "functions";
        let (clause, args) = self.filter.schema_clause("n.nspname", 0);
        let sql = format!(
            "SELECT n.nspname, p.proname, \
                    COALESCE(p.proargnames, ARRAY[]::text[]), \
                    ARRAY( \
                      SELECT format_type(u.oid, NULL) \
                      FROM unnest(p.proargtypes) WITH ORDINALITY AS u(oid, ord) \
                      ORDER BY u.ord \
                    )::text[], \
                    format_type(p.prorettype, NULL), p.proretset \
             FROM pg_proc p \
             JOIN pg_namespace n ON n.oid = p.pronamespace \
             WHERE p.prokind = 'f' AND {clause} \
             ORDER BY n.nspname, p.proname"
        );

        let mut functions = IndexMap::new();
        for row in self.query(conn, step, &sql, &args).await? {
            let err = |source| IntrospectError::Catalog { step, source };
            let schema: String = row.try_get(0).map_err(err)?;
            let name: String = row.try_get(1).map_err(err)?;
            let arg_names: Vec<String> = row.try_get(2).map_err(err)?;
            let arg_types: Vec<String> = row.try_get(3).map_err(err)?;
            let return_type: String = row.try_get(4).map_err(err)?;
            let returns_set: bool = row.try_get(5).map_err(err)?;

            let parameters = arg_types
                .into_iter()
                .enumerate()
                .map(|(i, type_name)| FunctionParameter {
                    name: arg_names.get(i).cloned().unwrap_or_default(),
                    type_name,
                })
                .collect();

            let is_void = return_type == "void";
            functions.insert(
                table_key(&schema, &name),
                Function {
                    schema,
                    name,
                    parameters,
                    return_type,
                    returns_set,
                    is_void,
                },
            );
        }
        Ok(functions)
    }
}
