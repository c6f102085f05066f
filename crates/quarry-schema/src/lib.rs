//! Schema snapshot types for quarry.
//!
//! This crate contains the immutable model of a database schema that is
//! shared between `quarry` (catalog introspection, caching) and
//! `quarry-query` (filter compilation, query building).
//!
//! A [`Snapshot`] is built once per introspection pass and never mutated
//! afterwards; refreshing the schema always means building and publishing
//! a brand-new snapshot.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt;

mod classify;
pub use classify::classify_type;

mod relation;
pub use relation::{derive_relationships, relationship_field_name};

/// An immutable point-in-time model of a database schema.
///
/// Tables and functions are keyed by `schema.name`; enum types are keyed
/// by their catalog OID.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Tables (and views), keyed by `schema.name`.
    pub tables: IndexMap<String, Table>,
    /// Function signatures, keyed by `schema.name`.
    pub functions: IndexMap<String, Function>,
    /// Enum types, keyed by type OID.
    pub enums: BTreeMap<u32, EnumType>,
    /// Schemas that contributed at least one table.
    pub schemas: Vec<String>,
    /// When this snapshot was built.
    pub built_at: DateTime<Utc>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            tables: IndexMap::new(),
            functions: IndexMap::new(),
            enums: BTreeMap::new(),
            schemas: vec![],
            built_at: DateTime::UNIX_EPOCH,
        }
    }
}

impl Snapshot {
    /// Get a table by its `schema.name` key.
    pub fn table(&self, key: &str) -> Option<&Table> {
        self.tables.get(key)
    }

    /// Get a table by schema and name.
    pub fn table_named(&self, schema: &str, name: &str) -> Option<&Table> {
        self.tables.get(&table_key(schema, name))
    }

    /// Iterate over all tables.
    pub fn iter_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }
}

/// Build the canonical `schema.name` key for a table or function.
pub fn table_key(schema: &str, name: &str) -> String {
    format!("{schema}.{name}")
}

/// What kind of relation a [`Table`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// An ordinary table.
    Table,
    /// A view.
    View,
    /// A materialized view.
    MaterializedView,
    /// A partitioned table.
    PartitionedTable,
}

impl TableKind {
    /// Map a `pg_class.relkind` code to a table kind.
    pub fn from_relkind(kind: &str) -> Option<Self> {
        match kind {
            "r" => Some(TableKind::Table),
            "v" => Some(TableKind::View),
            "m" => Some(TableKind::MaterializedView),
            "p" => Some(TableKind::PartitionedTable),
            _ => None,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Table => write!(f, "table"),
            TableKind::View => write!(f, "view"),
            TableKind::MaterializedView => write!(f, "materialized_view"),
            TableKind::PartitionedTable => write!(f, "partitioned_table"),
        }
    }
}

/// A table (or view) definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Schema the table lives in.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// What kind of relation this is.
    pub kind: TableKind,
    /// Columns in attribute order.
    pub columns: Vec<Column>,
    /// Primary-key column names in declared order.
    pub primary_key: Vec<String>,
    /// Foreign keys owned by this table.
    pub foreign_keys: Vec<ForeignKey>,
    /// Secondary indexes.
    pub indexes: Vec<Index>,
    /// Relationships derived from foreign keys (both directions).
    pub relationships: Vec<Relationship>,
    /// Table comment, if any.
    pub comment: Option<String>,
}

impl Table {
    /// The `schema.name` key of this table.
    pub fn key(&self) -> String {
        table_key(&self.schema, &self.name)
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether a column with the given name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// The JSON-facing classification of a column's type.
///
/// This is what API clients see: every native type collapses into one of
/// these six buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonType {
    /// Text, enums, and anything without a better mapping.
    #[default]
    String,
    /// Floating point and arbitrary-precision numerics.
    Number,
    /// Exact integers.
    Integer,
    /// Booleans.
    Boolean,
    /// JSON documents.
    Object,
    /// Arrays of any element type.
    Array,
}

impl JsonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::Boolean => "boolean",
            JsonType::Object => "object",
            JsonType::Array => "array",
        }
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Attribute number (1-based position).
    pub position: i16,
    /// Native type name from the catalog (e.g. `int8`, `_text`).
    pub type_name: String,
    /// Type OID.
    pub type_oid: u32,
    /// Whether the column allows NULL.
    pub nullable: bool,
    /// Whether this column is part of the primary key.
    pub primary_key: bool,
    /// Whether the column's type is an enum.
    pub is_enum: bool,
    /// Enum labels in declared order (empty unless `is_enum`).
    pub enum_values: Vec<String>,
    /// Whether the column is an array type.
    pub is_array: bool,
    /// Whether the column is a JSON-native type.
    pub is_json: bool,
    /// JSON-facing classification of the type.
    pub json_type: JsonType,
    /// Default expression, if any.
    pub default_expr: Option<String>,
    /// Column comment, if any.
    pub comment: Option<String>,
}

/// Referential action on update/delete of a referenced row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl RefAction {
    /// Map a `pg_constraint.confupdtype`/`confdeltype` code.
    pub fn from_code(code: &str) -> Self {
        match code {
            "r" => RefAction::Restrict,
            "c" => RefAction::Cascade,
            "n" => RefAction::SetNull,
            "d" => RefAction::SetDefault,
            _ => RefAction::NoAction,
        }
    }
}

/// A foreign-key constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    /// Constraint name.
    pub constraint_name: String,
    /// Referencing column names, in constraint order.
    pub columns: Vec<String>,
    /// Schema of the referenced table.
    pub referenced_schema: String,
    /// Referenced table name.
    pub referenced_table: String,
    /// Referenced column names, same cardinality and order as `columns`.
    pub referenced_columns: Vec<String>,
    /// Action on update of the referenced row.
    pub on_update: RefAction,
    /// Action on delete of the referenced row.
    pub on_delete: RefAction,
}

/// Direction of a derived relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// The owning side of a foreign key: many rows point at one.
    ManyToOne,
    /// The referenced side of a foreign key: one row is pointed at by many.
    OneToMany,
}

/// A directional link between two tables, derived from a foreign key.
///
/// `from_*` always describes the table the relationship is attached to;
/// `to_*` the table it leads to. Relationships are never created
/// independently of a foreign key.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    /// Unique name within the owning table.
    pub name: String,
    /// Direction of the link.
    pub kind: RelationshipKind,
    pub from_schema: String,
    pub from_table: String,
    /// Join columns on the attached table.
    pub from_columns: Vec<String>,
    pub to_schema: String,
    pub to_table: String,
    /// Join columns on the target table, same order as `from_columns`.
    pub to_columns: Vec<String>,
    /// Field name used when attaching expanded rows.
    pub field_name: String,
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Column names, in index order. Expression members are omitted.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    pub unique: bool,
}

/// An enum type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub schema: String,
    pub name: String,
    /// Type OID.
    pub oid: u32,
    /// Labels in sort order.
    pub values: Vec<String>,
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParameter {
    /// Parameter name; empty for unnamed parameters.
    pub name: String,
    /// Formatted type name.
    pub type_name: String,
}

/// A function signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub schema: String,
    pub name: String,
    /// Input parameters in declaration order.
    pub parameters: Vec<FunctionParameter>,
    /// Formatted return type name.
    pub return_type: String,
    /// Whether the function returns a set of rows.
    pub returns_set: bool,
    /// Whether the function returns `void`.
    pub is_void: bool,
}

#[cfg(test)]
mod tests;
