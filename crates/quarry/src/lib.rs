//! Schema-driven dynamic query engine for Postgres.
//!
//! Quarry turns an arbitrary relational schema into a safe, dynamic
//! query surface without code generation. It inspects a live database's
//! catalog into an immutable [`Snapshot`], keeps that snapshot current
//! in the background as the schema changes, and uses it to validate and
//! compile client-supplied filter/sort/pagination requests into
//! parameterized SQL, including batched traversal of foreign-key
//! relationships.
//!
//! The moving parts, leaves first:
//!
//! - [`Introspector`]: one-shot, read-only catalog pass over a
//!   caller-supplied [`Connection`].
//! - [`SchemaCache`]: holds the current snapshot; lock-free-ish reads,
//!   serialized deduplicated reloads, one-shot readiness signal.
//! - [`Watcher`]: background task that decides *when* to reload, via
//!   debounced change notifications or interval polling.
//! - `quarry_query` (re-exported here): the filter expression compiler
//!   and the select/insert/update/delete builders.
//! - [`expand`]: attaches related rows to a record batch through the
//!   snapshot's derived relationships.
//!
//! Quarry never executes the SQL it builds — statements and their
//! arguments go back to the caller, and only introspection and
//! expansion read through the executor themselves.
//!
//! # Example
//!
//! ```ignore
//! use quarry::{Introspector, PoolSource, SchemaCache, Watcher, WatcherOptions};
//! use std::sync::Arc;
//!
//! let cache = Arc::new(SchemaCache::new(Arc::new(PoolSource::new(
//!     pool.clone(),
//!     Introspector::new(),
//! ))));
//! cache.reload().await?;
//!
//! let snapshot = cache.snapshot()?;
//! let table = snapshot.table("public.posts").ok_or(...)?;
//! let query = quarry::query::list(table, &params)?;
//! let params = quarry::sql_params(&query.data.args);
//! let rows = conn.query(&query.data.sql, &quarry::sql_param_refs(&params)).await?;
//! ```

mod cache;
mod conn;
mod error;
mod expand;
mod introspect;
mod record;
mod watch;

pub use cache::{PoolSource, SchemaCache, SnapshotSource};
pub use conn::{Connection, ConnectionExt, TracedConn};
pub use error::{Error, FeedError, IntrospectError, Result};
pub use expand::{DbRecords, MAX_EXPAND_DEPTH, RecordSource, expand, expand_with};
pub use introspect::{Introspector, SchemaFilter};
pub use record::{SqlParam, decode_row, sql_params};
pub use watch::{ChangeEvents, ChangeFeed, PgChangeFeed, Watcher, WatcherOptions};

// Re-export the schema model and the pure compilation layer.
pub use quarry_schema as schema;
pub use quarry_schema::Snapshot;
pub use quarry_sql::{Record, Value};

pub mod query {
    //! Filter compilation and query building, re-exported from
    //! `quarry_query`.
    pub use quarry_query::{
        CompileError, Filter, ListParams, ListQuery, Query, SortField, compile_filter, delete,
        insert, list, parse_sort, select_one, update,
    };
}

use tokio_postgres::types::ToSql;

/// Borrow compiled arguments in the form executors take.
///
/// ```ignore
/// let params = quarry::sql_params(&query.args);
/// let refs = quarry::sql_param_refs(&params);
/// conn.query(&query.sql, &refs).await?;
/// ```
pub fn sql_param_refs<'a>(params: &'a [SqlParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}
