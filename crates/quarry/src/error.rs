use quarry_query::CompileError;
use thiserror::Error;

/// Top-level quarry error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error(transparent)]
    Introspect(#[from] IntrospectError),

    /// The schema cache has not completed its first load yet.
    #[error("no schema loaded yet")]
    NotReady,

    /// The request names a table the snapshot doesn't know.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// Client-fixable filter/sort/identifier input.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A row column's database type doesn't match what the snapshot
    /// says it should be (the schema may have changed underneath us).
    #[error("type mismatch for '{table}.{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: &'static str,
        actual: String,
    },

    /// A row column failed to decode into a dynamic value.
    #[error("failed to read column '{column}' of '{table}' as {expected}: {message}")]
    ColumnRead {
        table: String,
        column: String,
        expected: &'static str,
        message: String,
    },
}

/// A catalog query failed during an introspection pass.
///
/// Fatal to that pass only: the cache keeps serving the prior snapshot,
/// and whether to retry is the caller's policy.
#[derive(Debug, Error)]
pub enum IntrospectError {
    #[error("catalog query failed while loading {step}: {source}")]
    Catalog {
        step: &'static str,
        source: tokio_postgres::Error,
    },

    #[error("could not acquire a catalog connection: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

/// A change-notification subscription failed or was lost.
///
/// Always transient from the watcher's point of view: it retries with a
/// fixed backoff forever and never surfaces this to request-serving
/// code.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("notification connection closed")]
    Closed,
}

/// Result type for quarry operations.
pub type Result<T> = std::result::Result<T, Error>;
