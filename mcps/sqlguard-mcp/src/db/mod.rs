//! SQL execution port
//!
//! The executors and the schema inspector only talk to these traits. A
//! backend hands out one [`SqlSession`] per invocation; the session owns
//! its connection exclusively until it is finished or dropped, so a schema
//! switch made through it can never be observed by another caller.
//!
//! Read-only sessions are opened with [`Access::ReadOnly`], which makes the
//! backend refuse writes, and are ended with [`SqlSession::discard`].

mod postgres;
mod sqlite;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{BackendKind, DatabaseConfig, Limits};

pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

/// One result row: column name -> value, in select-list order
pub type Row = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Schema names
// ============================================================================

/// Caller-supplied schema identifier, normalized to upper case
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaName(String);

impl SchemaName {
    /// Normalize an optional identifier. Blank input means "no schema".
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Self(s.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by a backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Socket, TLS, or protocol-level connectivity fault
    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("statement timed out after {0}s")]
    Timeout(u64),

    /// Syntax error, unknown object, type error, and anything unclassified
    #[error("statement failed: {0}")]
    Statement(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("unsupported by this backend: {0}")]
    Unsupported(String),
}

impl DbError {
    /// Whether the failure is a connectivity-class fault worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::PoolExhausted(_))
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Backend-specific introspection SQL.
///
/// Placeholders are bound positionally with upper-cased identifiers. Each
/// query must alias its output columns to the names the inspector reads:
/// `TABLE_NAME`, `USERNAME`, and the `COLUMN_NAME` .. `DATA_DEFAULT` set.
#[derive(Debug)]
pub struct CatalogQueries {
    /// Tables of the session's own schema. No parameters.
    pub tables_current: &'static str,
    /// Tables owned by a schema. Params: schema.
    pub tables_in_schema: &'static str,
    /// Columns of a table in the session's own schema. Params: table.
    pub columns_current: &'static str,
    /// Columns of a table in a schema. Params: table, schema.
    pub columns_in_schema: &'static str,
    /// All schemas. No parameters.
    pub schemas: &'static str,
}

// ============================================================================
// Port traits
// ============================================================================

/// What a session is allowed to do to the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// A source of exclusively-owned database sessions
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    fn catalog(&self) -> &'static CatalogQueries;

    /// Check out a session for the duration of one invocation
    async fn acquire(&self, access: Access) -> Result<Box<dyn SqlSession>, DbError>;
}

/// One checked-out connection.
///
/// Work done through a session becomes durable on [`SqlSession::finish`].
/// [`SqlSession::discard`] and dropping an unfinished session both throw it
/// away where the backend supports that.
#[async_trait]
pub trait SqlSession: Send {
    /// Make `schema` the active namespace for the rest of this session
    async fn set_schema(&mut self, schema: &SchemaName) -> Result<(), DbError>;

    /// Run a row-returning statement, reading at most `limit` rows
    async fn fetch(&mut self, sql: &str, params: &[&str], limit: usize)
        -> Result<Vec<Row>, DbError>;

    /// Run a statement and return the driver's affected-row count
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError>;

    async fn finish(self: Box<Self>) -> Result<(), DbError>;

    async fn discard(self: Box<Self>) -> Result<(), DbError>;
}

/// Open the backend named in config
pub fn connect(config: &DatabaseConfig, limits: &Limits) -> Result<Arc<dyn SqlBackend>, DbError> {
    tracing::info!(backend = ?config.backend, "Connecting database backend");
    match config.backend {
        BackendKind::Sqlite => Ok(Arc::new(SqliteBackend::open(&config.url, limits)?)),
        BackendKind::Postgres => Ok(Arc::new(PostgresBackend::connect_lazy(config, limits)?)),
    }
}
