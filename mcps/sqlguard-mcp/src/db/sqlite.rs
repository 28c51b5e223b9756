//! SQLite backend
//!
//! A single connection guarded by an async mutex. Acquiring a session takes
//! an owned lock guard, so each invocation has the connection to itself
//! for its whole switch-then-execute sequence.
//!
//! Read-only sessions run with `PRAGMA query_only` on. The pragma is
//! switched back off when the session ends, however it ends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Access, CatalogQueries, DbError, Row, SchemaName, SqlBackend, SqlSession};
use crate::config::Limits;

static CATALOG: CatalogQueries = CatalogQueries {
    tables_current: "SELECT name AS TABLE_NAME FROM pragma_table_list \
                     WHERE schema = 'main' AND type = 'table' AND name NOT LIKE 'sqlite_%' \
                     ORDER BY name",
    tables_in_schema: "SELECT name AS TABLE_NAME FROM pragma_table_list \
                       WHERE upper(schema) = ?1 AND type = 'table' AND name NOT LIKE 'sqlite_%' \
                       ORDER BY name",
    columns_current: "SELECT name AS COLUMN_NAME, type AS DATA_TYPE, NULL AS DATA_LENGTH, \
                      NULL AS DATA_PRECISION, NULL AS DATA_SCALE, \
                      CASE \"notnull\" WHEN 0 THEN 'Y' ELSE 'N' END AS NULLABLE, \
                      dflt_value AS DATA_DEFAULT \
                      FROM pragma_table_info(?1) ORDER BY cid",
    columns_in_schema: "SELECT name AS COLUMN_NAME, type AS DATA_TYPE, NULL AS DATA_LENGTH, \
                        NULL AS DATA_PRECISION, NULL AS DATA_SCALE, \
                        CASE \"notnull\" WHEN 0 THEN 'Y' ELSE 'N' END AS NULLABLE, \
                        dflt_value AS DATA_DEFAULT \
                        FROM pragma_table_info(?1, ?2) ORDER BY cid",
    schemas: "SELECT name AS USERNAME FROM pragma_database_list ORDER BY name",
};

/// SQLite database behind one shared connection
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    statement_timeout: Duration,
}

impl SqliteBackend {
    /// Open (or create) the database file at `path`. `:memory:` works too.
    pub fn open(path: &str, limits: &Limits) -> Result<Self, DbError> {
        let conn = Connection::open(path).map_err(|e| {
            tracing::error!("Failed to open database at {}: {}", path, e);
            map_error(e)
        })?;
        Self::from_connection(conn, limits.statement_timeout())
    }

    /// Wrap an already-open connection
    pub fn from_connection(conn: Connection, statement_timeout: Duration) -> Result<Self, DbError> {
        conn.busy_timeout(statement_timeout).map_err(map_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            statement_timeout,
        })
    }
}

#[async_trait]
impl SqlBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn catalog(&self) -> &'static CatalogQueries {
        &CATALOG
    }

    async fn acquire(&self, access: Access) -> Result<Box<dyn SqlSession>, DbError> {
        let conn = self.conn.clone().lock_owned().await;
        if access == Access::ReadOnly {
            set_query_only(&conn, true)?;
        }
        Ok(Box::new(SqliteSession {
            conn,
            statement_timeout: self.statement_timeout,
            access,
        }))
    }
}

struct SqliteSession {
    conn: OwnedMutexGuard<Connection>,
    statement_timeout: Duration,
    access: Access,
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.access == Access::ReadOnly {
            if let Err(e) = set_query_only(&self.conn, false) {
                tracing::warn!("Failed to clear query_only on session release: {}", e);
            }
        }
    }
}

#[async_trait]
impl SqlSession for SqliteSession {
    async fn set_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        check_schema(&self.conn, schema)
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[&str],
        limit: usize,
    ) -> Result<Vec<Row>, DbError> {
        with_deadline(&self.conn, self.statement_timeout, |conn| {
            fetch_rows(conn, sql, params, limit)
        })
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        with_deadline(&self.conn, self.statement_timeout, |conn| {
            conn.execute(sql, []).map(|n| n as u64).map_err(map_error)
        })
    }

    async fn finish(self: Box<Self>) -> Result<(), DbError> {
        // Statements autocommit; releasing the guard is all that is left
        Ok(())
    }

    async fn discard(self: Box<Self>) -> Result<(), DbError> {
        // Nothing to undo: read-only sessions cannot write
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SQLite has no session-level default schema. `MAIN` is already the
/// default; any other schema cannot be made active.
fn check_schema(conn: &Connection, schema: &SchemaName) -> Result<(), DbError> {
    let known: Option<String> = conn
        .query_row(
            "SELECT name FROM pragma_database_list WHERE upper(name) = ?1",
            [schema.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_error)?;

    match known {
        None => Err(DbError::Statement(format!("unknown schema: {}", schema))),
        Some(name) if name.eq_ignore_ascii_case("main") => Ok(()),
        Some(name) => Err(DbError::Unsupported(format!(
            "cannot make schema '{}' the default; qualify table names instead",
            name
        ))),
    }
}

fn set_query_only(conn: &Connection, on: bool) -> Result<(), DbError> {
    conn.pragma_update(None, "query_only", on).map_err(map_error)
}

/// Run `work` with a progress handler that interrupts it past the deadline
fn with_deadline<T>(
    conn: &Connection,
    timeout: Duration,
    work: impl FnOnce(&Connection) -> Result<T, DbError>,
) -> Result<T, DbError> {
    let deadline = Instant::now() + timeout;
    conn.progress_handler(1000, Some(move || Instant::now() > deadline));
    let result = work(conn);
    conn.progress_handler(0, None::<fn() -> bool>);

    match result {
        Err(DbError::Timeout(_)) => Err(DbError::Timeout(timeout.as_secs())),
        other => other,
    }
}

fn fetch_rows(
    conn: &Connection,
    sql: &str,
    params: &[&str],
    limit: usize,
) -> Result<Vec<Row>, DbError> {
    let mut stmt = conn.prepare(sql).map_err(map_error)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(map_error)?;

    let mut out = Vec::new();
    while out.len() < limit {
        let Some(row) = rows.next().map_err(map_error)? else {
            break;
        };
        let mut record = Row::new();
        for (i, name) in columns.iter().enumerate() {
            let value: rusqlite::types::Value = row.get(i).map_err(map_error)?;
            record.insert(name.clone(), to_json(value));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_json(value: rusqlite::types::Value) -> serde_json::Value {
    match value {
        rusqlite::types::Value::Null => serde_json::Value::Null,
        rusqlite::types::Value::Integer(i) => serde_json::json!(i),
        rusqlite::types::Value::Real(f) => serde_json::json!(f),
        rusqlite::types::Value::Text(s) => serde_json::Value::String(s),
        rusqlite::types::Value::Blob(b) => {
            serde_json::Value::String(format!("<blob {} bytes>", b.len()))
        }
    }
}

fn map_error(err: rusqlite::Error) -> DbError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => DbError::Constraint(err.to_string()),
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                DbError::PoolExhausted(err.to_string())
            }
            ErrorCode::CannotOpen | ErrorCode::SystemIoFailure => {
                DbError::Connection(err.to_string())
            }
            // Only the deadline handler interrupts; the caller fills in the limit
            ErrorCode::OperationInterrupted => DbError::Timeout(0),
            _ => DbError::Statement(err.to_string()),
        },
        _ => DbError::Statement(err.to_string()),
    }
}
