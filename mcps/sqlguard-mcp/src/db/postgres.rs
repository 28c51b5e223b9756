//! PostgreSQL backend
//!
//! Every session is a transaction on a connection checked out of the pool.
//! The schema switch and the statement timeout are applied with
//! `set_config(.., true)`, which is transaction-local. Read-only sessions
//! run in a `READ ONLY` transaction that is always rolled back.
//!
//! A caller's own statement can still change session-level state (for
//! example `set_config(.., false)` inside a SELECT), so every connection is
//! reset when it is released back to the pool.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Postgres, Row as _, Transaction, TypeInfo};

use super::{Access, CatalogQueries, DbError, Row, SchemaName, SqlBackend, SqlSession};
use crate::config::{DatabaseConfig, Limits};

static CATALOG: CatalogQueries = CatalogQueries {
    tables_current: r#"SELECT table_name::text AS "TABLE_NAME"
        FROM information_schema.tables
        WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
        ORDER BY table_name"#,
    tables_in_schema: r#"SELECT table_name::text AS "TABLE_NAME"
        FROM information_schema.tables
        WHERE upper(table_schema) = $1 AND table_type = 'BASE TABLE'
        ORDER BY table_name"#,
    columns_current: r#"SELECT column_name::text AS "COLUMN_NAME",
            data_type::text AS "DATA_TYPE",
            character_maximum_length::int8 AS "DATA_LENGTH",
            numeric_precision::int8 AS "DATA_PRECISION",
            numeric_scale::int8 AS "DATA_SCALE",
            CASE is_nullable WHEN 'YES' THEN 'Y' ELSE 'N' END AS "NULLABLE",
            column_default::text AS "DATA_DEFAULT"
        FROM information_schema.columns
        WHERE table_schema = current_schema() AND upper(table_name) = $1
        ORDER BY ordinal_position"#,
    columns_in_schema: r#"SELECT column_name::text AS "COLUMN_NAME",
            data_type::text AS "DATA_TYPE",
            character_maximum_length::int8 AS "DATA_LENGTH",
            numeric_precision::int8 AS "DATA_PRECISION",
            numeric_scale::int8 AS "DATA_SCALE",
            CASE is_nullable WHEN 'YES' THEN 'Y' ELSE 'N' END AS "NULLABLE",
            column_default::text AS "DATA_DEFAULT"
        FROM information_schema.columns
        WHERE upper(table_name) = $1 AND upper(table_schema) = $2
        ORDER BY ordinal_position"#,
    schemas: r#"SELECT nspname::text AS "USERNAME" FROM pg_namespace ORDER BY nspname"#,
};

/// Resolves the caller's upper-cased name to the stored schema and makes it
/// the transaction's search path. Returns no row for an unknown schema.
const SET_SCHEMA_SQL: &str = "SELECT set_config('search_path', quote_ident(nspname), true) \
                              FROM pg_namespace WHERE upper(nspname) = $1 LIMIT 1";

const SET_TIMEOUT_SQL: &str = "SELECT set_config('statement_timeout', $1, true)";

/// Must be the first statement of the transaction
const READ_ONLY_SQL: &str = "SET TRANSACTION READ ONLY";

/// Run on every connection returned to the pool. Sent as a simple query so
/// sqlx's prepared statement cache stays valid.
const RESET_SESSION_SQL: &str = "RESET ALL; SELECT pg_advisory_unlock_all()";

/// PostgreSQL database behind a connection pool
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PostgresBackend {
    /// Build the pool without connecting; connections open on first use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect_lazy(config: &DatabaseConfig, limits: &Limits) -> Result<Self, DbError> {
        let options: PgConnectOptions = config
            .url
            .parse()
            .map_err(|e: sqlx::Error| DbError::Connection(format!("invalid postgres url: {}", e)))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .after_release(|conn, _meta| {
                Box::pin(async move {
                    // An error here closes the connection instead of reusing it
                    conn.execute(RESET_SESSION_SQL).await?;
                    Ok(true)
                })
            })
            .connect_lazy_with(options);

        Ok(Self::from_pool(pool, limits.statement_timeout()))
    }

    /// Creates a backend from an existing connection pool. The pool should
    /// reset released connections the way [`PostgresBackend::connect_lazy`]
    /// configures it to.
    pub fn from_pool(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }
}

#[async_trait]
impl SqlBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn catalog(&self) -> &'static CatalogQueries {
        &CATALOG
    }

    async fn acquire(&self, access: Access) -> Result<Box<dyn SqlSession>, DbError> {
        let mut tx = self.pool.begin().await.map_err(map_error)?;

        if access == Access::ReadOnly {
            sqlx::query(READ_ONLY_SQL)
                .execute(&mut *tx)
                .await
                .map_err(map_error)?;
        }

        sqlx::query(SET_TIMEOUT_SQL)
            .bind(format!("{}ms", self.statement_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(map_error)?;

        Ok(Box::new(PgSession {
            tx,
            statement_timeout: self.statement_timeout,
        }))
    }
}

struct PgSession {
    tx: Transaction<'static, Postgres>,
    statement_timeout: Duration,
}

impl PgSession {
    fn map_err(&self, err: sqlx::Error) -> DbError {
        match map_error(err) {
            DbError::Timeout(_) => DbError::Timeout(self.statement_timeout.as_secs()),
            other => other,
        }
    }
}

#[async_trait]
impl SqlSession for PgSession {
    async fn set_schema(&mut self, schema: &SchemaName) -> Result<(), DbError> {
        let applied = sqlx::query(SET_SCHEMA_SQL)
            .bind(schema.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_error)?;

        match applied {
            Some(_) => Ok(()),
            None => Err(DbError::Statement(format!("unknown schema: {}", schema))),
        }
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[&str],
        limit: usize,
    ) -> Result<Vec<Row>, DbError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(*param);
        }

        let mut out = Vec::new();
        let result = {
            let mut stream = query.fetch(&mut *self.tx);
            loop {
                if out.len() >= limit {
                    break Ok(());
                }
                match stream.try_next().await {
                    Ok(Some(row)) => out.push(convert_row(&row)),
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }
        };

        result.map(|()| out).map_err(|e| self.map_err(e))
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let result = sqlx::query(sql).execute(&mut *self.tx).await;
        result.map(|done| done.rows_affected()).map_err(|e| self.map_err(e))
    }

    async fn finish(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await.map_err(map_error)
    }

    async fn discard(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await.map_err(map_error)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            (
                col.name().to_string(),
                convert_value(row, i, col.type_info().name()),
            )
        })
        .collect()
}

/// Converts a single column value, decoding by the column's type name.
///
/// Types without a decoder render as a placeholder string so a value is
/// never silently reported as NULL.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> serde_json::Value {
    use serde_json::{json, Value};

    fn decoded<T>(
        row: &PgRow,
        index: usize,
        type_name: &str,
        to_json: impl FnOnce(T) -> Value,
    ) -> Value
    where
        T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        match row.try_get::<Option<T>, _>(index) {
            Ok(Some(v)) => to_json(v),
            Ok(None) => Value::Null,
            Err(_) => Value::String(format!("<unsupported type {}>", type_name)),
        }
    }

    match type_name.to_uppercase().as_str() {
        "BOOL" => decoded::<bool>(row, index, type_name, Value::Bool),
        "INT2" => decoded::<i16>(row, index, type_name, |v| json!(v)),
        "INT4" => decoded::<i32>(row, index, type_name, |v| json!(v)),
        "INT8" => decoded::<i64>(row, index, type_name, |v| json!(v)),
        "FLOAT4" => decoded::<f32>(row, index, type_name, |v| json!(v)),
        "FLOAT8" => decoded::<f64>(row, index, type_name, |v| json!(v)),
        "BYTEA" => decoded::<Vec<u8>>(row, index, type_name, |b| {
            Value::String(format!("<blob {} bytes>", b.len()))
        }),
        // Rendered as text so no precision is lost
        "NUMERIC" => decoded::<sqlx::types::BigDecimal>(row, index, type_name, |v| {
            Value::String(v.to_string())
        }),
        "UUID" => decoded::<sqlx::types::Uuid>(row, index, type_name, |v| {
            Value::String(v.to_string())
        }),
        "JSON" | "JSONB" => decoded::<Value>(row, index, type_name, |v| v),
        "TIMESTAMPTZ" => decoded::<chrono::DateTime<chrono::Utc>>(row, index, type_name, |v| {
            Value::String(v.to_rfc3339())
        }),
        "TIMESTAMP" => decoded::<chrono::NaiveDateTime>(row, index, type_name, |v| {
            Value::String(v.to_string())
        }),
        "DATE" => decoded::<chrono::NaiveDate>(row, index, type_name, |v| {
            Value::String(v.to_string())
        }),
        "TIME" => decoded::<chrono::NaiveTime>(row, index, type_name, |v| {
            Value::String(v.to_string())
        }),
        _ => decoded::<String>(row, index, type_name, Value::String),
    }
}

/// Classify a sqlx error. SQLSTATE class 08 is connection exception,
/// class 23 is integrity constraint violation, 57014 is query_canceled
/// (raised by statement_timeout), 57P01..57P03 are server shutdown.
fn map_error(err: sqlx::Error) -> DbError {
    match &err {
        sqlx::Error::PoolTimedOut => DbError::PoolExhausted(err.to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => DbError::Connection(err.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            if code.starts_with("23") {
                DbError::Constraint(err.to_string())
            } else if code.starts_with("08") || code.starts_with("57P") {
                DbError::Connection(err.to_string())
            } else if code == "57014" {
                DbError::Timeout(0)
            } else {
                DbError::Statement(err.to_string())
            }
        }
        _ => DbError::Statement(err.to_string()),
    }
}
