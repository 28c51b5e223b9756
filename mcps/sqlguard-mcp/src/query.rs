//! Read-only query execution
//!
//! Validate as read-only, switch schema, fetch, cap the row count. Failures
//! are wrapped once and never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::Limits;
use crate::db::{Access, DbError, Row, SchemaName, SqlBackend};
use crate::error::GateError;
use crate::validator::{validate, StatementCategory};

/// Rows of a read-only query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub rows: Vec<Row>,
    pub row_count: usize,
    /// More rows were available than the cap allows
    pub truncated: bool,
}

#[derive(Clone)]
pub struct QueryExecutor {
    backend: Arc<dyn SqlBackend>,
    max_rows: usize,
    statement_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(backend: Arc<dyn SqlBackend>, limits: &Limits) -> Self {
        Self {
            backend,
            max_rows: limits.max_rows,
            statement_timeout: limits.statement_timeout(),
        }
    }

    pub async fn execute_query(
        &self,
        sql: &str,
        schema: Option<&str>,
    ) -> Result<QueryOutcome, GateError> {
        validate(sql, StatementCategory::ReadOnly).into_result()?;
        let schema = SchemaName::parse(schema);

        let mut rows = self
            .run(sql, schema.as_ref())
            .await
            .map_err(|source| {
                tracing::error!("Query execution failed: {}", source);
                GateError::QueryFailed { source }
            })?;

        let truncated = rows.len() > self.max_rows;
        if truncated {
            tracing::warn!(
                "Query returned more than {} rows, limiting to {}",
                self.max_rows,
                self.max_rows
            );
            rows.truncate(self.max_rows);
        } else {
            tracing::info!("Query returned {} rows", rows.len());
        }

        Ok(QueryOutcome {
            row_count: rows.len(),
            rows,
            truncated,
        })
    }

    /// One read-only session for the whole switch-then-fetch sequence,
    /// discarded at the end so nothing the statement did is kept. One row
    /// past the cap is requested so truncation can be detected.
    async fn run(&self, sql: &str, schema: Option<&SchemaName>) -> Result<Vec<Row>, DbError> {
        let timeout = self.statement_timeout;
        let mut session = bounded(timeout, self.backend.acquire(Access::ReadOnly)).await?;

        if let Some(schema) = schema {
            bounded(timeout, session.set_schema(schema)).await?;
            tracing::info!("Set schema to: {}", schema);
        }

        tracing::info!(backend = self.backend.name(), "Executing query: {}", sql);
        let limit = self.max_rows.saturating_add(1);
        let rows = bounded(timeout, session.fetch(sql, &[], limit)).await?;
        bounded(timeout, session.discard()).await?;
        Ok(rows)
    }
}

/// Apply the statement ceiling to one backend call
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, DbError>>,
) -> Result<T, DbError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| DbError::Timeout(limit.as_secs()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::{rows_of, MockBackend};
    use crate::validator::Rejection;

    fn executor(backend: &MockBackend, max_rows: usize) -> QueryExecutor {
        let limits = Limits {
            max_rows,
            ..Limits::default()
        };
        QueryExecutor::new(Arc::new(backend.clone()), &limits)
    }

    #[tokio::test]
    async fn test_select_returns_rows() {
        let backend = MockBackend::new().push_fetch(Ok(rows_of("NAME", &["Alice"])));
        let outcome = executor(&backend, 1000)
            .execute_query("select name from users where id=1", None)
            .await
            .unwrap();

        assert_eq!(outcome.row_count, 1);
        assert!(!outcome.truncated);
        assert_eq!(outcome.rows[0]["NAME"], "Alice");

        let sessions = backend.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].schema, None);
        assert_eq!(sessions[0].statements[0].0, "select name from users where id=1");
        assert_eq!(sessions[0].access, Some(Access::ReadOnly));
        assert!(sessions[0].discarded);
        assert!(!sessions[0].finished);
    }

    #[tokio::test]
    async fn test_rejection_propagates_without_touching_backend() {
        let backend = MockBackend::new();
        let err = executor(&backend, 1000)
            .execute_query("DELETE FROM users", None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GateError::InvalidStatement(Rejection::WrongOpener(StatementCategory::ReadOnly))
        ));
        assert_eq!(backend.attempts(), 0);
    }

    #[tokio::test]
    async fn test_schema_is_normalized_and_switched_in_same_session() {
        let backend = MockBackend::new();
        executor(&backend, 1000)
            .execute_query("SELECT * FROM orders", Some("sales"))
            .await
            .unwrap();

        let sessions = backend.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].schema.as_deref(), Some("SALES"));
        assert_eq!(sessions[0].statements.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_schema_is_ignored() {
        let backend = MockBackend::new();
        executor(&backend, 1000)
            .execute_query("SELECT 1", Some("  "))
            .await
            .unwrap();
        assert_eq!(backend.sessions()[0].schema, None);
    }

    #[tokio::test]
    async fn test_rows_capped_at_limit() {
        let values: Vec<String> = (0..1500).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let backend = MockBackend::new().push_fetch(Ok(rows_of("N", &refs)));

        let outcome = executor(&backend, 1000)
            .execute_query("SELECT n FROM big", None)
            .await
            .unwrap();

        assert_eq!(outcome.rows.len(), 1000);
        assert_eq!(outcome.row_count, 1000);
        assert!(outcome.truncated);
        assert_eq!(outcome.rows[999]["N"], "999");
        assert_eq!(backend.sessions()[0].limits, vec![1001]);
    }

    #[tokio::test]
    async fn test_exactly_at_limit_is_not_truncated() {
        let backend = MockBackend::new().push_fetch(Ok(rows_of("N", &["a", "b", "c"])));
        let outcome = executor(&backend, 3)
            .execute_query("SELECT n FROM t", None)
            .await
            .unwrap();
        assert_eq!(outcome.row_count, 3);
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn test_failures_are_wrapped_and_not_retried() {
        let backend = MockBackend::new()
            .push_fetch(Err(DbError::Connection("connection reset".into())));
        let err = executor(&backend, 1000)
            .execute_query("SELECT * FROM t", None)
            .await
            .unwrap_err();

        match err {
            GateError::QueryFailed { source } => {
                assert_eq!(source, DbError::Connection("connection reset".into()))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.attempts(), 1);
        assert!(!backend.sessions()[0].discarded);
    }

    #[tokio::test]
    async fn test_acquire_failure_is_wrapped() {
        let backend = MockBackend::new().fail_acquire(DbError::PoolExhausted("timed out".into()));
        let err = executor(&backend, 1000)
            .execute_query("SELECT 1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::QueryFailed { .. }));
        assert!(err.to_string().contains("pool exhausted"));
    }

    #[tokio::test]
    async fn test_unbounded_row_cap_does_not_overflow() {
        let backend = MockBackend::new().push_fetch(Ok(rows_of("N", &["a"])));
        let outcome = executor(&backend, usize::MAX)
            .execute_query("SELECT n FROM t", None)
            .await
            .unwrap();
        assert!(!outcome.truncated);
        assert_eq!(backend.sessions()[0].limits, vec![usize::MAX]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, DbError>(())
        };
        let err = bounded(Duration::from_secs(10), slow).await.unwrap_err();
        assert_eq!(err, DbError::Timeout(10));
    }
}
