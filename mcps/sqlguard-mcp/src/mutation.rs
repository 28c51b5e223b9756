//! DML execution with bounded retry
//!
//! The statement is validated once. Execution is then attempted up to
//! `max_attempts` times, each attempt on a freshly acquired session, backing
//! off exponentially between attempts while the failure is connectivity
//! class. Any other failure ends the loop immediately.
//!
//! Retries are not idempotency-guarded: if a connection drops after the
//! server applied an INSERT but before the client saw the result, the
//! retry applies it again.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Limits, RetryConfig};
use crate::db::{Access, DbError, SchemaName, SqlBackend};
use crate::error::GateError;
use crate::query::bounded;
use crate::validator::{validate, StatementCategory};

/// Attempt ceiling and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed `attempt` (1-based) before the next one
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

#[derive(Clone)]
pub struct MutationExecutor {
    backend: Arc<dyn SqlBackend>,
    statement_timeout: Duration,
    retry: RetryPolicy,
}

impl MutationExecutor {
    pub fn new(backend: Arc<dyn SqlBackend>, limits: &Limits, retry: RetryPolicy) -> Self {
        Self {
            backend,
            statement_timeout: limits.statement_timeout(),
            retry,
        }
    }

    /// Run an INSERT/UPDATE/DELETE and return the affected-row count
    pub async fn execute_mutation(&self, sql: &str, schema: Option<&str>) -> Result<u64, GateError> {
        validate(sql, StatementCategory::Mutation).into_result()?;
        let schema = SchemaName::parse(schema);

        let mut attempt = 1;
        loop {
            tracing::debug!(attempt, "Attempting to execute mutation");

            match self.run(sql, schema.as_ref()).await {
                Ok(affected) => {
                    tracing::info!("Mutation completed, {} rows affected", affected);
                    return Ok(affected);
                }
                Err(source) if source.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        "Database connection failure on attempt {}/{}, retrying in {:?}: {}",
                        attempt,
                        self.retry.max_attempts,
                        delay,
                        source
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    tracing::error!("Mutation execution failed: {}", source);
                    return Err(GateError::MutationFailed {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    async fn run(&self, sql: &str, schema: Option<&SchemaName>) -> Result<u64, DbError> {
        let timeout = self.statement_timeout;
        let mut session = bounded(timeout, self.backend.acquire(Access::ReadWrite)).await?;

        if let Some(schema) = schema {
            bounded(timeout, session.set_schema(schema)).await?;
            tracing::info!("Set schema to: {}", schema);
        }

        tracing::info!(backend = self.backend.name(), "Executing mutation: {}", sql);
        let affected = bounded(timeout, session.execute(sql)).await?;
        bounded(timeout, session.finish()).await?;
        Ok(affected)
    }
}
