//! Errors surfaced to callers of the guarded operations

use rmcp::ErrorData as McpError;
use thiserror::Error;

use crate::db::DbError;
use crate::validator::Rejection;

/// Introspection operation names, used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Introspection {
    ListTables,
    DescribeTable,
    ListSchemas,
}

impl std::fmt::Display for Introspection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ListTables => "list tables",
            Self::DescribeTable => "describe table",
            Self::ListSchemas => "list schemas",
        })
    }
}

#[derive(Error, Debug)]
pub enum GateError {
    /// Refused by the validator; never retried
    #[error("invalid statement: {0}")]
    InvalidStatement(#[from] Rejection),

    /// Blank table name passed to describe_table
    #[error("invalid input: table name cannot be empty")]
    EmptyTableName,

    #[error("query execution failed: {source}")]
    QueryFailed {
        #[source]
        source: DbError,
    },

    /// Reports the last cause after the final attempt
    #[error("mutation execution failed after {attempts} attempt(s): {source}")]
    MutationFailed {
        attempts: u32,
        #[source]
        source: DbError,
    },

    #[error("introspection failed ({operation}): {source}")]
    IntrospectionFailed {
        operation: Introspection,
        #[source]
        source: DbError,
    },
}

impl GateError {
    /// The backend failure underneath, if any
    pub fn cause(&self) -> Option<&DbError> {
        match self {
            Self::InvalidStatement(_) | Self::EmptyTableName => None,
            Self::QueryFailed { source }
            | Self::MutationFailed { source, .. }
            | Self::IntrospectionFailed { source, .. } => Some(source),
        }
    }

    /// Whether the underlying failure was connectivity-class
    pub fn is_transient(&self) -> bool {
        self.cause().is_some_and(DbError::is_transient)
    }
}

impl From<GateError> for McpError {
    fn from(err: GateError) -> Self {
        match &err {
            GateError::InvalidStatement(_) | GateError::EmptyTableName => {
                McpError::invalid_params(err.to_string(), None)
            }
            _ => McpError::internal_error(err.to_string(), None),
        }
    }
}
