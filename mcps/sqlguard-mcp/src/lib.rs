//! SqlGuard MCP Library
//!
//! Guarded SQL access: a statement validator that admits only single
//! SELECT or INSERT/UPDATE/DELETE statements, a query executor with a row
//! cap, a mutation executor that retries connection failures, and a schema
//! inspector. SQLite and PostgreSQL backends sit behind one port.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use sqlguard_mcp::{Config, SqlGuardServer};
//!
//! let server = SqlGuardServer::from_config(&Config::load(None)?)?;
//! // Serve via stdio, or call the executors directly
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod init;
pub mod mutation;
pub mod params;
pub mod query;
pub mod schema;
pub mod server;
pub mod validator;

pub use config::Config;
pub use error::GateError;
pub use mutation::{MutationExecutor, RetryPolicy};
pub use query::{QueryExecutor, QueryOutcome};
pub use schema::{ColumnInfo, SchemaInspector};
pub use server::SqlGuardServer;
pub use validator::{validate, Rejection, StatementCategory, Verdict};

// Re-export parameter types for direct API usage
pub use params::*;
