//! MCP Server implementation for guarded SQL access
//!
//! This module wires the executors and the schema inspector to MCP tools.
//! Handler implementations are in the handlers module.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError,
};

use crate::config::Config;
use crate::db::{self, DbError, SqlBackend};
use crate::handlers;
use crate::mutation::{MutationExecutor, RetryPolicy};
use crate::params::*;
use crate::query::QueryExecutor;
use crate::schema::SchemaInspector;

/// The SqlGuard MCP Server
#[derive(Clone)]
pub struct SqlGuardServer {
    query: QueryExecutor,
    mutation: MutationExecutor,
    inspector: SchemaInspector,
    tool_router: ToolRouter<Self>,
}

// ============================================================================
// Tool Router - Each tool delegates to its handler
// ============================================================================

#[tool_router]
impl SqlGuardServer {
    /// Connect the configured backend and build the server around it
    pub fn from_config(config: &Config) -> Result<Self, DbError> {
        let backend = db::connect(&config.database, &config.limits)?;
        Ok(Self::with_backend(backend, config))
    }

    /// Build the server over an already-open backend
    pub fn with_backend(backend: Arc<dyn SqlBackend>, config: &Config) -> Self {
        Self {
            query: QueryExecutor::new(backend.clone(), &config.limits),
            mutation: MutationExecutor::new(
                backend.clone(),
                &config.limits,
                RetryPolicy::from(&config.retry),
            ),
            inspector: SchemaInspector::new(backend, &config.limits),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Run a single read-only SELECT statement and return its rows as JSON (capped at the server row limit)"
    )]
    async fn execute_query(
        &self,
        Parameters(params): Parameters<ExecuteQueryParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::execute_query(&self.query, params).await
    }

    #[tool(
        description = "Run a single INSERT, UPDATE or DELETE statement and return the affected row count. Connection failures are retried."
    )]
    async fn execute_mutation(
        &self,
        Parameters(params): Parameters<ExecuteMutationParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::execute_mutation(&self.mutation, params).await
    }

    #[tool(description = "List table names in a schema, sorted")]
    async fn list_tables(
        &self,
        Parameters(params): Parameters<ListTablesParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::list_tables(&self.inspector, params).await
    }

    #[tool(description = "Describe the columns of a table in ordinal order")]
    async fn describe_table(
        &self,
        Parameters(params): Parameters<DescribeTableParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::describe_table(&self.inspector, params).await
    }

    #[tool(description = "List all schema names, sorted")]
    async fn list_schemas(&self) -> Result<CallToolResult, McpError> {
        handlers::list_schemas(&self.inspector).await
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl rmcp::ServerHandler for SqlGuardServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Guarded SQL access MCP server. \
                 execute_query accepts a single SELECT statement. \
                 execute_mutation accepts a single INSERT, UPDATE or DELETE statement. \
                 DDL, procedure calls, dynamic SQL and comments are rejected. \
                 Schema introspection is available through list_tables, describe_table \
                 and list_schemas."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
