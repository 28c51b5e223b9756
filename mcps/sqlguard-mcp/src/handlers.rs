//! Tool handlers
//!
//! Each handler forwards to the executor or inspector and renders the
//! outcome. Validation and retry live below this layer.

use rmcp::{
    model::{CallToolResult, Content},
    ErrorData as McpError,
};
use serde::Serialize;

use crate::mutation::MutationExecutor;
use crate::params::*;
use crate::query::QueryExecutor;
use crate::schema::SchemaInspector;

// ============================================================================
// Helper Functions
// ============================================================================

/// Pretty-printed JSON content
fn json_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn text_success(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}

pub(crate) fn mutation_message(affected: u64) -> String {
    format!(
        "Mutation executed successfully. {} row(s) affected.",
        affected
    )
}

// ============================================================================
// Handler Functions
// ============================================================================

pub async fn execute_query(
    executor: &QueryExecutor,
    params: ExecuteQueryParams,
) -> Result<CallToolResult, McpError> {
    let outcome = executor
        .execute_query(&params.sql, params.schema.as_deref())
        .await?;
    json_success(&outcome)
}

pub async fn execute_mutation(
    executor: &MutationExecutor,
    params: ExecuteMutationParams,
) -> Result<CallToolResult, McpError> {
    let affected = executor
        .execute_mutation(&params.sql, params.schema.as_deref())
        .await?;
    Ok(text_success(mutation_message(affected)))
}

pub async fn list_tables(
    inspector: &SchemaInspector,
    params: ListTablesParams,
) -> Result<CallToolResult, McpError> {
    let tables = inspector.list_tables(params.schema.as_deref()).await?;
    json_success(&tables)
}

pub async fn describe_table(
    inspector: &SchemaInspector,
    params: DescribeTableParams,
) -> Result<CallToolResult, McpError> {
    let columns = inspector
        .describe_table(&params.table_name, params.schema.as_deref())
        .await?;
    json_success(&columns)
}

pub async fn list_schemas(inspector: &SchemaInspector) -> Result<CallToolResult, McpError> {
    let schemas = inspector.list_schemas().await?;
    json_success(&schemas)
}
