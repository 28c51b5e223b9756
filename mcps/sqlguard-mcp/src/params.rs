//! Parameter types for SqlGuard MCP tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteQueryParams {
    #[schemars(description = "A single SELECT statement. Comments are not allowed.")]
    pub sql: String,

    #[schemars(description = "Schema to run the query in (optional, case-insensitive)")]
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteMutationParams {
    #[schemars(
        description = "A single INSERT, UPDATE or DELETE statement. Comments are not allowed."
    )]
    pub sql: String,

    #[schemars(description = "Schema to run the mutation in (optional, case-insensitive)")]
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListTablesParams {
    #[schemars(description = "Schema to list (optional, defaults to the current schema)")]
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DescribeTableParams {
    #[schemars(description = "Name of the table to describe (case-insensitive)")]
    pub table_name: String,

    #[schemars(description = "Schema owning the table (optional, defaults to the current schema)")]
    #[serde(default)]
    pub schema: Option<String>,
}
