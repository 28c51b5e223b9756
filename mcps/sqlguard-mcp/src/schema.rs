//! Catalog introspection
//!
//! Fixed queries from the backend's [`CatalogQueries`]; caller input only
//! ever reaches them as bound, upper-cased parameters, so nothing here goes
//! through the validator.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Limits;
use crate::db::{Access, DbError, Row, SchemaName, SqlBackend};
use crate::error::{GateError, Introspection};
use crate::query::bounded;

/// One column of a described table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
    pub nullable: bool,
    pub default: Option<String>,
}

impl ColumnInfo {
    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            name: text(row, "COLUMN_NAME")?
                .ok_or_else(|| missing("COLUMN_NAME"))?,
            data_type: text(row, "DATA_TYPE")?.unwrap_or_default(),
            length: integer(row, "DATA_LENGTH")?,
            precision: integer(row, "DATA_PRECISION")?,
            scale: integer(row, "DATA_SCALE")?,
            nullable: text(row, "NULLABLE")?.is_some_and(|v| v.eq_ignore_ascii_case("Y")),
            default: text(row, "DATA_DEFAULT")?.map(|d| d.trim().to_string()),
        })
    }
}

#[derive(Clone)]
pub struct SchemaInspector {
    backend: Arc<dyn SqlBackend>,
    max_rows: usize,
    statement_timeout: Duration,
}

impl SchemaInspector {
    pub fn new(backend: Arc<dyn SqlBackend>, limits: &Limits) -> Self {
        Self {
            backend,
            // Catalogs are not subject to the query row cap
            max_rows: usize::MAX,
            statement_timeout: limits.statement_timeout(),
        }
    }

    /// Table names in `schema`, or in the session's own schema, sorted
    pub async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>, GateError> {
        let catalog = self.backend.catalog();
        let rows = match SchemaName::parse(schema) {
            Some(schema) => {
                self.catalog_rows(
                    Introspection::ListTables,
                    catalog.tables_in_schema,
                    &[schema.as_str()],
                )
                .await?
            }
            None => {
                self.catalog_rows(Introspection::ListTables, catalog.tables_current, &[])
                    .await?
            }
        };

        let tables = sorted_names(&rows, "TABLE_NAME")
            .map_err(|source| failed(Introspection::ListTables, source))?;
        tracing::info!(
            "Listed {} tables from {}",
            tables.len(),
            schema.map_or("current schema".to_string(), |s| format!("schema: {}", s))
        );
        Ok(tables)
    }

    /// Columns of `table` in ordinal order. An unknown table yields none.
    pub async fn describe_table(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnInfo>, GateError> {
        let table = table.trim();
        if table.is_empty() {
            return Err(GateError::EmptyTableName);
        }
        let table = table.to_uppercase();
        let catalog = self.backend.catalog();

        let rows = match SchemaName::parse(schema) {
            Some(schema) => {
                self.catalog_rows(
                    Introspection::DescribeTable,
                    catalog.columns_in_schema,
                    &[table.as_str(), schema.as_str()],
                )
                .await?
            }
            None => {
                self.catalog_rows(
                    Introspection::DescribeTable,
                    catalog.columns_current,
                    &[table.as_str()],
                )
                .await?
            }
        };

        let columns = rows
            .iter()
            .map(ColumnInfo::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| failed(Introspection::DescribeTable, source))?;
        tracing::info!("Described table {} with {} columns", table, columns.len());
        Ok(columns)
    }

    /// All schema names, sorted
    pub async fn list_schemas(&self) -> Result<Vec<String>, GateError> {
        let rows = self
            .catalog_rows(Introspection::ListSchemas, self.backend.catalog().schemas, &[])
            .await?;
        let schemas = sorted_names(&rows, "USERNAME")
            .map_err(|source| failed(Introspection::ListSchemas, source))?;
        tracing::info!("Listed {} schemas", schemas.len());
        Ok(schemas)
    }

    async fn catalog_rows(
        &self,
        operation: Introspection,
        sql: &str,
        params: &[&str],
    ) -> Result<Vec<Row>, GateError> {
        let timeout = self.statement_timeout;
        let result = async {
            let mut session = bounded(timeout, self.backend.acquire(Access::ReadOnly)).await?;
            let rows = bounded(timeout, session.fetch(sql, params, self.max_rows)).await?;
            bounded(timeout, session.discard()).await?;
            Ok(rows)
        }
        .await;

        result.map_err(|source| {
            tracing::error!("Failed to {}: {}", operation, source);
            failed(operation, source)
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn failed(operation: Introspection, source: DbError) -> GateError {
    GateError::IntrospectionFailed { operation, source }
}

fn missing(column: &str) -> DbError {
    DbError::Statement(format!("catalog row is missing {}", column))
}

fn sorted_names(rows: &[Row], column: &str) -> Result<Vec<String>, DbError> {
    let mut names = rows
        .iter()
        .map(|row| text(row, column)?.ok_or_else(|| missing(column)))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();
    Ok(names)
}

fn text(row: &Row, column: &str) -> Result<Option<String>, DbError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Ok(Some(other.to_string())),
    }
}

fn integer(row: &Row, column: &str) -> Result<Option<i64>, DbError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| DbError::Statement(format!("{} is not an integer: {}", column, n))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DbError::Statement(format!("{} is not an integer: {}", column, s))),
        Some(other) => Err(DbError::Statement(format!(
            "{} is not an integer: {}",
            column, other
        ))),
    }
}
