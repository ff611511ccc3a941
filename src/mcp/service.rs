//! MCP service implementation using rmcp.
//!
//! Thin adapter: each tool converts its input, calls the gateway and returns
//! the gateway's response shape. Gateway failures are reported inside the
//! response's `error` field; malformed tool input is an MCP `invalid_params`.

use crate::db::PoolStatus;
use crate::error::GatewayResult;
use crate::gateway::SqlGateway;
use crate::models::{
    ExecutionResponse, Query, QueryParam, RunOptions, SortDirection, TableQuery,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    schemars::JsonSchema,
    tool, tool_handler, tool_router,
};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

/// Input for the execute_select tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteSelectInput {
    /// A single SELECT (or WITH ... SELECT) statement. Use ? placeholders ($1, $2... for PostgreSQL) for values.
    pub sql: String,
    /// Positional parameter values (string, number, bool or null)
    #[serde(default)]
    pub params: Vec<JsonValue>,
    /// Maximum rows to return. Default: server setting, max: 10000
    #[serde(default)]
    pub max_rows: Option<u32>,
    /// Query timeout in seconds. Default: server setting, max: 300
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Restrict this call to these schemas (must be a subset of the allowed schemas)
    #[serde(default)]
    pub schemas: Option<Vec<String>>,
}

impl ExecuteSelectInput {
    fn into_request(self) -> GatewayResult<(Query, RunOptions)> {
        let params = self
            .params
            .iter()
            .map(QueryParam::from_json)
            .collect::<GatewayResult<Vec<_>>>()?;
        let options = RunOptions {
            schema_scope: self.schemas,
            timeout: self.timeout_secs.map(Duration::from_secs),
            max_rows: self.max_rows,
        };
        Ok((Query::sql_with_params(self.sql, params), options))
    }
}

/// Sort clause for query_table.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SortInput {
    pub column: String,
    /// ASC (default) or DESC
    #[serde(default)]
    pub direction: SortDirection,
}

/// Input for the query_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryTableInput {
    /// Table name, optionally schema-qualified (schema.table)
    pub table: String,
    /// Column filters. Keys may end with an operator: "age >", "name LIKE", "id IN", "deleted_at IS NOT".
    /// A null value means IS NULL.
    #[serde(default)]
    pub filters: Map<String, JsonValue>,
    /// Columns to return. Empty returns all columns.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub sort: Option<SortInput>,
    /// Maximum rows to return
    #[serde(default)]
    pub limit: Option<u32>,
    /// Rows to skip
    #[serde(default)]
    pub offset: u64,
}

impl QueryTableInput {
    fn into_query(self) -> GatewayResult<TableQuery> {
        let mut query = TableQuery::new(self.table)
            .with_filter_map(&self.filters)?
            .with_columns(self.columns)
            .with_offset(self.offset);
        if let Some(sort) = self.sort {
            query = query.with_sort(sort.column, sort.direction);
        }
        if let Some(limit) = self.limit {
            query = query.with_limit(limit);
        }
        Ok(query)
    }
}

/// Input for the list_tables tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    /// Only list this schema. Default: every allowed schema
    #[serde(default)]
    pub schema: Option<String>,
    /// Include views in the result. Default: false
    #[serde(default)]
    pub include_views: bool,
}

/// Input for the describe_table and find_foreign_keys tools.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TableInput {
    /// Table name, optionally schema-qualified (schema.table)
    pub table: String,
}

#[derive(Clone)]
pub struct GatewayService {
    gateway: Arc<SqlGateway>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    pub fn new(gateway: Arc<SqlGateway>) -> Self {
        Self {
            gateway,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl GatewayService {
    #[tool(
        description = "Run a read-only SELECT query.\nOnly a single SELECT or WITH ... SELECT statement is accepted; tables must be in the allowed schemas.\nPass values as params instead of embedding them in the SQL.\nResults are capped at max_rows; `truncated` is true when more rows existed."
    )]
    async fn execute_select(
        &self,
        Parameters(input): Parameters<ExecuteSelectInput>,
    ) -> Result<Json<ExecutionResponse>, McpError> {
        let (query, options) = input.into_request().map_err(McpError::from)?;
        let outcome = self.gateway.run(query, options).await;
        Ok(Json(ExecutionResponse::from(outcome)))
    }

    #[tool(
        description = "Query one table with structured filters, without writing SQL.\nFilter values are always bound as parameters.\nColumn names are checked against the table's columns."
    )]
    async fn query_table(
        &self,
        Parameters(input): Parameters<QueryTableInput>,
    ) -> Result<Json<ExecutionResponse>, McpError> {
        let query = input.into_query().map_err(McpError::from)?;
        let outcome = self.gateway.query_table(query).await;
        Ok(Json(ExecutionResponse::from(outcome)))
    }

    #[tool(
        description = "List tables in the allowed schemas.\nReturns table_schema, table_name and table_type ('BASE TABLE' or 'VIEW')."
    )]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<ListTablesInput>,
    ) -> Json<ExecutionResponse> {
        let outcome = self
            .gateway
            .list_tables(input.schema.as_deref(), input.include_views)
            .await;
        Json(ExecutionResponse::from(outcome))
    }

    #[tool(
        description = "Describe a table's columns: column_name, data_type, is_nullable, column_default and is_primary_key."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<TableInput>,
    ) -> Json<ExecutionResponse> {
        Json(ExecutionResponse::from(self.gateway.describe_table(&input.table).await))
    }

    #[tool(
        description = "List a table's foreign keys: constraint_name, column_name and the referenced schema, table and column."
    )]
    async fn find_foreign_keys(
        &self,
        Parameters(input): Parameters<TableInput>,
    ) -> Json<ExecutionResponse> {
        Json(ExecutionResponse::from(self.gateway.find_foreign_keys(&input.table).await))
    }

    #[tool(description = "Show connection pool health: open, idle and busy connections and counters.")]
    async fn pool_status(&self) -> Json<PoolStatus> {
        Json(self.gateway.pool_status())
    }
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        let schemas: Vec<&str> = self.gateway.allow_list().names().collect();
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "sql-gateway-mcp".to_owned(),
                title: Some("SQL Gateway MCP".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Read-only SQL access to a {} database.\n\
                \n\
                ## Tools\n\
                - `execute_select`: one SELECT statement with bound params\n\
                - `query_table`: structured filters on a single table\n\
                - `list_tables`, `describe_table`, `find_foreign_keys`: schema discovery\n\
                - `pool_status`: connection pool health\n\
                \n\
                ## Rules\n\
                - Allowed schemas: {}. Unqualified tables resolve to `{}`.\n\
                - Writes, DDL, procedure calls and multiple statements are rejected.\n\
                - Check `error.kind` in the response: validation_rejected, schema_access_denied, \
                pool_exhausted, connection_error, query_timeout or driver_error.",
                self.gateway.validator().database_type(),
                schemas.join(", "),
                self.gateway.allow_list().default_schema(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::models::{ConnectionSettings, DatabaseType, FilterOp};
    use serde_json::json;

    fn create_test_service() -> GatewayService {
        let config = GatewayConfig::for_connection(ConnectionSettings::new(
            DatabaseType::SQLite,
            "sqlite::memory:",
        ))
        .with_allowed_schemas(["main"])
        .with_default_schema("main");
        GatewayService::new(Arc::new(SqlGateway::from_config(&config).unwrap()))
    }

    #[tokio::test]
    async fn test_server_info() {
        let service = create_test_service();
        let info = service.get_info();
        assert_eq!(info.server_info.name, "sql-gateway-mcp");
        let instructions = info.instructions.unwrap();
        assert!(instructions.contains("Allowed schemas: main"));
        assert!(instructions.contains("SQLite"));
    }

    #[test]
    fn test_execute_select_input_conversion() {
        let input: ExecuteSelectInput = serde_json::from_value(json!({
            "sql": "SELECT * FROM t WHERE a = ? AND b = ?",
            "params": ["x", 3],
            "max_rows": 5,
            "timeout_secs": 2,
            "schemas": ["main"]
        }))
        .unwrap();
        let (query, options) = input.into_request().unwrap();
        match query {
            Query::Sql { params, .. } => {
                assert_eq!(params, vec![QueryParam::String("x".into()), QueryParam::Int(3)]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(options.max_rows, Some(5));
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.schema_scope, Some(vec!["main".to_string()]));
    }

    #[test]
    fn test_non_scalar_params_rejected() {
        let input: ExecuteSelectInput = serde_json::from_value(json!({
            "sql": "SELECT ?",
            "params": [[1, 2]]
        }))
        .unwrap();
        let err = input.into_request().unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_list_tables_input_defaults() {
        let input: ListTablesInput = serde_json::from_value(json!({})).unwrap();
        assert!(input.schema.is_none());
        assert!(!input.include_views);
    }

    #[tokio::test]
    async fn test_discovery_tools_report_errors_in_response() {
        let service = create_test_service();

        let Json(response) = service
            .list_tables(Parameters(ListTablesInput {
                schema: Some("secret".into()),
                include_views: false,
            }))
            .await;
        assert_eq!(response.error.unwrap().kind, "schema_access_denied");

        let Json(response) = service
            .describe_table(Parameters(TableInput {
                table: "secret.accounts".into(),
            }))
            .await;
        assert_eq!(response.error.unwrap().kind, "schema_access_denied");

        let Json(response) = service
            .find_foreign_keys(Parameters(TableInput {
                table: "bad name".into(),
            }))
            .await;
        assert_eq!(response.error.unwrap().kind, "validation_rejected");
        assert_eq!(service.gateway.pool_status().acquisitions, 0);
    }

    #[test]
    fn test_query_table_input_conversion() {
        let input: QueryTableInput = serde_json::from_value(json!({
            "table": "Customers",
            "filters": {"City": "Springfield", "age >=": 21},
            "columns": ["Name"],
            "sort": {"column": "Name", "direction": "DESC"},
            "limit": 2
        }))
        .unwrap();
        let query = input.into_query().unwrap();
        assert_eq!(query.table, "Customers");
        assert_eq!(query.filters.len(), 2);
        assert!(query.filters.iter().any(|f| f.column == "age" && f.op == FilterOp::Ge));
        assert_eq!(query.limit, Some(2));
        assert_eq!(query.sort.unwrap().direction, SortDirection::Desc);
    }
}
