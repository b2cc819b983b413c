//! MCP service implementation using rmcp.
//!
//! This module defines the GovernorService struct exposing `run_sql` and
//! `describe_schema` via the MCP protocol using the rmcp framework's macros.
//! Query failures are returned as structured `{"ok": false}` payloads with
//! `is_error` set, never as protocol errors.

use crate::config::GovernorConfig;
use crate::db::SandboxPool;
use crate::models::ExecutionResult;
use crate::tools::run_sql::{RunSqlInput, RunSqlToolHandler};
use crate::tools::schema::{DescribeSchemaInput, PgSchemaSource, SchemaCache};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    tool, tool_handler, tool_router,
};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct GovernorService {
    run_sql: Arc<RunSqlToolHandler>,
    /// Shared across sessions so every client sees one cached description
    schema_cache: Arc<SchemaCache<PgSchemaSource>>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GovernorService {
    pub fn new(
        run_sql: Arc<RunSqlToolHandler>,
        schema_cache: Arc<SchemaCache<PgSchemaSource>>,
    ) -> Self {
        Self {
            run_sql,
            schema_cache,
            tool_router: Self::tool_router(),
        }
    }

    /// Build the handlers and the schema cache from configuration.
    pub fn from_config(pool: SandboxPool, config: &GovernorConfig) -> Self {
        let run_sql = RunSqlToolHandler::from_config(pool.clone(), config);
        let schema_cache = SchemaCache::new(
            PgSchemaSource::from_config(pool, config),
            config.schema_cache_ttl(),
        );
        Self::new(Arc::new(run_sql), Arc::new(schema_cache))
    }
}

/// Render an execution result as a tool result carrying its JSON text.
pub fn execution_tool_result(result: &ExecutionResult) -> CallToolResult {
    let content = vec![Content::text(result.to_json().to_string())];
    if result.is_ok() {
        CallToolResult::success(content)
    } else {
        CallToolResult::error(content)
    }
}

#[tool_router]
impl GovernorService {
    #[tool(
        description = "Run a single read-only SQL query against Postgres and return rows as JSON.\nOnly SELECT, WITH and EXPLAIN are accepted; writes, DDL and multiple statements are rejected.\nA LIMIT is added when the query has none. Call describe_schema first to learn table and column names.\nReturns {\"ok\": true, \"rows\", \"columns\", \"row_count\", \"query\"} or {\"ok\": false, \"error\", \"query\"}."
    )]
    async fn run_sql(
        &self,
        Parameters(input): Parameters<RunSqlInput>,
    ) -> Result<CallToolResult, McpError> {
        let result = self.run_sql.run_sql(&input.query).await;
        Ok(execution_tool_result(&result))
    }

    #[tool(
        description = "Describe the tables available to run_sql: column names, types and up to 3 sample rows per table.\nThe description is cached; pass refresh=true to reload it."
    )]
    async fn describe_schema(
        &self,
        Parameters(input): Parameters<DescribeSchemaInput>,
    ) -> Result<CallToolResult, McpError> {
        match self.schema_cache.get(input.force_refresh()).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => {
                warn!(error = %e, "describe_schema failed");
                let mut message = format!("Failed to describe schema: {}", e);
                if let Some(suggestion) = e.suggestion() {
                    message.push_str(&format!("\nSuggestion: {}", suggestion));
                }
                Ok(CallToolResult::error(vec![Content::text(message)]))
            }
        }
    }
}

#[tool_handler]
impl ServerHandler for GovernorService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "sql-governor".to_owned(),
                title: Some("SQL Governor".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Read-only SQL access to a Postgres database.\n\
                \n\
                ## Workflow\n\
                1. Call `describe_schema` to see the available tables, columns and sample rows\n\
                2. Call `run_sql` with one SELECT, WITH or EXPLAIN statement\n\
                \n\
                ## Rules\n\
                - One statement per call; `;` is only allowed at the very end\n\
                - Writes, DDL, session commands and EXPLAIN ANALYZE are rejected\n\
                - A LIMIT is added when missing; results are also capped server-side\n\
                - Queries are cancelled after the configured statement timeout\n\
                \n\
                ## Errors\n\
                Failures come back as `{\"ok\": false, \"error\", \"query\"}`. The `query` field\n\
                shows the text that was checked or run; fix it and call again."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, QueryRows};
    use rmcp::model::RawContent;

    fn create_test_service() -> GovernorService {
        GovernorService::from_config(
            SandboxPool::unconfigured("No database connection string found"),
            &GovernorConfig::default(),
        )
    }

    fn text_of(result: &CallToolResult) -> String {
        match &result.content[0].raw {
            RawContent::Text(text) => text.text.clone(),
            other => panic!("expected text content, got {:?}", other),
        }
    }

    #[test]
    fn test_server_info() {
        let service = create_test_service();
        let info = service.get_info();
        assert_eq!(info.server_info.name, "sql-governor");
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap().contains("describe_schema"));
    }

    #[test]
    fn test_execution_tool_result_success() {
        let result = ExecutionResult::success("SELECT 1 LIMIT 100;", QueryRows::default());
        let tool_result = execution_tool_result(&result);
        assert_eq!(tool_result.is_error, Some(false));
        let json: serde_json::Value = serde_json::from_str(&text_of(&tool_result)).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["row_count"], 0);
    }

    #[test]
    fn test_execution_tool_result_failure_sets_is_error() {
        let result = ExecutionResult::failure("SELECT 1", "boom", FailureKind::Execution);
        let tool_result = execution_tool_result(&result);
        assert_eq!(tool_result.is_error, Some(true));
        let json: serde_json::Value = serde_json::from_str(&text_of(&tool_result)).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "boom");
    }

    #[tokio::test]
    async fn test_run_sql_tool_rejects_writes() {
        let service = create_test_service();
        let result = service
            .run_sql(Parameters(RunSqlInput {
                query: "DROP TABLE dim_player".into(),
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("Query rejected"));
    }

    #[tokio::test]
    async fn test_run_sql_unconfigured_is_tool_error() {
        let service = create_test_service();
        let result = service
            .run_sql(Parameters(RunSqlInput {
                query: "SELECT * FROM dim_player".into(),
            }))
            .await
            .expect("database failures are tool results, not protocol errors");
        assert_eq!(result.is_error, Some(true));
        let json: serde_json::Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["query"], "SELECT * FROM dim_player LIMIT 100;");
    }

    #[tokio::test]
    async fn test_describe_schema_without_tables() {
        let service = create_test_service();
        let result = service
            .describe_schema(Parameters(DescribeSchemaInput::default()))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(false));
        assert!(text_of(&result).contains("No tables are configured"));
    }

    #[tokio::test]
    async fn test_describe_schema_unconfigured_is_tool_error() {
        let mut config = GovernorConfig::default();
        config.schema_tables = vec!["dim_player".into()];
        let service =
            GovernorService::from_config(SandboxPool::unconfigured("missing"), &config);
        let result = service
            .describe_schema(Parameters(DescribeSchemaInput {
                refresh: Some(true),
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("Failed to describe schema"));
    }
}
