//! The `run_sql` tool.
//!
//! Gate first, then execute. A rejected query never reaches the database;
//! the caller gets `{"ok": false}` with the rejection reason and the
//! comment-stripped query text.

use crate::config::GovernorConfig;
use crate::db::{ReadOnlyExecutor, SandboxPool};
use crate::models::{ExecutionResult, FailureKind};
use crate::tools::guard::guard;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

/// Input for the run_sql tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunSqlInput {
    /// A single read-only SQL statement (SELECT, WITH or EXPLAIN). A LIMIT is added when missing.
    pub query: String,
}

/// Handler for the run_sql tool.
#[derive(Debug, Clone)]
pub struct RunSqlToolHandler {
    pool: SandboxPool,
    executor: ReadOnlyExecutor,
    default_limit: u32,
}

impl RunSqlToolHandler {
    pub fn new(pool: SandboxPool, executor: ReadOnlyExecutor, default_limit: u32) -> Self {
        Self {
            pool,
            executor,
            default_limit,
        }
    }

    pub fn from_config(pool: SandboxPool, config: &GovernorConfig) -> Self {
        Self::new(
            pool,
            ReadOnlyExecutor::from_config(config),
            config.default_limit,
        )
    }

    /// Guard and run `query`. Never fails: every outcome is an [`ExecutionResult`].
    pub async fn run_sql(&self, query: &str) -> ExecutionResult {
        let decision = guard(query, self.default_limit);

        if let Some(violation) = decision.violation() {
            warn!(
                category = violation.category(),
                reason = %violation,
                kind = %FailureKind::Rejected,
                "Query rejected"
            );
            return ExecutionResult::failure(
                decision.hardened_query(),
                format!("Query rejected: {}", violation),
                FailureKind::Rejected,
            );
        }

        info!(query = %decision.hardened_query(), "Query admitted");
        self.executor
            .execute(&self.pool, decision.hardened_query())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconfigured_handler() -> RunSqlToolHandler {
        RunSqlToolHandler::from_config(
            SandboxPool::unconfigured("No database connection string found"),
            &GovernorConfig::default(),
        )
    }

    #[test]
    fn test_run_sql_input_deserialization() {
        let input: RunSqlInput = serde_json::from_str(r#"{"query": "SELECT 1"}"#).unwrap();
        assert_eq!(input.query, "SELECT 1");
        assert!(serde_json::from_str::<RunSqlInput>(r#"{}"#).is_err());
    }

    #[tokio::test]
    async fn test_rejected_query_reports_cleaned_text() {
        let result = unconfigured_handler()
            .run_sql("DELETE FROM dim_player -- cleanup")
            .await;
        assert!(!result.is_ok());
        assert_eq!(result.failure_kind(), Some(FailureKind::Rejected));
        assert_eq!(result.query(), "DELETE FROM dim_player");
        assert!(result.error().unwrap().starts_with("Query rejected:"));
    }

    #[tokio::test]
    async fn test_rejection_takes_precedence_over_configuration() {
        let result = unconfigured_handler().run_sql("SELECT 1; SELECT 2").await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Rejected));
    }

    #[tokio::test]
    async fn test_admitted_query_without_database_is_configuration_failure() {
        let result = unconfigured_handler().run_sql("SELECT * FROM dim_player").await;
        assert!(!result.is_ok());
        assert_eq!(result.failure_kind(), Some(FailureKind::Configuration));
        assert_eq!(result.query(), "SELECT * FROM dim_player LIMIT 100;");
    }
}
