//! Read-only query execution.
//!
//! Every call runs on a freshly acquired pooled connection:
//! - `SET statement_timeout` bounds the statement server-side
//! - `SET default_transaction_read_only = on` makes the session refuse writes
//! - the query runs in autocommit mode, without an explicit transaction
//! - rows are streamed and capped client-side at `max_rows`
//!
//! A client-side timeout of the statement timeout plus a grace period backs
//! up the server. When it fires, the connection is closed instead of being
//! returned to the pool.

use crate::config::GovernorConfig;
use crate::db::pool::SandboxPool;
use crate::db::types::RowToJson;
use crate::error::{DbResult, GovernorError};
use crate::models::{ExecutionResult, ExecutionStage, FailureKind, QueryRows};
use futures_util::StreamExt;
use sqlx::postgres::PgRow;
use sqlx::{Executor, PgConnection};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Runs gated queries inside the read-only sandbox. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ReadOnlyExecutor {
    statement_timeout: Duration,
    client_timeout: Duration,
    max_rows: usize,
}

impl ReadOnlyExecutor {
    pub fn new(statement_timeout: Duration, client_timeout: Duration, max_rows: usize) -> Self {
        Self {
            statement_timeout,
            client_timeout,
            max_rows: max_rows.max(1),
        }
    }

    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(
            config.statement_timeout(),
            config.client_timeout(),
            config.max_rows,
        )
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Execute an already-gated query and fold every failure into the result.
    ///
    /// Nothing is retried.
    pub async fn execute(&self, pool: &SandboxPool, hardened_query: &str) -> ExecutionResult {
        let start = Instant::now();
        let mut stage = ExecutionStage::Idle;

        match self.run(pool, hardened_query, &mut stage).await {
            Ok(result) => {
                info!(
                    row_count = result.rows.len(),
                    truncated = result.truncated,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Query executed"
                );
                ExecutionResult::success(hardened_query, result)
            }
            Err(e) => {
                let kind = if e.is_configuration() {
                    FailureKind::Configuration
                } else {
                    FailureKind::Execution
                };
                warn!(
                    %stage,
                    %kind,
                    error = %e,
                    statement_timeout = e.is_statement_timeout(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Query failed"
                );
                ExecutionResult::failure(hardened_query, e, kind)
            }
        }
    }

    /// Execute and return the rows, propagating failures.
    pub async fn fetch(&self, pool: &SandboxPool, sql: &str) -> DbResult<QueryRows> {
        let mut stage = ExecutionStage::Idle;
        self.run(pool, sql, &mut stage).await
    }

    async fn run(
        &self,
        pool: &SandboxPool,
        sql: &str,
        stage: &mut ExecutionStage,
    ) -> DbResult<QueryRows> {
        *stage = ExecutionStage::Connecting;
        let mut conn = pool.acquire().await?;

        let outcome = timeout(self.client_timeout, self.run_on(&mut conn, sql, stage)).await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                // The server never answered; the connection state is unknown.
                conn.close_on_drop();
                Err(GovernorError::timeout(
                    format!("query {}", stage),
                    self.client_timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn run_on(
        &self,
        conn: &mut PgConnection,
        sql: &str,
        stage: &mut ExecutionStage,
    ) -> DbResult<QueryRows> {
        *stage = ExecutionStage::ConfiguringSession;
        self.configure_session(conn).await?;

        *stage = ExecutionStage::Executing;
        debug!(sql = %sql, max_rows = self.max_rows, "Executing query");
        let fetch_limit = self.max_rows + 1;
        let results: Vec<Result<PgRow, sqlx::Error>> =
            (&mut *conn).fetch(sql).take(fetch_limit).collect().await;
        let rows = collect_rows(results)?;

        *stage = ExecutionStage::Serializing;
        Ok(serialize_rows(rows, self.max_rows))
    }

    async fn configure_session(&self, conn: &mut PgConnection) -> DbResult<()> {
        (&mut *conn)
            .execute(session_timeout_sql(self.statement_timeout).as_str())
            .await?;
        (&mut *conn).execute(SESSION_READ_ONLY_SQL).await?;
        Ok(())
    }
}

const SESSION_READ_ONLY_SQL: &str = "SET default_transaction_read_only = on";

fn session_timeout_sql(statement_timeout: Duration) -> String {
    format!("SET statement_timeout = {}", statement_timeout.as_millis())
}

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(GovernorError::from)?);
    }
    Ok(rows)
}

/// Serialize at most `max_rows` rows; one extra fetched row marks truncation.
fn serialize_rows<R: RowToJson>(rows: Vec<R>, max_rows: usize) -> QueryRows {
    let truncated = rows.len() > max_rows;
    if truncated {
        warn!(limit = max_rows, "Query result truncated at row cap");
    }

    let mut result = QueryRows::from_rows(
        rows.iter().take(max_rows).map(RowToJson::to_json_map).collect(),
        truncated,
    );
    if result.columns.is_empty() {
        if let Some(first) = rows.first() {
            result.columns = first.column_names();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JsonRow;
    use serde_json::json;

    struct FakeRow(Vec<(&'static str, serde_json::Value)>);

    impl RowToJson for FakeRow {
        fn to_json_map(&self) -> JsonRow {
            self.0
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect()
        }

        fn column_names(&self) -> Vec<String> {
            self.0.iter().map(|(k, _)| k.to_string()).collect()
        }
    }

    fn fake(id: i64) -> FakeRow {
        FakeRow(vec![("id", json!(id)), ("name", json!(format!("p{}", id)))])
    }

    #[test]
    fn test_executor_from_config() {
        let config = GovernorConfig::default();
        let executor = ReadOnlyExecutor::from_config(&config);
        assert_eq!(executor.statement_timeout(), Duration::from_millis(15_000));
        assert_eq!(executor.client_timeout, Duration::from_millis(17_000));
        assert_eq!(executor.max_rows(), 10_000);
    }

    #[test]
    fn test_executor_max_rows_at_least_one() {
        let executor = ReadOnlyExecutor::new(Duration::from_secs(1), Duration::from_secs(2), 0);
        assert_eq!(executor.max_rows(), 1);
    }

    #[test]
    fn test_session_sql() {
        assert_eq!(
            session_timeout_sql(Duration::from_millis(15_000)),
            "SET statement_timeout = 15000"
        );
        assert_eq!(SESSION_READ_ONLY_SQL, "SET default_transaction_read_only = on");
    }

    #[test]
    fn test_serialize_rows_under_cap() {
        let result = serialize_rows(vec![fake(1), fake(2)], 5);
        assert_eq!(result.rows.len(), 2);
        assert!(!result.truncated);
        assert_eq!(result.columns, vec!["id", "name"]);
    }

    #[test]
    fn test_serialize_rows_truncates_extra_row() {
        let result = serialize_rows(vec![fake(1), fake(2), fake(3)], 2);
        assert_eq!(result.rows.len(), 2);
        assert!(result.truncated);
        assert_eq!(result.rows[1]["id"], json!(2));
    }

    #[test]
    fn test_serialize_rows_empty() {
        let result = serialize_rows(Vec::<FakeRow>::new(), 5);
        assert!(result.rows.is_empty());
        assert!(result.columns.is_empty());
        assert!(!result.truncated);
    }

    #[test]
    fn test_collect_rows_propagates_first_error() {
        let results: Vec<Result<i32, sqlx::Error>> = vec![Ok(1), Err(sqlx::Error::RowNotFound)];
        assert!(collect_rows(results).is_err());
    }

    #[tokio::test]
    async fn test_execute_unconfigured_is_configuration_failure() {
        let executor = ReadOnlyExecutor::from_config(&GovernorConfig::default());
        let pool = SandboxPool::unconfigured("No database connection string found");
        let result = executor.execute(&pool, "SELECT 1 LIMIT 100;").await;
        assert!(!result.is_ok());
        assert_eq!(result.failure_kind(), Some(FailureKind::Configuration));
        assert_eq!(result.query(), "SELECT 1 LIMIT 100;");
    }
}
