//! Schema introspection for the allowlisted tables.
//!
//! Column metadata comes from `information_schema.columns`, filtered by
//! schema and allowlist. Sample rows go through the read-only executor, so
//! they get the same session guards as agent queries.

use crate::db::executor::ReadOnlyExecutor;
use crate::db::pool::SandboxPool;
use crate::error::{DbResult, GovernorError};
use crate::models::{ColumnDefinition, SchemaDescription, TableDescription};
use sqlx::Row;
use std::collections::HashMap;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Rows shown per table.
pub const SAMPLE_ROW_COUNT: u32 = 3;

mod queries {
    pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.table_name::text AS table_name,
            c.column_name::text AS column_name,
            c.data_type::text AS data_type,
            c.is_nullable::text AS is_nullable
        FROM information_schema.columns c
        WHERE c.table_schema::text = $1
        AND c.table_name::text = ANY($2)
        ORDER BY c.table_name, c.ordinal_position
        "#;
}

/// Schema inspector for the allowlisted tables.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Describe `tables` in `schema_name`, keeping allowlist order.
    ///
    /// Tables missing from the schema are described with no columns. A
    /// failed sample fetch is recorded on its table rather than failing the
    /// whole description.
    pub async fn describe_tables(
        pool: &SandboxPool,
        executor: &ReadOnlyExecutor,
        schema_name: &str,
        tables: &[String],
    ) -> DbResult<SchemaDescription> {
        let columns = fetch_columns(pool, executor, schema_name, tables).await?;

        let mut described = Vec::with_capacity(tables.len());
        for table_name in tables {
            let table_columns = columns.get(table_name).cloned().unwrap_or_default();
            let mut table = TableDescription::new(table_name, table_columns);

            if table.exists() {
                let sql = sample_rows_sql(schema_name, table_name);
                match executor.fetch(pool, &sql).await {
                    Ok(result) => table.sample_rows = result.rows,
                    Err(e) => {
                        warn!(table = %table_name, error = %e, "Failed to fetch sample rows");
                        table.sample_error = Some(e.to_string());
                    }
                }
            } else {
                warn!(table = %table_name, schema = %schema_name, "Allowlisted table not found");
            }

            described.push(table);
        }

        Ok(SchemaDescription {
            schema_name: schema_name.to_string(),
            tables: described,
        })
    }
}

async fn fetch_columns(
    pool: &SandboxPool,
    executor: &ReadOnlyExecutor,
    schema_name: &str,
    tables: &[String],
) -> DbResult<HashMap<String, Vec<ColumnDefinition>>> {
    let pg_pool = pool.pool()?;
    debug!(schema = %schema_name, tables = tables.len(), "Fetching column metadata");

    let query = sqlx::query(queries::DESCRIBE_COLUMNS)
        .bind(schema_name)
        .bind(tables)
        .fetch_all(pg_pool);

    let rows = timeout(executor.statement_timeout(), query)
        .await
        .map_err(|_| {
            GovernorError::timeout(
                "column metadata query",
                executor.statement_timeout().as_millis() as u64,
            )
        })??;

    let mut columns: HashMap<String, Vec<ColumnDefinition>> = HashMap::new();
    for row in &rows {
        let table_name: String = row.try_get("table_name")?;
        let name: String = row.try_get("column_name")?;
        let data_type: String = row.try_get("data_type")?;
        let nullable: String = row.try_get("is_nullable")?;

        columns
            .entry(table_name)
            .or_default()
            .push(ColumnDefinition::new(name, data_type, nullable == "YES"));
    }
    Ok(columns)
}

/// Quote an identifier for Postgres, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn sample_rows_sql(schema_name: &str, table_name: &str) -> String {
    format!(
        "SELECT * FROM {}.{} LIMIT {}",
        quote_identifier(schema_name),
        quote_identifier(table_name),
        SAMPLE_ROW_COUNT
    )
}
