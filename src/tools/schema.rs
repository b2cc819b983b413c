//! The `describe_schema` tool and its cache.
//!
//! The description is expensive (one metadata query plus a sample query per
//! table) and changes rarely, so it is loaded once and kept in a
//! [`SchemaCache`]. Loading happens under the cache lock: concurrent callers
//! wait for one load instead of each querying `information_schema`.

use crate::config::GovernorConfig;
use crate::db::{ReadOnlyExecutor, SandboxPool, SchemaInspector};
use crate::error::DbResult;
use schemars::JsonSchema;
use serde::Deserialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const NO_TABLES_CONFIGURED: &str = "No tables are configured for describe_schema. \
Set SCHEMA_TABLES (or --schema-table) to a comma-separated list of table names.";

/// Input for the describe_schema tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct DescribeSchemaInput {
    /// Reload the description from the database instead of using the cached copy. Default: false
    #[serde(default)]
    pub refresh: Option<bool>,
}

impl DescribeSchemaInput {
    pub fn force_refresh(&self) -> bool {
        self.refresh.unwrap_or(false)
    }
}

/// Something that can produce the schema description text.
pub trait SchemaSource: Send + Sync {
    fn load(&self) -> impl Future<Output = DbResult<String>> + Send;
}

/// Loads the description of the allowlisted tables from Postgres.
#[derive(Debug, Clone)]
pub struct PgSchemaSource {
    pool: SandboxPool,
    executor: ReadOnlyExecutor,
    schema_name: String,
    tables: Vec<String>,
}

impl PgSchemaSource {
    pub fn new(
        pool: SandboxPool,
        executor: ReadOnlyExecutor,
        schema_name: impl Into<String>,
        tables: Vec<String>,
    ) -> Self {
        Self {
            pool,
            executor,
            schema_name: schema_name.into(),
            tables,
        }
    }

    pub fn from_config(pool: SandboxPool, config: &GovernorConfig) -> Self {
        Self::new(
            pool,
            ReadOnlyExecutor::from_config(config),
            config.schema_name.trim(),
            config.schema_tables(),
        )
    }
}

impl SchemaSource for PgSchemaSource {
    async fn load(&self) -> DbResult<String> {
        if self.tables.is_empty() {
            return Ok(NO_TABLES_CONFIGURED.to_string());
        }

        let description = SchemaInspector::describe_tables(
            &self.pool,
            &self.executor,
            &self.schema_name,
            &self.tables,
        )
        .await?;
        Ok(description.to_string())
    }
}

#[derive(Debug)]
struct CachedSchema {
    text: String,
    loaded_at: Instant,
}

/// Schema description cache with optional expiry.
///
/// Without a TTL the cached text lives until [`SchemaCache::invalidate`] or a
/// forced refresh. Failed loads are not cached.
#[derive(Debug)]
pub struct SchemaCache<S> {
    source: S,
    ttl: Option<Duration>,
    state: Mutex<Option<CachedSchema>>,
}

impl<S: SchemaSource> SchemaCache<S> {
    pub fn new(source: S, ttl: Option<Duration>) -> Self {
        Self {
            source,
            ttl,
            state: Mutex::new(None),
        }
    }

    /// The cached description, loading it first when missing, expired or forced.
    pub async fn get(&self, force_refresh: bool) -> DbResult<String> {
        let mut state = self.state.lock().await;

        if !force_refresh {
            if let Some(cached) = state.as_ref() {
                if !self.is_expired(cached) {
                    debug!("Schema description served from cache");
                    return Ok(cached.text.clone());
                }
            }
        }

        let text = self.source.load().await?;
        info!(force_refresh, bytes = text.len(), "Schema description loaded");
        *state = Some(CachedSchema {
            text: text.clone(),
            loaded_at: Instant::now(),
        });
        Ok(text)
    }

    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.lock().await.is_some()
    }

    fn is_expired(&self, cached: &CachedSchema) -> bool {
        self.ttl
            .is_some_and(|ttl| cached.loaded_at.elapsed() >= ttl)
    }
}
