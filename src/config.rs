//! Configuration handling for the SQL governor.
//!
//! Settings come from CLI arguments and environment variables via `clap`. An
//! optional dotenv file can be applied to the environment first (see
//! [`ConfigSource`]). The database connection string is resolved separately
//! from an ordered list of environment variables.

use crate::error::{DbResult, GovernorError};
use crate::tools::guard::DEFAULT_ROW_LIMIT;
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_MAX_ROWS: usize = 10_000;
pub const DEFAULT_SCHEMA_NAME: &str = "public";

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Extra time the client waits past `statement_timeout` before giving up on
/// the server and dropping the connection.
pub const CLIENT_TIMEOUT_GRACE_MS: u64 = 2_000;

/// Environment variables holding the connection string, most specific first.
pub const CONNECTION_ENV_VARS: [&str; 4] = [
    "SUPABASE_DB_URL",
    "SUPABASE_CONNECTION_STRING",
    "DATABASE_URL",
    "SUPABASE_DB_CONNECTION",
];

/// Environment variable naming a dotenv file to load at startup.
pub const ENV_FILE_VAR: &str = "GOVERNOR_ENV_FILE";

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for networked agents)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// What the binary does after configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Serve the run_sql and describe_schema tools over MCP (default)
    Serve,
    /// Guard and execute one query, printing the result JSON
    Run {
        /// SQL to run
        sql: String,
    },
    /// Run the admission gate only and print the decision; no database needed
    Guard {
        /// SQL to check
        sql: String,
    },
    /// Print the schema description for the allowlisted tables
    Describe {
        /// Bypass the cache
        #[arg(long)]
        refresh: bool,
    },
}

/// Where configuration values come from.
///
/// The environment is always consulted. With a dotenv file, its entries are
/// loaded into the environment first; variables already set take precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Environment,
    EnvironmentAndFile(PathBuf),
}

impl ConfigSource {
    /// Pick a source from the raw CLI arguments, then `GOVERNOR_ENV_FILE`.
    pub fn detect<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self::detect_with(args, |key| std::env::var(key).ok())
    }

    /// [`ConfigSource::detect`] with an injectable environment lookup.
    pub fn detect_with<I, S, F>(args: I, lookup: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
        F: Fn(&str) -> Option<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            let arg = arg.to_string_lossy().into_owned();
            if arg == "--env-file" {
                if let Some(path) = args.next() {
                    return Self::EnvironmentAndFile(PathBuf::from(path));
                }
            } else if let Some(path) = arg.strip_prefix("--env-file=") {
                return Self::EnvironmentAndFile(PathBuf::from(path));
            }
        }

        match lookup(ENV_FILE_VAR) {
            Some(path) if !path.trim().is_empty() => Self::EnvironmentAndFile(PathBuf::from(path)),
            _ => Self::Environment,
        }
    }

    /// Apply the source to the process environment.
    pub fn load(&self) -> DbResult<()> {
        match self {
            Self::Environment => Ok(()),
            Self::EnvironmentAndFile(path) => dotenvy::from_path(path).map_err(|e| {
                GovernorError::configuration(format!(
                    "Failed to load env file '{}': {}",
                    path.display(),
                    e
                ))
            }),
        }
    }
}

/// Configuration for the SQL governor.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-governor",
    about = "Read-only SQL governor - admits agent-generated SQL and runs it against Postgres",
    version,
    author
)]
pub struct GovernorConfig {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Postgres connection string. Overrides SUPABASE_DB_URL,
    /// SUPABASE_CONNECTION_STRING, DATABASE_URL and SUPABASE_DB_CONNECTION.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Row limit injected into queries without a LIMIT clause
    #[arg(long, default_value_t = DEFAULT_ROW_LIMIT, env = "RUN_SQL_DEFAULT_LIMIT")]
    pub default_limit: u32,

    /// Server-side statement timeout in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_STATEMENT_TIMEOUT_MS,
        env = "RUN_SQL_TIMEOUT_MS"
    )]
    pub timeout_ms: u64,

    /// Hard cap on rows fetched per query, whatever the query's own LIMIT
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS, env = "RUN_SQL_MAX_ROWS")]
    pub max_rows: usize,

    /// Maximum pooled connections
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        env = "RUN_SQL_MAX_CONNECTIONS"
    )]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[arg(
        long,
        default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS,
        env = "RUN_SQL_ACQUIRE_TIMEOUT"
    )]
    pub acquire_timeout_secs: u64,

    /// Tables listed by describe_schema.
    /// Can be specified multiple times or as comma-separated values.
    #[arg(
        long = "schema-table",
        value_name = "TABLE",
        env = "SCHEMA_TABLES",
        value_delimiter = ','
    )]
    pub schema_tables: Vec<String>,

    /// Schema the allowlisted tables live in
    #[arg(long, default_value = DEFAULT_SCHEMA_NAME, env = "SCHEMA_NAME")]
    pub schema_name: String,

    /// Seconds before the schema description is reloaded (default: never)
    #[arg(long, env = "SCHEMA_CACHE_TTL")]
    pub schema_cache_ttl_secs: Option<u64>,

    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "GOVERNOR_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "GOVERNOR_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "GOVERNOR_HTTP_PORT")]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(long, default_value = DEFAULT_MCP_ENDPOINT, env = "GOVERNOR_MCP_ENDPOINT")]
    pub mcp_endpoint: String,

    /// Authentication tokens for HTTP transport.
    /// When set, all HTTP requests must include a valid Bearer token.
    #[arg(
        long = "auth-token",
        value_name = "TOKEN",
        env = "GOVERNOR_AUTH_TOKENS",
        value_delimiter = ','
    )]
    pub auth_tokens: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GOVERNOR_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "GOVERNOR_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable logging output (written to stderr)
    #[arg(long, env = "GOVERNOR_ENABLE_LOGS")]
    pub enable_logs: bool,

    /// Dotenv file loaded before the environment is read
    #[arg(long, value_name = "PATH", env = ENV_FILE_VAR)]
    pub env_file: Option<PathBuf>,
}

impl GovernorConfig {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            command: None,
            database_url: None,
            default_limit: DEFAULT_ROW_LIMIT,
            timeout_ms: DEFAULT_STATEMENT_TIMEOUT_MS,
            max_rows: DEFAULT_MAX_ROWS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            schema_tables: Vec::new(),
            schema_name: DEFAULT_SCHEMA_NAME.to_string(),
            schema_cache_ttl_secs: None,
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            auth_tokens: Vec::new(),
            log_level: "info".to_string(),
            json_logs: false,
            enable_logs: false,
            env_file: None,
        }
    }

    /// The subcommand to run; `serve` when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Reject settings that would make every query fail or hang.
    pub fn validate(&self) -> DbResult<()> {
        if self.default_limit == 0 {
            return Err(GovernorError::configuration(
                "RUN_SQL_DEFAULT_LIMIT must be greater than 0",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(GovernorError::configuration(
                "RUN_SQL_TIMEOUT_MS must be greater than 0",
            ));
        }
        if self.max_rows == 0 {
            return Err(GovernorError::configuration(
                "RUN_SQL_MAX_ROWS must be greater than 0",
            ));
        }
        if self.max_connections == 0 {
            return Err(GovernorError::configuration(
                "RUN_SQL_MAX_CONNECTIONS must be greater than 0",
            ));
        }
        if self.acquire_timeout_secs == 0 {
            return Err(GovernorError::configuration(
                "RUN_SQL_ACQUIRE_TIMEOUT must be greater than 0",
            ));
        }
        if self.schema_name.trim().is_empty() {
            return Err(GovernorError::configuration("SCHEMA_NAME must not be empty"));
        }
        Ok(())
    }

    /// Resolve the connection string from the flag or the environment.
    pub fn connection_string(&self) -> DbResult<String> {
        resolve_connection_string(self.database_url.as_deref())
    }

    /// Allowlisted tables with surrounding whitespace and empties removed.
    pub fn schema_tables(&self) -> Vec<String> {
        self.schema_tables
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Client-side backstop: the statement timeout plus a grace period.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.saturating_add(CLIENT_TIMEOUT_GRACE_MS))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    pub fn schema_cache_ttl(&self) -> Option<Duration> {
        self.schema_cache_ttl_secs.map(Duration::from_secs)
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Resolve the connection string: an explicit value first, then the first
/// non-empty variable of [`CONNECTION_ENV_VARS`].
pub fn resolve_connection_string(explicit: Option<&str>) -> DbResult<String> {
    resolve_connection_string_with(explicit, |key| std::env::var(key).ok())
}

/// [`resolve_connection_string`] with an injectable environment lookup.
pub fn resolve_connection_string_with<F>(explicit: Option<&str>, lookup: F) -> DbResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(url.to_string());
    }

    CONNECTION_ENV_VARS
        .iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .ok_or_else(|| {
            GovernorError::configuration(format!(
                "No database connection string found. Set one of: {}",
                CONNECTION_ENV_VARS.join(", ")
            ))
        })
}

/// Connection string safe for logs: the password is masked.
pub fn redact_connection_string(connection_string: &str) -> String {
    match Url::parse(connection_string) {
        Ok(mut url) => {
            if url.password().is_some() {
                // Only fails for cannot-be-a-base URLs, which carry no password.
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable connection string>".to_string(),
    }
}
