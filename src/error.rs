//! Error types for the SQL governor.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Policy rejections are deliberately absent here: they are data
//! (see [`crate::models::GuardDecision`]), not errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GovernorError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table, "57014" for statement timeout
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GovernorError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Configuration { .. } => Some(
                "Set SUPABASE_DB_URL, SUPABASE_CONNECTION_STRING, DATABASE_URL or SUPABASE_DB_CONNECTION",
            ),
            _ => None,
        }
    }

    /// True for errors caused by missing or invalid configuration rather than
    /// anything the database reported.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// True when the server aborted the statement because of `statement_timeout`.
    pub fn is_statement_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Database { sql_state, .. } => sql_state.as_deref() == Some(QUERY_CANCELED),
            _ => false,
        }
    }
}

/// SQLSTATE raised by Postgres when `statement_timeout` cancels a statement.
const QUERY_CANCELED: &str = "57014";

/// SQLSTATE raised when a write is attempted in a read-only transaction.
const READ_ONLY_SQL_TRANSACTION: &str = "25006";

fn database_suggestion(code: Option<&str>) -> &'static str {
    match code {
        Some(QUERY_CANCELED) => "Simplify the query or add selective filters; it exceeded the statement timeout",
        Some(READ_ONLY_SQL_TRANSACTION) => "Only read-only queries can run in this session",
        Some("42P01") => "Check the table name; call describe_schema to list known tables",
        Some("42703") => "Check the column name; call describe_schema to list known columns",
        Some("42601") => "Check the SQL syntax",
        Some("42501") => "The database role lacks privileges for this object",
        _ => "Check the SQL syntax and referenced objects",
    }
}

/// Convert sqlx errors to GovernorError.
impl From<sqlx::Error> for GovernorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => GovernorError::configuration(format!(
                "Invalid connection string: {}",
                msg
            )),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let suggestion = database_suggestion(code.as_deref());
                GovernorError::database(db_err.message(), code, suggestion)
            }
            sqlx::Error::RowNotFound => GovernorError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => GovernorError::connection(
                "Timed out waiting for a pooled connection",
                "Too many concurrent queries; retry shortly or raise RUN_SQL_MAX_CONNECTIONS",
            ),
            sqlx::Error::PoolClosed => {
                GovernorError::connection("Connection pool is closed", "Restart the governor")
            }
            sqlx::Error::Io(io_err) => GovernorError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => GovernorError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration; hosted Postgres usually needs the tls-native feature",
            ),
            sqlx::Error::Protocol(msg) => GovernorError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                GovernorError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => {
                GovernorError::internal(format!("Decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => GovernorError::internal("Database worker crashed"),
            _ => GovernorError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for governor operations.
pub type DbResult<T> = Result<T, GovernorError>;
