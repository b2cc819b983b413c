//! Execution result types returned by the `run_sql` tool.

use serde::Serialize;
use serde::ser::SerializeMap;
use serde_json::Value as JsonValue;
use std::fmt;

/// A serialized result row. Keys keep the column order of the result set.
pub type JsonRow = serde_json::Map<String, JsonValue>;

/// Where a failed call went wrong. Logged, never serialized to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The policy gate refused the query.
    Rejected,
    /// No usable connection string or pool configuration.
    Configuration,
    /// Connection, session setup, execution or timeout failure.
    Execution,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "rejected"),
            Self::Configuration => write!(f, "configuration"),
            Self::Execution => write!(f, "execution"),
        }
    }
}

/// Per-call lifecycle of the execution sandbox.
///
/// `Idle → Connecting → ConfiguringSession → Executing → Serializing`, ending
/// in either a success or a failure. Nothing carries over between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    Idle,
    Connecting,
    ConfiguringSession,
    Executing,
    Serializing,
}

impl fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::ConfiguringSession => "configuring_session",
            Self::Executing => "executing",
            Self::Serializing => "serializing",
        };
        f.write_str(name)
    }
}

/// Rows fetched and serialized by the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<JsonRow>,
    /// True when the client-side row cap cut the result short.
    pub truncated: bool,
}

impl QueryRows {
    /// Build from serialized rows; columns follow the first row's key order.
    pub fn from_rows(rows: Vec<JsonRow>, truncated: bool) -> Self {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            columns,
            rows,
            truncated,
        }
    }
}

/// Outcome of one `run_sql` call.
///
/// Serializes to `{"ok": true, "query", "row_count", "rows", "columns"}` or
/// `{"ok": false, "error", "query"}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success {
        query: String,
        row_count: usize,
        rows: Vec<JsonRow>,
        columns: Vec<String>,
        truncated: bool,
    },
    Failure {
        query: String,
        error: String,
        kind: FailureKind,
    },
}

impl ExecutionResult {
    pub fn success(query: impl Into<String>, result: QueryRows) -> Self {
        Self::Success {
            query: query.into(),
            row_count: result.rows.len(),
            rows: result.rows,
            columns: result.columns,
            truncated: result.truncated,
        }
    }

    pub fn failure(query: impl Into<String>, error: impl fmt::Display, kind: FailureKind) -> Self {
        Self::Failure {
            query: query.into(),
            error: error.to_string(),
            kind,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn query(&self) -> &str {
        match self {
            Self::Success { query, .. } | Self::Failure { query, .. } => query,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            Self::Success { row_count, .. } => *row_count,
            Self::Failure { .. } => 0,
        }
    }

    pub fn rows(&self) -> &[JsonRow] {
        match self {
            Self::Success { rows, .. } => rows,
            Self::Failure { .. } => &[],
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            Self::Success { columns, .. } => columns,
            Self::Failure { .. } => &[],
        }
    }

    /// Render as a JSON value (total: serialization of these types cannot fail).
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "ok": false, "error": e.to_string(), "query": self.query() })
        })
    }
}

impl Serialize for ExecutionResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Success {
                query,
                row_count,
                rows,
                columns,
                truncated,
            } => {
                let len = if *truncated { 6 } else { 5 };
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("query", query)?;
                map.serialize_entry("row_count", row_count)?;
                map.serialize_entry("rows", rows)?;
                map.serialize_entry("columns", columns)?;
                if *truncated {
                    map.serialize_entry("truncated", &true)?;
                }
                map.end()
            }
            Self::Failure { query, error, .. } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("query", query)?;
                map.end()
            }
        }
    }
}
