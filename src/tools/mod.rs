//! MCP tool implementations.
//!
//! - `guard`: the read-only policy gate (pure, no I/O)
//! - `sql_validator`: tokenizer and AST checks used by the gate
//! - `run_sql`: gate, then execute in the read-only sandbox
//! - `schema`: `describe_schema` and its cache

pub mod guard;
pub mod run_sql;
pub mod schema;
pub mod sql_validator;

pub use guard::{DEFAULT_ROW_LIMIT, guard, guard_sql};
pub use run_sql::{RunSqlInput, RunSqlToolHandler};
pub use schema::{DescribeSchemaInput, PgSchemaSource, SchemaCache, SchemaSource};
