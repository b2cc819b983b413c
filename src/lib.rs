//! SQL Governor Library
//!
//! A read-only gate between an LLM agent and a production Postgres database.
//! [`tools::guard`] decides whether agent-written SQL may run and hardens it
//! with a row limit; [`db::ReadOnlyExecutor`] runs admitted queries under a
//! statement timeout in a read-only session. Both are exposed as MCP tools.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::GovernorConfig;
pub use error::GovernorError;
pub use mcp::GovernorService;
pub use models::{ExecutionResult, GuardDecision};
pub use tools::{guard, guard_sql};
