//! Data models for the SQL governor.
//!
//! This module re-exports the request/response value types. None of them is
//! persisted; each is built per call and handed back to the caller.

pub mod execution;
pub mod guard;
pub mod schema;

pub use execution::{ExecutionResult, ExecutionStage, FailureKind, JsonRow, QueryRows};
pub use guard::{GuardDecision, Violation};
pub use schema::{ColumnDefinition, SchemaDescription, TableDescription};
