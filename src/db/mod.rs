//! Database layer: the execution sandbox.
//!
//! - Connection pool management
//! - Read-only query execution
//! - Schema introspection
//! - Row to JSON conversion

pub mod executor;
pub mod pool;
pub mod schema;
pub mod types;

pub use executor::ReadOnlyExecutor;
pub use pool::SandboxPool;
pub use schema::SchemaInspector;
