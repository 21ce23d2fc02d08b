//! Relational access layer.
//!
//! This module provides:
//! - Connection pool management for a remote MySQL server or a local SQLite file
//! - Non-blocking statement execution with positional parameters
//! - Fluent table definition
//! - Database-agnostic row access
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod executor;
pub mod params;
pub mod pool;
pub mod schema;
pub mod types;

pub use executor::SqlExecutor;
pub use params::{count_placeholders, validate_binding};
pub use pool::{DbPool, SqlDatabase, SqlSession};
pub use schema::{ColumnDefinition, SchemaBuilder};
pub use types::SqlRow;
