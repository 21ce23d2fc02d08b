//! Table definition builder.
//!
//! [`SchemaBuilder`] accumulates column declarations and renders a single
//! idempotent `CREATE TABLE IF NOT EXISTS` statement. Building is pure; only
//! [`SchemaBuilder::create`] touches the database.
//!
//! ```
//! use async_datastore::db::SchemaBuilder;
//!
//! let sql = SchemaBuilder::new_table("users")
//!     .add_column("id", "INTEGER")
//!     .add_column_with("name", "TEXT", "NOT NULL")
//!     .set_primary_key("id")
//!     .build();
//!
//! assert_eq!(
//!     sql,
//!     "CREATE TABLE IF NOT EXISTS users (id INTEGER, name TEXT NOT NULL, PRIMARY KEY (id));"
//! );
//! ```

use crate::db::executor::SqlExecutor;
use crate::error::{DbError, DbResult};
use crate::operation::AsyncOperation;
use tracing::debug;

/// One declared column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    /// Dialect type, e.g. `VARCHAR(36)` or `INTEGER`
    pub data_type: String,
    /// e.g. `NOT NULL DEFAULT 0`
    pub constraints: Option<String>,
}

impl ColumnDefinition {
    fn render(&self) -> String {
        match &self.constraints {
            Some(constraints) => format!("{} {} {}", self.name, self.data_type, constraints),
            None => format!("{} {}", self.name, self.data_type),
        }
    }
}

/// Fluent builder for a single table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaBuilder {
    table: String,
    columns: Vec<ColumnDefinition>,
    primary_key: Option<String>,
}

impl SchemaBuilder {
    pub fn new_table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            columns: Vec::new(),
            primary_key: None,
        }
    }

    pub fn add_column(mut self, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        self.columns.push(ColumnDefinition {
            name: name.into(),
            data_type: data_type.into(),
            constraints: None,
        });
        self
    }

    pub fn add_column_with(
        mut self,
        name: impl Into<String>,
        data_type: impl Into<String>,
        constraints: impl Into<String>,
    ) -> Self {
        self.columns.push(ColumnDefinition {
            name: name.into(),
            data_type: data_type.into(),
            constraints: Some(constraints.into()),
        });
        self
    }

    /// Set the primary key column. A later call replaces an earlier one.
    pub fn set_primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Render the statement. Column order follows the `add_column*` call order.
    pub fn build(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnDefinition::render).collect();
        if let Some(pk) = &self.primary_key {
            parts.push(format!("PRIMARY KEY ({})", pk));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            self.table,
            parts.join(", ")
        )
    }

    /// Build the statement and run it through `executor`, consuming the builder.
    ///
    /// A table with no columns is rejected before anything is sent.
    pub fn create(self, executor: &SqlExecutor) -> DbResult<AsyncOperation<u64>> {
        if self.columns.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Table '{}' has no columns",
                self.table
            )));
        }
        let sql = self.build();
        debug!(table = %self.table, columns = self.columns.len(), "Creating table");
        executor.update(sql, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::SqlDatabase;

    #[test]
    fn test_build_with_primary_key() {
        let sql = SchemaBuilder::new_table("users")
            .add_column("id", "INTEGER")
            .add_column("name", "TEXT")
            .set_primary_key("id")
            .build();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS users (id INTEGER, name TEXT, PRIMARY KEY (id));"
        );
    }

    #[test]
    fn test_build_without_primary_key() {
        let sql = SchemaBuilder::new_table("events")
            .add_column_with("uuid", "VARCHAR(36)", "NOT NULL")
            .add_column("payload", "TEXT")
            .build();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS events (uuid VARCHAR(36) NOT NULL, payload TEXT);"
        );
        assert!(!sql.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = SchemaBuilder::new_table("t")
            .add_column("b", "INT")
            .add_column("a", "INT")
            .set_primary_key("b");
        assert_eq!(builder.build(), builder.build());
        let sql = builder.build();
        assert!(sql.find("b INT").unwrap() < sql.find("a INT").unwrap());
    }

    #[test]
    fn test_last_primary_key_wins() {
        let sql = SchemaBuilder::new_table("t")
            .add_column("a", "INT")
            .add_column("b", "INT")
            .set_primary_key("a")
            .set_primary_key("b")
            .build();
        assert!(sql.ends_with("PRIMARY KEY (b));"));
    }

    #[test]
    fn test_create_rejects_empty_table() {
        let executor = SqlExecutor::new(SqlDatabase::new());
        let result = SchemaBuilder::new_table("empty").create(&executor);
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }
}
