//! Database-agnostic row access.
//!
//! Row mappers passed to [`SqlExecutor::query`](crate::db::SqlExecutor::query)
//! receive a [`SqlRow`], which hides whether the row came from MySQL or SQLite.
//! Any Rust type that both drivers can decode (integers, floats, `bool`, `String`,
//! `Vec<u8>`, and `Option` of these) can be read from it.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, MySql, Row, Sqlite, Type};
use std::fmt;

/// A single result row from either relational backend.
pub enum SqlRow {
    MySql(MySqlRow),
    SQLite(SqliteRow),
}

impl SqlRow {
    /// Decode a column by name or zero-based index.
    pub fn try_get<T, I>(&self, index: I) -> DbResult<T>
    where
        I: ColumnIndex<MySqlRow> + ColumnIndex<SqliteRow>,
        T: for<'r> Decode<'r, MySql> + Type<MySql> + for<'r> Decode<'r, Sqlite> + Type<Sqlite>,
    {
        match self {
            SqlRow::MySql(row) => row.try_get(index).map_err(DbError::from),
            SqlRow::SQLite(row) => row.try_get(index).map_err(DbError::from),
        }
    }

    /// Column names in result order.
    pub fn columns(&self) -> Vec<String> {
        match self {
            SqlRow::MySql(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            SqlRow::SQLite(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SqlRow::MySql(row) => row.len(),
            SqlRow::SQLite(row) => row.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            SqlRow::MySql(_) => DatabaseType::MySQL,
            SqlRow::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

// SqliteRow has no Debug impl
impl fmt::Debug for SqlRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlRow")
            .field("db_type", &self.db_type())
            .field("columns", &self.columns())
            .finish()
    }
}

impl From<MySqlRow> for SqlRow {
    fn from(row: MySqlRow) -> Self {
        SqlRow::MySql(row)
    }
}

impl From<SqliteRow> for SqlRow {
    fn from(row: SqliteRow) -> Self {
        SqlRow::SQLite(row)
    }
}
