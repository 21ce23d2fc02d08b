//! Statement execution engine.
//!
//! [`SqlExecutor`] turns a statement plus positional parameters into an
//! [`AsyncOperation`]. Checks that need no network I/O (pool configured,
//! placeholder count) run on the caller's thread and fail synchronously; the
//! statement itself runs on the runtime and reports failures through the handle.
//! Placeholders are counted with the lexing rules of the open pool's dialect,
//! so the pool check comes first.
//!
//! # Architecture
//!
//! Each dispatched operation checks out one [`SqlSession`], runs exactly one
//! statement on it and drops the session before resolving, so the pool gets the
//! connection back whether the statement succeeded or not. Database-specific code
//! lives in the `mysql` and `sqlite` submodules, which provide identical
//! functionality adapted to each driver.

use crate::db::params::{is_cacheable, validate_binding};
use crate::db::pool::{SqlDatabase, SqlSession};
use crate::db::types::SqlRow;
use crate::error::DbResult;
use crate::models::QueryParam;
use crate::operation::AsyncOperation;
use tracing::{debug, warn};

/// Runs statements against a [`SqlDatabase`] without blocking the caller.
///
/// Operations issued back to back are dispatched independently and may finish in
/// any order; await one handle before issuing the next when order matters.
#[derive(Debug, Clone)]
pub struct SqlExecutor {
    database: SqlDatabase,
}

impl SqlExecutor {
    pub fn new(database: SqlDatabase) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &SqlDatabase {
        &self.database
    }

    /// Execute an INSERT, UPDATE, DELETE or DDL statement.
    ///
    /// Resolves to the number of affected rows. Execution failures resolve the
    /// operation to `DbError::Database`; they are never reported as success.
    pub fn update(
        &self,
        sql: impl Into<String>,
        params: Vec<QueryParam>,
    ) -> DbResult<AsyncOperation<u64>> {
        let sql = sql.into();
        let pool = self.database.pool()?;
        validate_binding(&sql, &params, pool.db_type())?;

        debug!(sql = %sql, params = params.len(), "Dispatching update");

        Ok(AsyncOperation::spawn(async move {
            let mut session = pool.acquire().await?;
            let result = match &mut session {
                SqlSession::MySql(conn) => mysql::execute(&mut **conn, &sql, &params).await,
                SqlSession::SQLite(conn) => sqlite::execute(&mut **conn, &sql, &params).await,
            };
            drop(session);

            match &result {
                Ok(rows_affected) => debug!(rows_affected, "Update completed"),
                Err(e) => warn!(sql = %sql, error = %e, "Update failed"),
            }
            result
        }))
    }

    /// Execute a query and map its first row.
    ///
    /// Resolves to `Ok(None)` when the result set is empty. Only the first row is
    /// read; any further rows are discarded.
    pub fn query<T, F>(
        &self,
        sql: impl Into<String>,
        mapper: F,
        params: Vec<QueryParam>,
    ) -> DbResult<AsyncOperation<Option<T>>>
    where
        T: Send + 'static,
        F: FnOnce(&SqlRow) -> DbResult<T> + Send + 'static,
    {
        let sql = sql.into();
        let pool = self.database.pool()?;
        validate_binding(&sql, &params, pool.db_type())?;

        debug!(sql = %sql, params = params.len(), "Dispatching query");

        Ok(AsyncOperation::spawn(async move {
            let mut session = pool.acquire().await?;
            let row = match &mut session {
                SqlSession::MySql(conn) => mysql::fetch_first(&mut **conn, &sql, &params).await,
                SqlSession::SQLite(conn) => sqlite::fetch_first(&mut **conn, &sql, &params).await,
            };
            drop(session);

            match row {
                Ok(Some(row)) => mapper(&row).map(Some),
                Ok(None) => Ok(None),
                Err(e) => {
                    warn!(sql = %sql, error = %e, "Query failed");
                    Err(e)
                }
            }
        }))
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::MySqlConnection;

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        // When params is empty, execute raw SQL directly to avoid prepared statement issues
        // (some DDL doesn't support prepared statements)
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await
        } else {
            let mut query = sqlx::query(sql).persistent(is_cacheable(sql));
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.execute(conn).await
        };
        Ok(result?.rows_affected())
    }

    pub async fn fetch_first(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<SqlRow>> {
        let row = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_optional(sql).await
        } else {
            let mut query = sqlx::query(sql).persistent(is_cacheable(sql));
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.fetch_optional(conn).await
        };
        Ok(row?.map(SqlRow::from))
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::SqliteConnection;

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await
        } else {
            let mut query = sqlx::query(sql).persistent(is_cacheable(sql));
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.execute(conn).await
        };
        Ok(result?.rows_affected())
    }

    pub async fn fetch_first(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<SqlRow>> {
        let row = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_optional(sql).await
        } else {
            let mut query = sqlx::query(sql).persistent(is_cacheable(sql));
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch_optional(conn).await
        };
        Ok(row?.map(SqlRow::from))
    }
}
