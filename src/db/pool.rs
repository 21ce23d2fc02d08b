//! Connection pool management for the relational backend.
//!
//! This module provides connection pooling using database-specific pools
//! (MySqlPool, SqlitePool) to ensure full type support. A [`SqlDatabase`] owns at
//! most one pool at a time and moves through three states: disconnected, open
//! and closed. Acquiring from a disconnected or closed database fails immediately
//! rather than waiting.

use crate::config::{LocalSqlConfig, RemoteSqlConfig, STATEMENT_CACHE_CAPACITY, SqlConfig};
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlx::pool::PoolConnection;
use sqlx::{
    MySql, MySqlPool, Sqlite, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Take a session out of the pool, waiting up to the acquire timeout if all are busy.
    pub async fn acquire(&self) -> DbResult<SqlSession> {
        let session = match self {
            DbPool::MySql(pool) => SqlSession::MySql(pool.acquire().await?),
            DbPool::SQLite(pool) => SqlSession::SQLite(pool.acquire().await?),
        };
        Ok(session)
    }

    /// Number of live connections, idle or in use.
    pub fn size(&self) -> u32 {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.size(),
            SQLite(pool) => pool.size(),
        })
    }

    /// Number of connections currently checked out.
    pub fn in_use(&self) -> u32 {
        let idle = impl_db_dispatch!(self, {
            MySql(pool) => pool.num_idle(),
            SQLite(pool) => pool.num_idle(),
        });
        self.size().saturating_sub(idle as u32)
    }
}

/// A session checked out of a [`DbPool`]. Returned to the pool when dropped, on
/// every exit path.
#[derive(Debug)]
pub enum SqlSession {
    MySql(PoolConnection<MySql>),
    SQLite(PoolConnection<Sqlite>),
}

impl SqlSession {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            SqlSession::MySql(_) => DatabaseType::MySQL,
            SqlSession::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

#[derive(Debug)]
enum PoolState {
    Disconnected,
    Open(DbPool),
    Closed,
}

/// Owner of the relational connection pool.
///
/// Cloning is cheap and every clone refers to the same pool. `connect` must
/// complete before `acquire` or `close` are called.
#[derive(Debug, Clone)]
pub struct SqlDatabase {
    // std lock: never held across an await point
    state: Arc<RwLock<PoolState>>,
}

impl SqlDatabase {
    /// Create a database handle with no pool configured.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PoolState::Disconnected)),
        }
    }

    /// Connect to whichever target the configuration describes.
    pub async fn connect(&self, config: &SqlConfig) -> DbResult<()> {
        match config {
            SqlConfig::Remote(remote) => self.connect_remote(remote).await,
            SqlConfig::Local(local) => self.connect_local(local).await,
        }
    }

    /// Connect to a remote MySQL server.
    ///
    /// Replaces any existing pool without closing it; call [`close`](Self::close)
    /// first if one is open.
    pub async fn connect_remote(&self, config: &RemoteSqlConfig) -> DbResult<()> {
        config
            .pool_options
            .validate()
            .map_err(DbError::invalid_input)?;

        info!(
            url = %config.display_url(),
            user = %config.user,
            "Connecting to relational database"
        );

        let pool_opts = &config.pool_options;
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .charset("utf8mb4")
            .statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

        let pool = MySqlPoolOptions::new()
            .min_connections(pool_opts.min_connections_or_default())
            .max_connections(pool_opts.max_connections_or_default(false))
            .acquire_timeout(pool_opts.acquire_timeout_or_default())
            .idle_timeout(Some(pool_opts.idle_timeout_or_default()))
            .test_before_acquire(pool_opts.test_before_acquire_or_default())
            .connect_with(options)
            .await
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to connect: {}", e),
                    connection_suggestion(DatabaseType::MySQL, &e),
                )
            })?;

        self.install(DbPool::MySql(pool)).await;
        Ok(())
    }

    /// Open (creating if needed) the single-file database `<directory>/<file_name>.db`.
    pub async fn connect_local(&self, config: &LocalSqlConfig) -> DbResult<()> {
        config
            .pool_options
            .validate()
            .map_err(DbError::invalid_input)?;

        std::fs::create_dir_all(&config.directory).map_err(|e| {
            DbError::connection(
                format!(
                    "Failed to create directory {}: {}",
                    config.directory.display(),
                    e
                ),
                "Check that the parent directory is writable",
            )
        })?;

        let path = config.file_path();
        info!(path = %path.display(), "Opening embedded database");

        let pool_opts = &config.pool_options;
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

        let pool = SqlitePoolOptions::new()
            .min_connections(pool_opts.min_connections_or_default())
            .max_connections(pool_opts.max_connections_or_default(true))
            .acquire_timeout(pool_opts.acquire_timeout_or_default())
            .idle_timeout(Some(pool_opts.idle_timeout_or_default()))
            .test_before_acquire(pool_opts.test_before_acquire_or_default())
            .connect_with(options)
            .await
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to open {}: {}", path.display(), e),
                    connection_suggestion(DatabaseType::SQLite, &e),
                )
            })?;

        self.install(DbPool::SQLite(pool)).await;
        Ok(())
    }

    async fn install(&self, pool: DbPool) {
        let db_type = pool.db_type();
        let server_version = server_version(&pool).await;

        let replaced = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, PoolState::Open(pool))
        };
        if let PoolState::Open(previous) = replaced {
            warn!(
                db_type = %previous.db_type(),
                "Replaced an open pool without closing it"
            );
        }

        info!(
            db_type = %db_type,
            server_version = ?server_version,
            "Connected successfully"
        );
    }

    /// Get a handle to the open pool.
    ///
    /// Fails without waiting if `connect` was never called or the pool was closed.
    pub fn pool(&self) -> DbResult<DbPool> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            PoolState::Open(pool) => Ok(pool.clone()),
            PoolState::Disconnected => Err(DbError::not_connected("SQL database")),
            PoolState::Closed => Err(DbError::connection(
                "Connection pool is closed",
                "Reconnect to the database",
            )),
        }
    }

    /// Check out a session. It is returned to the pool when the [`SqlSession`] drops.
    pub async fn acquire(&self) -> DbResult<SqlSession> {
        self.pool()?.acquire().await
    }

    pub fn is_connected(&self) -> bool {
        self.pool().is_ok()
    }

    /// Sessions currently checked out (0 when no pool is open).
    pub fn in_use(&self) -> u32 {
        self.pool().map(|pool| pool.in_use()).unwrap_or(0)
    }

    /// Live connections, idle or in use (0 when no pool is open).
    pub fn size(&self) -> u32 {
        self.pool().map(|pool| pool.size()).unwrap_or(0)
    }

    /// Close the pool and release all sessions. Safe to call repeatedly.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                PoolState::Open(_) => std::mem::replace(&mut *state, PoolState::Closed),
                _ => return,
            }
        };

        if let PoolState::Open(pool) = previous {
            info!(db_type = %pool.db_type(), "Closing relational pool");
            pool.close().await;
        }
    }
}

impl Default for SqlDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the server version from the connected database.
async fn server_version(pool: &DbPool) -> Option<String> {
    let result = match pool {
        DbPool::MySql(pool) => {
            sqlx::query_scalar::<_, String>("SELECT version()")
                .fetch_one(pool)
                .await
        }
        DbPool::SQLite(pool) => {
            sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                .fetch_one(pool)
                .await
        }
    };

    match result {
        Ok(version) => {
            debug!(version = %version, "Got server version");
            Some(version)
        }
        Err(e) => {
            warn!(error = %e, "Failed to get server version");
            None
        }
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("access denied") || error_str.contains("password") {
        return "Verify the username and password".to_string();
    }

    if error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("unable to open") || error_str.contains("readonly") {
        return "Check that the database file is writable".to_string();
    }

    match db_type {
        DatabaseType::MySQL => "Verify the host, port and database name".to_string(),
        DatabaseType::SQLite => "Verify the directory exists and is accessible".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_before_connect_is_not_connected() {
        let db = SqlDatabase::new();
        assert!(matches!(db.pool(), Err(DbError::NotConnected { .. })));
        assert!(!db.is_connected());
        assert_eq!(db.in_use(), 0);
    }

    #[tokio::test]
    async fn test_acquire_before_connect_fails_immediately() {
        let db = SqlDatabase::new();
        let err = db.acquire().await.unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_close_without_connect_is_noop() {
        let db = SqlDatabase::new();
        db.close().await;
        db.close().await;
        assert!(matches!(db.pool(), Err(DbError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_connect_local_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("data");
        let db = SqlDatabase::new();

        db.connect_local(&LocalSqlConfig::new(&nested, "core"))
            .await
            .unwrap();

        assert!(nested.join("core.db").exists());
        assert_eq!(db.pool().unwrap().db_type(), DatabaseType::SQLite);
        db.close().await;
    }

    #[tokio::test]
    async fn test_acquire_after_close_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqlDatabase::new();
        db.connect_local(&LocalSqlConfig::new(dir.path(), "closed"))
            .await
            .unwrap();

        db.close().await;
        db.close().await;

        let err = db.acquire().await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_session_returned_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqlDatabase::new();
        db.connect_local(&LocalSqlConfig::new(dir.path(), "sessions"))
            .await
            .unwrap();

        let session = db.acquire().await.unwrap();
        assert_eq!(session.db_type(), DatabaseType::SQLite);
        assert_eq!(db.in_use(), 1);
        drop(session);

        // The connection goes back to the idle queue asynchronously
        for _ in 0..50 {
            if db.in_use() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(db.in_use(), 0);
        db.close().await;
    }
}
