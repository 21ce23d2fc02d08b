//! Connection pool for the key-value backend.
//!
//! The redis client used here is blocking, so connections are pooled with `r2d2`
//! and every command runs on the runtime's blocking pool. [`KeyValueDatabase`]
//! follows the same three-state lifecycle as the relational pool: disconnected,
//! open and closed.

use crate::config::KeyValueConfig;
use crate::error::{DbError, DbResult};
use crate::models::mask_credentials;
use r2d2::{HandleError, ManageConnection, Pool, PooledConnection};
use redis::{Client, ConnectionLike, RedisError};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub type KvPool = Pool<RedisConnectionManager>;
pub type KvConnection = PooledConnection<RedisConnectionManager>;

/// r2d2 manager that opens redis connections with a bounded connect timeout.
#[derive(Debug, Clone)]
pub struct RedisConnectionManager {
    client: Client,
    connect_timeout: Duration,
}

impl RedisConnectionManager {
    pub fn new(client: Client, connect_timeout: Duration) -> Self {
        Self {
            client,
            connect_timeout,
        }
    }
}

impl ManageConnection for RedisConnectionManager {
    type Connection = redis::Connection;
    type Error = RedisError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.client.get_connection_with_timeout(self.connect_timeout)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        redis::cmd("PING").query::<()>(conn)
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        !ConnectionLike::is_open(conn)
    }
}

/// Routes r2d2's background connection errors into tracing.
#[derive(Debug)]
struct TracingErrorHandler;

impl HandleError<RedisError> for TracingErrorHandler {
    fn handle_error(&self, error: RedisError) {
        warn!(error = %error, "Key-value pool connection error");
    }
}

#[derive(Debug)]
enum PoolState {
    Disconnected,
    Open(KvPool),
    Closed,
}

/// Owner of the key-value connection pool.
///
/// Cloning is cheap and every clone refers to the same pool.
#[derive(Debug, Clone)]
pub struct KeyValueDatabase {
    state: Arc<RwLock<PoolState>>,
}

impl KeyValueDatabase {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PoolState::Disconnected)),
        }
    }

    /// Configure the pool.
    ///
    /// Connections are opened lazily on first use, so an unreachable server
    /// is reported by the first command rather than here.
    pub fn connect(&self, config: &KeyValueConfig) -> DbResult<()> {
        config.pool.validate().map_err(DbError::invalid_input)?;

        let url = connection_url(config)?;
        let client = Client::open(url.as_str())?;
        let manager = RedisConnectionManager::new(client, config.pool.connect_timeout());

        let pool = Pool::builder()
            .max_size(config.pool.max_size)
            .min_idle(Some(0))
            .idle_timeout(Some(config.pool.idle_timeout()))
            .test_on_check_out(config.pool.test_on_borrow)
            .connection_timeout(config.pool.acquire_timeout())
            .error_handler(Box::new(TracingErrorHandler))
            .build_unchecked(manager);

        info!(
            url = %mask_credentials(url.as_str()),
            max_size = config.pool.max_size,
            "Key-value pool configured"
        );

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*state, PoolState::Open(_)) {
            warn!("Replacing an open key-value pool");
        }
        *state = PoolState::Open(pool);
        Ok(())
    }

    /// Get a handle to the open pool. Fails without waiting if not open.
    pub fn pool(&self) -> DbResult<KvPool> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            PoolState::Open(pool) => Ok(pool.clone()),
            PoolState::Disconnected => Err(DbError::not_connected("key-value store")),
            PoolState::Closed => Err(DbError::connection(
                "Key-value pool is closed",
                "Reconnect to the key-value store",
            )),
        }
    }

    /// Check out a connection, blocking up to the acquire timeout.
    ///
    /// Must not be called from an async task; use the blocking pool.
    pub fn get(&self) -> DbResult<KvConnection> {
        Ok(self.pool()?.get()?)
    }

    /// Live and idle connection counts, or `None` if no pool is open.
    pub fn state(&self) -> Option<r2d2::State> {
        self.pool().ok().map(|pool| pool.state())
    }

    pub fn is_connected(&self) -> bool {
        self.pool().is_ok()
    }

    /// Drop the pool. Connections still checked out close when returned.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*state, PoolState::Open(_)) {
            info!("Closing key-value pool");
            *state = PoolState::Closed;
        }
    }
}

impl Default for KeyValueDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn connection_url(config: &KeyValueConfig) -> DbResult<Url> {
    let mut url = Url::parse(&format!("redis://{}:{}", config.host, config.port))
        .map_err(|e| DbError::invalid_input(format!("Invalid key-value address: {}", e)))?;
    if let Some(password) = &config.password {
        url.set_password(Some(password.as_str()))
            .map_err(|_| DbError::invalid_input("Cannot set password on key-value address"))?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected() {
        let database = KeyValueDatabase::new();
        assert!(matches!(
            database.pool(),
            Err(DbError::NotConnected { .. })
        ));
        assert!(database.state().is_none());
    }

    #[test]
    fn test_connect_is_lazy_and_close_is_terminal() {
        // Nothing listens on port 1; configuring the pool must still succeed
        let database = KeyValueDatabase::new();
        database
            .connect(&KeyValueConfig::new("127.0.0.1", 1))
            .unwrap();
        assert!(database.is_connected());
        assert_eq!(database.state().unwrap().connections, 0);

        database.close();
        database.close();
        assert!(matches!(database.pool(), Err(DbError::Connection { .. })));
    }

    #[test]
    fn test_connect_rejects_invalid_pool_options() {
        let mut config = KeyValueConfig::new("127.0.0.1", 6379);
        config.pool.max_size = 0;
        let result = KeyValueDatabase::new().connect(&config);
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }

    #[test]
    fn test_connection_url_with_password() {
        let config = KeyValueConfig::new("cache.internal", 6380).with_password("s3cret");
        let url = connection_url(&config).unwrap();
        assert_eq!(url.as_str(), "redis://:s3cret@cache.internal:6380");
        assert!(!mask_credentials(url.as_str()).contains("s3cret"));
    }

    #[test]
    fn test_connection_url_without_password() {
        let url = connection_url(&KeyValueConfig::new("localhost", 6379)).unwrap();
        assert_eq!(url.as_str(), "redis://localhost:6379");
    }
}
