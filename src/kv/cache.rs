//! String cache with server-side expiry.

use crate::error::{DbError, DbResult};
use crate::kv::pool::KeyValueDatabase;
use crate::operation::AsyncOperation;
use redis::{Commands, Connection, RedisResult};
use tracing::{debug, warn};

/// Expiring string cache backed by the key-value pool.
///
/// Each call checks out one connection on the blocking pool, issues a single
/// command and returns the connection before the operation resolves.
#[derive(Debug, Clone)]
pub struct KeyValueCache {
    database: KeyValueDatabase,
}

impl KeyValueCache {
    pub fn new(database: KeyValueDatabase) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &KeyValueDatabase {
        &self.database
    }

    /// Store `value` under `key`, expiring after `seconds_to_live` seconds.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        seconds_to_live: u64,
    ) -> DbResult<AsyncOperation<()>> {
        if seconds_to_live == 0 {
            return Err(DbError::invalid_input("TTL must be at least one second"));
        }
        let value = value.into();
        self.dispatch("SETEX", key.into(), move |conn, key| {
            conn.set_ex(key, value, seconds_to_live)
        })
    }

    /// Resolves to `None` for a missing or expired key.
    pub fn get(&self, key: impl Into<String>) -> DbResult<AsyncOperation<Option<String>>> {
        self.dispatch("GET", key.into(), |conn, key| conn.get(key))
    }

    pub fn exists(&self, key: impl Into<String>) -> DbResult<AsyncOperation<bool>> {
        self.dispatch("EXISTS", key.into(), |conn, key| conn.exists(key))
    }

    fn dispatch<T, F>(
        &self,
        command: &'static str,
        key: String,
        call: F,
    ) -> DbResult<AsyncOperation<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> RedisResult<T> + Send + 'static,
    {
        let pool = self.database.pool()?;
        debug!(command, key = %key, "Dispatching key-value command");

        Ok(AsyncOperation::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let result = call(&mut conn, &key).map_err(DbError::from);
            drop(conn);

            if let Err(e) = &result {
                warn!(command, key = %key, error = %e, "Key-value command failed");
            }
            result
        }))
    }
}
