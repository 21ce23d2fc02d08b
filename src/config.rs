//! Configuration handling for the data-access layer.
//!
//! All settings are plain serde structs so they can be embedded in an application's
//! own configuration file. Unset options fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// Relational pool defaults
pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const STATEMENT_CACHE_CAPACITY: usize = 250;
/// Statements longer than this are executed without being cached.
pub const MAX_CACHED_STATEMENT_LEN: usize = 2048;

// Key-value pool defaults
pub const DEFAULT_KV_PORT: u16 = 6379;
pub const DEFAULT_KV_MAX_SIZE: u32 = 16;
pub const DEFAULT_KV_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_KV_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Connection pool configuration options for the relational backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 0)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
            if let Some(min) = self.min_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Remote relational database (MySQL dialect).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Sensitive - never log
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub pool_options: PoolOptions,
}

impl RemoteSqlConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            pool_options: PoolOptions::default(),
        }
    }

    /// Connection string without credentials, e.g. `mysql://db.local:3306/app`.
    pub fn display_url(&self) -> String {
        format!("mysql://{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Embedded single-file relational database (SQLite).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSqlConfig {
    pub directory: PathBuf,
    /// File stem; the `.db` extension is appended.
    pub file_name: String,
    #[serde(default)]
    pub pool_options: PoolOptions,
}

impl LocalSqlConfig {
    pub fn new(directory: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            file_name: file_name.into(),
            pool_options: PoolOptions::default(),
        }
    }

    /// Full path of the database file.
    pub fn file_path(&self) -> PathBuf {
        self.directory.join(format!("{}.db", self.file_name))
    }
}

/// Either kind of relational target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlConfig {
    Remote(RemoteSqlConfig),
    Local(LocalSqlConfig),
}

/// Pool settings for the key-value backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValuePoolOptions {
    #[serde(default = "default_kv_max_size")]
    pub max_size: u32,
    /// Idle connections older than this are evicted by the reaper.
    #[serde(default = "default_kv_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Liveness-check (PING) each connection before handing it out.
    #[serde(default = "default_true")]
    pub test_on_borrow: bool,
    /// Network connect timeout for new connections.
    #[serde(default = "default_kv_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Maximum wait for a free connection when the pool is saturated.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl KeyValuePoolOptions {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max_size must be greater than 0".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for KeyValuePoolOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_KV_MAX_SIZE,
            idle_timeout_secs: DEFAULT_KV_IDLE_TIMEOUT_SECS,
            test_on_borrow: true,
            connect_timeout_ms: DEFAULT_KV_CONNECT_TIMEOUT_MS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

/// Key-value server address and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValueConfig {
    pub host: String,
    #[serde(default = "default_kv_port")]
    pub port: u16,
    /// Sensitive - never log
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub pool: KeyValuePoolOptions,
}

impl KeyValueConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            pool: KeyValuePoolOptions::default(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Document store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// e.g. `mongodb://localhost:27017`. Contains credentials - log masked only.
    pub uri: String,
    pub database: String,
}

/// Settings for every backend the application uses. Absent sections are not connected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataLayerConfig {
    #[serde(default)]
    pub sql: Option<SqlConfig>,
    #[serde(default)]
    pub document: Option<DocumentConfig>,
    #[serde(default)]
    pub key_value: Option<KeyValueConfig>,
}

impl DataLayerConfig {
    /// Parse configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| format!("Invalid configuration: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        match &self.sql {
            Some(SqlConfig::Remote(remote)) => remote.pool_options.validate()?,
            Some(SqlConfig::Local(local)) => {
                if local.file_name.trim().is_empty() {
                    return Err("file_name cannot be empty".to_string());
                }
                local.pool_options.validate()?
            }
            None => {}
        }
        if let Some(kv) = &self.key_value {
            kv.pool.validate()?;
        }
        Ok(())
    }
}

fn default_mysql_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

fn default_kv_port() -> u16 {
    DEFAULT_KV_PORT
}

fn default_kv_max_size() -> u32 {
    DEFAULT_KV_MAX_SIZE
}

fn default_kv_idle_timeout_secs() -> u64 {
    DEFAULT_KV_IDLE_TIMEOUT_SECS
}

fn default_kv_connect_timeout_ms() -> u64 {
    DEFAULT_KV_CONNECT_TIMEOUT_MS
}

fn default_acquire_timeout_secs() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}
