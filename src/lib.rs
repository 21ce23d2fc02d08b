//! Async Datastore Library
//!
//! A non-blocking data-access layer over three kinds of backend:
//!
//! - relational (MySQL server or local SQLite file): pooled sessions, statement
//!   execution with positional `?` parameters, and table creation
//! - document (MongoDB): insert-or-replace by key field and lookup
//! - key-value (Redis): an expiring string cache and publish/subscribe messaging
//!
//! Every call that touches a backend returns an [`AsyncOperation`]. Failures that
//! can be detected up front (no pool, closed pool, wrong parameter count) are
//! returned immediately; everything else arrives through the operation.
//!
//! Operations are dispatched onto the tokio runtime and must be created from
//! within one.
//!
//! # Testing
//!
//! The relational tests run against scratch SQLite files and need no setup.
//! The key-value and document integration tests skip themselves unless a
//! server address is provided:
//!
//! ```text
//! REDIS_TEST_URL=redis://127.0.0.1:6379 \
//! MONGODB_TEST_URI=mongodb://127.0.0.1:27017 \
//! cargo test
//! ```

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod kv;
pub mod models;
pub mod operation;

pub use config::DataLayerConfig;
pub use db::{SchemaBuilder, SqlDatabase, SqlExecutor, SqlRow};
pub use document::DocumentStore;
pub use error::{DbError, DbResult};
pub use kv::{KeyValueCache, KeyValueDatabase, PubSubChannel, PubSubMessage};
pub use models::QueryParam;
pub use operation::{AsyncOperation, SharedOperation};

use tracing::info;

/// All configured backends, connected together and closed together.
///
/// Sections missing from the configuration stay disconnected; their handles
/// still exist and report `DbError::NotConnected` when used.
#[derive(Debug, Clone, Default)]
pub struct DataLayer {
    sql: SqlDatabase,
    documents: DocumentStore,
    key_value: KeyValueDatabase,
}

impl DataLayer {
    /// Connect every backend named in `config`.
    ///
    /// Backends already connected are closed again if a later one fails.
    pub async fn connect(config: &DataLayerConfig) -> DbResult<Self> {
        config.validate().map_err(DbError::invalid_input)?;
        let layer = Self::default();

        if let Err(e) = layer.connect_all(config).await {
            layer.close().await;
            return Err(e);
        }

        info!(
            sql = layer.sql.is_connected(),
            document = layer.documents.is_connected(),
            key_value = layer.key_value.is_connected(),
            "Data layer ready"
        );
        Ok(layer)
    }

    async fn connect_all(&self, config: &DataLayerConfig) -> DbResult<()> {
        if let Some(sql) = &config.sql {
            self.sql.connect(sql).await?;
        }
        if let Some(document) = &config.document {
            self.documents
                .connect(&document.uri, &document.database)
                .await?;
        }
        if let Some(key_value) = &config.key_value {
            self.key_value.connect(key_value)?;
        }
        Ok(())
    }

    pub fn sql(&self) -> &SqlDatabase {
        &self.sql
    }

    pub fn executor(&self) -> SqlExecutor {
        SqlExecutor::new(self.sql.clone())
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn key_value(&self) -> &KeyValueDatabase {
        &self.key_value
    }

    pub fn cache(&self) -> KeyValueCache {
        KeyValueCache::new(self.key_value.clone())
    }

    /// A new pub/sub channel on the shared key-value pool. The caller owns it
    /// and closes it independently.
    pub fn pubsub(&self) -> PubSubChannel {
        PubSubChannel::new(self.key_value.clone())
    }

    /// Close every backend. Safe to call repeatedly.
    pub async fn close(&self) {
        self.sql.close().await;
        self.documents.close().await;
        self.key_value.close();
        info!("Data layer closed");
    }
}
