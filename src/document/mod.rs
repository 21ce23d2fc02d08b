//! Document backend.
//!
//! [`DocumentStore`] binds one client to one database and exposes
//! insert-or-replace by an arbitrary key field plus single-document lookup.
//! The driver is natively async and pools its own connections; its sizing is
//! left at the driver defaults.
//!
//! Upserts match on `key_field == key_value` and replace at most one document.
//! Nothing stops a collection from holding several documents with the same
//! key; call [`DocumentStore::ensure_unique_key`] once per collection to have
//! the server reject duplicates.

use crate::error::{DbError, DbResult};
use crate::models::mask_credentials;
use crate::operation::AsyncOperation;
use mongodb::bson::{self, Bson, Document, doc};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug)]
enum StoreState {
    Disconnected,
    Open { client: Client, database: Database },
    Closed,
}

/// Handle to one database on a document server.
///
/// Cloning is cheap and every clone shares the same client.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    state: Arc<RwLock<StoreState>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::Disconnected)),
        }
    }

    /// Open a client for `uri` and bind it to `database`.
    ///
    /// The server is pinged once so that an unreachable address or bad
    /// credentials fail here instead of on the first save.
    pub async fn connect(&self, uri: &str, database: &str) -> DbResult<()> {
        if database.trim().is_empty() {
            return Err(DbError::invalid_input("Database name cannot be empty"));
        }
        info!(uri = %mask_credentials(uri), database, "Connecting to document store");

        let client = Client::with_uri_str(uri).await?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }).await?;

        let previous = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(
                &mut *state,
                StoreState::Open {
                    client,
                    database: db,
                },
            )
        };
        if let StoreState::Open { client, .. } = previous {
            warn!("Replacing an open document store client");
            client.shutdown().await;
        }

        info!(database, "Document store connected");
        Ok(())
    }

    fn database(&self) -> DbResult<Database> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            StoreState::Open { database, .. } => Ok(database.clone()),
            StoreState::Disconnected => Err(DbError::not_connected("document store")),
            StoreState::Closed => Err(DbError::connection(
                "Document store client is closed",
                "Reconnect to the document store",
            )),
        }
    }

    /// Handle to a collection in the bound database.
    pub fn get_collection(&self, name: &str) -> DbResult<Collection<Document>> {
        if name.is_empty() {
            return Err(DbError::invalid_input("Collection name cannot be empty"));
        }
        Ok(self.database()?.collection::<Document>(name))
    }

    pub fn is_connected(&self) -> bool {
        self.database().is_ok()
    }

    /// Replace the document whose `key_field` equals `key_value`, or insert
    /// `document` unchanged when none matches.
    pub fn save(
        &self,
        collection: &str,
        key_field: &str,
        key_value: impl Into<Bson>,
        document: Document,
    ) -> DbResult<AsyncOperation<()>> {
        let coll = self.get_collection(collection)?;
        let filter = key_filter(key_field, key_value)?;
        debug!(collection, key_field, "Dispatching save");

        Ok(AsyncOperation::spawn(async move {
            let result = coll.replace_one(filter, document).upsert(true).await?;
            debug!(
                collection = %coll.name(),
                matched = result.matched_count,
                upserted = result.upserted_id.is_some(),
                "Save completed"
            );
            Ok(())
        }))
    }

    /// First document whose `key_field` equals `key_value`.
    pub fn find(
        &self,
        collection: &str,
        key_field: &str,
        key_value: impl Into<Bson>,
    ) -> DbResult<AsyncOperation<Option<Document>>> {
        let coll = self.get_collection(collection)?;
        let filter = key_filter(key_field, key_value)?;
        debug!(collection, key_field, "Dispatching find");

        Ok(AsyncOperation::spawn(async move {
            Ok(coll.find_one(filter).await?)
        }))
    }

    /// [`save`](Self::save) for any serializable value.
    pub fn save_as<T: Serialize>(
        &self,
        collection: &str,
        key_field: &str,
        key_value: impl Into<Bson>,
        value: &T,
    ) -> DbResult<AsyncOperation<()>> {
        let document = bson::to_document(value)?;
        self.save(collection, key_field, key_value, document)
    }

    /// [`find`](Self::find) decoding the document into `T`.
    pub fn find_as<T>(
        &self,
        collection: &str,
        key_field: &str,
        key_value: impl Into<Bson>,
    ) -> DbResult<AsyncOperation<Option<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let coll = self.get_collection(collection)?;
        let filter = key_filter(key_field, key_value)?;

        Ok(AsyncOperation::spawn(async move {
            match coll.find_one(filter).await? {
                Some(document) => Ok(Some(bson::from_document(document)?)),
                None => Ok(None),
            }
        }))
    }

    /// Create a unique index on `key_field` so that saves keyed on it can
    /// never match more than one document. Idempotent on the server.
    pub fn ensure_unique_key(
        &self,
        collection: &str,
        key_field: &str,
    ) -> DbResult<AsyncOperation<()>> {
        let coll = self.get_collection(collection)?;
        if key_field.is_empty() {
            return Err(DbError::invalid_input("Key field cannot be empty"));
        }
        let mut keys = Document::new();
        keys.insert(key_field, 1);
        let index = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(true).build())
            .build();

        Ok(AsyncOperation::spawn(async move {
            let created = coll.create_index(index).await?;
            info!(collection = %coll.name(), index = %created.index_name, "Unique key index ready");
            Ok(())
        }))
    }

    /// Release the client. Safe to call repeatedly.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                StoreState::Open { .. } => std::mem::replace(&mut *state, StoreState::Closed),
                _ => return,
            }
        };
        if let StoreState::Open { client, .. } = previous {
            info!("Closing document store client");
            client.shutdown().await;
        }
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key_filter(key_field: &str, key_value: impl Into<Bson>) -> DbResult<Document> {
    if key_field.is_empty() {
        return Err(DbError::invalid_input("Key field cannot be empty"));
    }
    let mut filter = Document::new();
    filter.insert(key_field, key_value.into());
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_collection_before_connect() {
        let store = DocumentStore::new();
        assert!(matches!(
            store.get_collection("users"),
            Err(DbError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_save_and_find_before_connect_fail_synchronously() {
        let store = DocumentStore::new();
        let save = store.save("users", "id", 7, doc! { "id": 7 });
        assert!(matches!(save, Err(DbError::NotConnected { .. })));
        let find = store.find("users", "id", 7);
        assert!(matches!(find, Err(DbError::NotConnected { .. })));
    }

    #[test]
    fn test_key_filter() {
        let filter = key_filter("email", "ada@example.com").unwrap();
        assert_eq!(filter, doc! { "email": "ada@example.com" });
        assert!(matches!(
            key_filter("", 1),
            Err(DbError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_without_connect_is_noop() {
        let store = DocumentStore::new();
        store.close().await;
        store.close().await;
        assert!(matches!(
            store.get_collection("users"),
            Err(DbError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_uri_rejected() {
        let store = DocumentStore::new();
        let err = store.connect("not-a-uri", "app").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }), "{err}");
        assert!(!store.is_connected());
    }
}
