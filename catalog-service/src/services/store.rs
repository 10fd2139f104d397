//! The document store seen by the data-access service.

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError(err.to_string())
    }
}

/// Collection-oriented document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document in `collection` whose fields equal those in `filter`.
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>, StoreError>;

    /// Insert, or replace the document with the same `_id`. Returns the `_id`.
    async fn save(&self, collection: &str, document: Document) -> Result<String, StoreError>;

    async fn close(&self);
}

/// Store kept in process memory. Used for local runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError("Store is closed".to_string()));
        }
        Ok(())
    }
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| document.get(key) == Some(expected))
}

fn id_string(id: &Bson) -> String {
    match id {
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>, StoreError> {
        self.ensure_open()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .values()
                    .filter(|document| matches(document, &filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save(&self, collection: &str, mut document: Document) -> Result<String, StoreError> {
        self.ensure_open()?;
        let id = match document.get("_id") {
            Some(id) => id_string(id),
            None => {
                let id = Uuid::new_v4().to_string();
                document.insert("_id", id.clone());
                id
            }
        };

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), document);

        Ok(id)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[tokio::test]
    async fn test_save_then_find_by_field() {
        let store = MemoryStore::new();
        store
            .save("products", doc! { "_id": "1", "itemId": "1", "name": "a" })
            .await
            .unwrap();
        store
            .save("products", doc! { "_id": "2", "itemId": "2", "name": "b" })
            .await
            .unwrap();

        let found = store.find("products", doc! { "itemId": "2" }).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("name").unwrap(), "b");

        let all = store.find("products", doc! {}).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_save_replaces_same_id() {
        let store = MemoryStore::new();
        store
            .save("products", doc! { "_id": "1", "name": "old" })
            .await
            .unwrap();
        let id = store
            .save("products", doc! { "_id": "1", "name": "new" })
            .await
            .unwrap();

        assert_eq!(id, "1");
        let all = store.find("products", doc! {}).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get_str("name").unwrap(), "new");
    }

    #[tokio::test]
    async fn test_save_without_id_generates_one() {
        let store = MemoryStore::new();
        let id = store.save("products", doc! { "name": "x" }).await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_closed_store_fails() {
        let store = MemoryStore::new();
        store.close().await;

        assert!(store.find("products", doc! {}).await.is_err());
        assert!(store.save("products", doc! { "_id": "1" }).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store.find("nothing", doc! {}).await.unwrap().is_empty());
    }
}
