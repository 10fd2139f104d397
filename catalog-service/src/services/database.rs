use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    options::ReplaceOptions,
    Client as MongoClient, Database,
};

use super::store::{DocumentStore, StoreError};

/// [`DocumentStore`] backed by MongoDB. The client pools connections.
#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            StoreError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .db
            .collection::<Document>(collection)
            .find(filter, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn save(&self, collection: &str, document: Document) -> Result<String, StoreError> {
        let collection = self.db.collection::<Document>(collection);

        match document.get("_id").cloned() {
            Some(id) => {
                let options = ReplaceOptions::builder().upsert(true).build();
                collection
                    .replace_one(doc! { "_id": id.clone() }, document, options)
                    .await?;
                Ok(id_string(&id))
            }
            None => {
                let result = collection.insert_one(document, None).await?;
                Ok(id_string(&result.inserted_id))
            }
        }
    }

    async fn close(&self) {
        tracing::info!("Closing MongoDB client");
        self.client.clone().shutdown().await;
    }
}

fn id_string(id: &Bson) -> String {
    match id {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}
