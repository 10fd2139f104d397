//! Data-access service: the only code that reads or writes products.

use async_trait::async_trait;
use mongodb::bson::doc;
use service_core::bus::{FailureKind, ServiceFailure};
use service_core::error::AppError;
use service_core::observability::{Telemetry, TelemetrySpan};
use std::sync::Arc;
use thiserror::Error;

use super::store::{DocumentStore, StoreError};
use crate::models::{DecodeError, Product};

/// Bus address the catalog service answers on.
pub const ADDRESS: &str = "catalog-service";
pub const PRODUCTS_COLLECTION: &str = "products";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(ServiceFailure),
}

impl From<ServiceFailure> for CatalogError {
    fn from(failure: ServiceFailure) -> Self {
        match failure.kind {
            FailureKind::Decode => CatalogError::Decode(DecodeError(failure.message)),
            FailureKind::Store => CatalogError::Store(StoreError(failure.message)),
            _ => CatalogError::Bus(failure),
        }
    }
}

impl From<CatalogError> for ServiceFailure {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Decode(e) => ServiceFailure::decode(e.0),
            CatalogError::Store(e) => ServiceFailure::store(e.0),
            CatalogError::Bus(failure) => failure,
        }
    }
}

/// Decode failures reaching the HTTP layer came from stored data, so they are
/// server faults. Request bodies are decoded before any call is made.
impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Decode(e) => AppError::InternalError(anyhow::Error::new(e)),
            CatalogError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            CatalogError::Bus(failure) => AppError::from(failure),
        }
    }
}

/// The catalog operations, independent of where they run.
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn list_products(&self) -> Result<Vec<Product>, CatalogError>;

    /// `None` when no product has `item_id`.
    async fn get_product(&self, item_id: &str) -> Result<Option<Product>, CatalogError>;

    /// Insert or overwrite, returning the stored identifier.
    async fn add_product(&self, product: Product) -> Result<String, CatalogError>;

    async fn ping(&self) -> Result<String, CatalogError>;
}

pub struct CatalogServiceImpl {
    store: Arc<dyn DocumentStore>,
    telemetry: Option<Telemetry>,
}

impl CatalogServiceImpl {
    pub fn new(store: Arc<dyn DocumentStore>, telemetry: Option<Telemetry>) -> Self {
        Self { store, telemetry }
    }

    fn start_span(&self, operation: &'static str) -> Option<TelemetrySpan> {
        self.telemetry.as_ref().map(|telemetry| {
            let mut span = telemetry.start_span(operation);
            span.set_attribute("catalog.operation", operation);
            span
        })
    }
}

fn finish<T>(span: Option<TelemetrySpan>, result: &Result<T, CatalogError>) {
    if let Some(span) = span {
        span.finish(result);
    }
}

#[async_trait]
impl CatalogService for CatalogServiceImpl {
    async fn list_products(&self) -> Result<Vec<Product>, CatalogError> {
        let span = self.start_span("list_products");

        let result = async {
            let documents = self.store.find(PRODUCTS_COLLECTION, doc! {}).await?;
            documents
                .into_iter()
                .map(|document| Product::from_document(document).map_err(CatalogError::from))
                .collect::<Result<Vec<_>, _>>()
        }
        .await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Failed to list products");
        }
        finish(span, &result);
        result
    }

    async fn get_product(&self, item_id: &str) -> Result<Option<Product>, CatalogError> {
        let mut span = self.start_span("get_product");
        if let Some(span) = span.as_mut() {
            span.set_attribute("catalog.item_id", item_id.to_string());
        }

        let result = async {
            let documents = self
                .store
                .find(PRODUCTS_COLLECTION, doc! { "itemId": item_id })
                .await?;
            documents
                .into_iter()
                .next()
                .map(Product::from_document)
                .transpose()
                .map_err(CatalogError::from)
        }
        .await;

        if let Err(e) = &result {
            tracing::error!(item_id = %item_id, error = %e, "Failed to get product");
        }
        finish(span, &result);
        result
    }

    async fn add_product(&self, product: Product) -> Result<String, CatalogError> {
        let mut span = self.start_span("add_product");
        if let Some(span) = span.as_mut() {
            span.set_attribute("catalog.item_id", product.item_id.clone());
        }

        let result = self
            .store
            .save(PRODUCTS_COLLECTION, product.to_document())
            .await
            .map_err(CatalogError::from);

        match &result {
            Ok(id) => tracing::info!(item_id = %id, "Product saved"),
            Err(e) => tracing::error!(item_id = %product.item_id, error = %e, "Failed to save product"),
        }
        finish(span, &result);
        result
    }

    async fn ping(&self) -> Result<String, CatalogError> {
        Ok("OK".to_string())
    }
}
