//! Location-transparent access to the catalog service.
//!
//! The HTTP side only ever holds an `Arc<dyn CatalogService>`. Which binding
//! sits behind it is decided once at wiring time.

use async_trait::async_trait;
use serde_json::{json, Value};
use service_core::bus::{
    Consumer, ConsumerHandle, Dispatcher, Envelope, EventBus, RemoteBus, Reply, ServiceFailure,
};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::catalog::{CatalogError, CatalogService, ADDRESS};
use crate::models::{DecodeError, Product};

pub const GET_PRODUCTS: &str = "getProducts";
pub const GET_PRODUCT: &str = "getProduct";
pub const ADD_PRODUCT: &str = "addProduct";
pub const PING: &str = "ping";

/// Client side: turns calls into envelopes on a bus, local or remote.
pub struct CatalogServiceProxy {
    dispatcher: Arc<dyn Dispatcher>,
}

impl CatalogServiceProxy {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }

    async fn call(&self, action: &str, body: Value) -> Result<Value, CatalogError> {
        Ok(self
            .dispatcher
            .send(Envelope::new(ADDRESS, action, body))
            .await?)
    }
}

fn expect_string(reply: Value, action: &str) -> Result<String, CatalogError> {
    match reply {
        Value::String(s) => Ok(s),
        other => Err(DecodeError(format!("Unexpected {} reply: {}", action, other)).into()),
    }
}

#[async_trait]
impl CatalogService for CatalogServiceProxy {
    async fn list_products(&self) -> Result<Vec<Product>, CatalogError> {
        match self.call(GET_PRODUCTS, Value::Null).await? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| Product::from_json(item).map_err(CatalogError::from))
                .collect(),
            other => Err(DecodeError(format!("Unexpected {} reply: {}", GET_PRODUCTS, other)).into()),
        }
    }

    async fn get_product(&self, item_id: &str) -> Result<Option<Product>, CatalogError> {
        match self.call(GET_PRODUCT, json!({ "itemId": item_id })).await? {
            Value::Null => Ok(None),
            value => Ok(Some(Product::from_json(value)?)),
        }
    }

    async fn add_product(&self, product: Product) -> Result<String, CatalogError> {
        let reply = self
            .call(ADD_PRODUCT, json!({ "product": product.to_json() }))
            .await?;
        expect_string(reply, ADD_PRODUCT)
    }

    async fn ping(&self) -> Result<String, CatalogError> {
        let reply = self.call(PING, Value::Null).await?;
        expect_string(reply, PING)
    }
}

/// Server side: the bus consumer in front of the real service.
pub struct CatalogServiceHandler {
    service: Arc<dyn CatalogService>,
}

impl CatalogServiceHandler {
    pub fn new(service: Arc<dyn CatalogService>) -> Self {
        Self { service }
    }

    async fn dispatch(&self, action: &str, body: Value) -> Result<Value, CatalogError> {
        match action {
            GET_PRODUCTS => {
                let products = self.service.list_products().await?;
                Ok(Value::Array(products.iter().map(Product::to_json).collect()))
            }
            GET_PRODUCT => {
                let item_id = body
                    .get("itemId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DecodeError("Missing itemId".to_string()))?;
                let product = self.service.get_product(item_id).await?;
                Ok(product.map(|p| p.to_json()).unwrap_or(Value::Null))
            }
            ADD_PRODUCT => {
                let product = body
                    .get("product")
                    .cloned()
                    .ok_or_else(|| DecodeError("Missing product".to_string()))?;
                let id = self.service.add_product(Product::from_json(product)?).await?;
                Ok(Value::String(id))
            }
            PING => Ok(Value::String(self.service.ping().await?)),
            other => Err(CatalogError::Bus(ServiceFailure::unknown_action(
                ADDRESS, other,
            ))),
        }
    }
}

#[async_trait]
impl Consumer for CatalogServiceHandler {
    async fn handle(&self, action: &str, body: Value) -> Reply {
        self.dispatch(action, body).await.map_err(ServiceFailure::from)
    }
}

/// In-process binding without a bus. Empty until the data-access unit
/// installs its service.
#[derive(Default)]
pub struct DirectBinding {
    service: RwLock<Option<Arc<dyn CatalogService>>>,
}

impl DirectBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn install(&self, service: Arc<dyn CatalogService>) {
        *self.service.write().await = Some(service);
        tracing::info!(address = ADDRESS, "Catalog service installed on direct binding");
    }

    pub async fn uninstall(&self) {
        if self.service.write().await.take().is_some() {
            tracing::info!(address = ADDRESS, "Catalog service removed from direct binding");
        }
    }

    async fn current(&self) -> Result<Arc<dyn CatalogService>, CatalogError> {
        self.service
            .read()
            .await
            .clone()
            .ok_or_else(|| CatalogError::Bus(ServiceFailure::no_handler(ADDRESS)))
    }
}

#[async_trait]
impl CatalogService for DirectBinding {
    async fn list_products(&self) -> Result<Vec<Product>, CatalogError> {
        self.current().await?.list_products().await
    }

    async fn get_product(&self, item_id: &str) -> Result<Option<Product>, CatalogError> {
        self.current().await?.get_product(item_id).await
    }

    async fn add_product(&self, product: Product) -> Result<String, CatalogError> {
        self.current().await?.add_product(product).await
    }

    async fn ping(&self) -> Result<String, CatalogError> {
        self.current().await?.ping().await
    }
}

/// How the two units reach each other.
#[derive(Clone)]
pub enum ServiceBinding {
    Direct(Arc<DirectBinding>),
    EventBus(EventBus),
    Remote(RemoteBus),
}

impl ServiceBinding {
    /// The caller-facing service for this binding.
    pub fn proxy(&self) -> Arc<dyn CatalogService> {
        match self {
            ServiceBinding::Direct(direct) => direct.clone(),
            ServiceBinding::EventBus(bus) => {
                Arc::new(CatalogServiceProxy::new(Arc::new(bus.clone())))
            }
            ServiceBinding::Remote(remote) => {
                Arc::new(CatalogServiceProxy::new(Arc::new(remote.clone())))
            }
        }
    }

    /// Make `service` reachable through this binding.
    ///
    /// A remote binding is only a client; the service has to be published on
    /// the event bus the remote end serves.
    pub async fn publish(
        &self,
        service: Arc<dyn CatalogService>,
    ) -> Result<Publication, ServiceFailure> {
        match self {
            ServiceBinding::Direct(direct) => {
                direct.install(service).await;
                Ok(Publication::Direct(direct.clone()))
            }
            ServiceBinding::EventBus(bus) => Ok(Publication::Bus(
                bus.register(ADDRESS, CatalogServiceHandler::new(service)),
            )),
            ServiceBinding::Remote(remote) => Err(ServiceFailure::internal(format!(
                "Cannot publish on remote bus client for {}",
                remote.endpoint()
            ))),
        }
    }
}

/// A published service. [`Publication::withdraw`] makes it unreachable.
pub enum Publication {
    Direct(Arc<DirectBinding>),
    Bus(ConsumerHandle),
}

impl Publication {
    pub async fn withdraw(self) {
        match self {
            Publication::Direct(direct) => direct.uninstall().await,
            Publication::Bus(handle) => handle.unregister(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::CatalogServiceImpl;
    use crate::services::store::{DocumentStore, MemoryStore};
    use service_core::bus::FailureKind;

    fn real_service() -> Arc<dyn CatalogService> {
        Arc::new(CatalogServiceImpl::new(Arc::new(MemoryStore::new()), None))
    }

    fn sticker() -> Product {
        Product::new(
            "329199",
            "Forge Laptop Sticker",
            "JBoss Community Forge Project Sticker",
            8.5,
        )
    }

    async fn exercise(binding: &ServiceBinding) {
        let catalog = binding.proxy();

        assert_eq!(catalog.ping().await.unwrap(), "OK");
        assert_eq!(catalog.add_product(sticker()).await.unwrap(), "329199");
        assert_eq!(catalog.get_product("329199").await.unwrap(), Some(sticker()));
        assert_eq!(catalog.get_product("nonexistent").await.unwrap(), None);
        assert_eq!(catalog.list_products().await.unwrap(), vec![sticker()]);
    }

    #[tokio::test]
    async fn test_direct_binding_contract() {
        let binding = ServiceBinding::Direct(Arc::new(DirectBinding::new()));
        let _publication = binding.publish(real_service()).await.unwrap();
        exercise(&binding).await;
    }

    #[tokio::test]
    async fn test_event_bus_binding_contract() {
        let binding = ServiceBinding::EventBus(EventBus::new());
        let _publication = binding.publish(real_service()).await.unwrap();
        exercise(&binding).await;
    }

    #[tokio::test]
    async fn test_unpublished_bindings_fail_with_no_handler() {
        for binding in [
            ServiceBinding::Direct(Arc::new(DirectBinding::new())),
            ServiceBinding::EventBus(EventBus::new()),
        ] {
            let err = binding.proxy().ping().await.unwrap_err();
            match err {
                CatalogError::Bus(failure) => assert_eq!(failure.kind, FailureKind::NoHandler),
                other => panic!("Expected no handler, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_withdraw_makes_service_unreachable() {
        let binding = ServiceBinding::EventBus(EventBus::new());
        let publication = binding.publish(real_service()).await.unwrap();
        assert!(binding.proxy().ping().await.is_ok());

        publication.withdraw().await;

        assert!(binding.proxy().ping().await.is_err());
    }

    #[tokio::test]
    async fn test_store_failure_crosses_bus_typed() {
        let store = Arc::new(MemoryStore::new());
        let service: Arc<dyn CatalogService> =
            Arc::new(CatalogServiceImpl::new(store.clone(), None));
        let binding = ServiceBinding::EventBus(EventBus::new());
        let _publication = binding.publish(service).await.unwrap();
        store.close().await;

        let err = binding.proxy().list_products().await.unwrap_err();

        assert!(matches!(err, CatalogError::Store(_)));
    }

    #[tokio::test]
    async fn test_unknown_action_is_rejected() {
        let handler = CatalogServiceHandler::new(real_service());

        let failure = handler.handle("deleteProduct", Value::Null).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::UnknownAction);
    }

    #[tokio::test]
    async fn test_malformed_envelope_body_is_decode_failure() {
        let handler = CatalogServiceHandler::new(real_service());

        let failure = handler
            .handle(ADD_PRODUCT, json!({ "product": { "itemId": "1" } }))
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Decode);
    }
}
