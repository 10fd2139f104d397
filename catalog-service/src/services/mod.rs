pub mod binding;
pub mod catalog;
pub mod database;
pub mod metrics;
pub mod store;

pub use binding::{
    CatalogServiceHandler, CatalogServiceProxy, DirectBinding, Publication, ServiceBinding,
};
pub use catalog::{CatalogError, CatalogService, CatalogServiceImpl, ADDRESS, PRODUCTS_COLLECTION};
pub use database::MongoStore;
pub use self::metrics::{get_metrics, init_metrics};
pub use store::{DocumentStore, MemoryStore, StoreError};
