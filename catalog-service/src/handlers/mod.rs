pub mod health;
pub mod products;

pub use health::{health_check, metrics_endpoint};
pub use products::{add_product, get_product, list_products};
