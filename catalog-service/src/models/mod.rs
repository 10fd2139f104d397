pub mod product;

pub use product::{DecodeError, Product};
