//! The catalog's only entity and its JSON and document codecs.

use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use validator::Validate;

/// A product as stored and served. `item_id` is supplied by the caller and is
/// also the store's primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub item_id: String,
    pub name: String,
    pub desc: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError(format!("Invalid product: {}", err))
    }
}

impl From<mongodb::bson::de::Error> for DecodeError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        DecodeError(format!("Invalid product document: {}", err))
    }
}

impl From<validator::ValidationErrors> for DecodeError {
    fn from(err: validator::ValidationErrors) -> Self {
        DecodeError(format!("Invalid product: {}", err))
    }
}

impl Product {
    pub fn new(
        item_id: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
        price: f64,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            name: name.into(),
            desc: desc.into(),
            price,
        }
    }

    /// Decode a JSON object. Extra fields are ignored.
    pub fn from_json(value: Value) -> Result<Self, DecodeError> {
        if !value.is_object() {
            return Err(DecodeError("Product must be a JSON object".to_string()));
        }
        let product: Product = serde_json::from_value(value)?;
        product.validate()?;
        Ok(product)
    }

    /// Decode a raw request body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_json(value)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "itemId": self.item_id,
            "name": self.name,
            "desc": self.desc,
            "price": self.price,
        })
    }

    /// Decode a stored document; `_id` is ignored.
    pub fn from_document(document: Document) -> Result<Self, DecodeError> {
        let product: Product = mongodb::bson::from_document(document)?;
        product.validate()?;
        Ok(product)
    }

    /// The stored form: the JSON fields plus `_id` set to the item id.
    pub fn to_document(&self) -> Document {
        doc! {
            "_id": self.item_id.clone(),
            "itemId": self.item_id.clone(),
            "name": self.name.clone(),
            "desc": self.desc.clone(),
            "price": self.price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sticker() -> Product {
        Product::new(
            "329199",
            "Forge Laptop Sticker",
            "JBoss Community Forge Project Sticker",
            8.5,
        )
    }

    #[test]
    fn test_json_round_trip() {
        let product = sticker();
        assert_eq!(Product::from_json(product.to_json()).unwrap(), product);
    }

    #[test]
    fn test_json_has_exactly_four_fields() {
        let value = sticker().to_json();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 4);
        assert_eq!(value["itemId"], "329199");
        assert!(value["price"].is_number());
    }

    #[test]
    fn test_missing_price_is_decode_error() {
        let err = Product::from_json(json!({
            "itemId": "329199",
            "name": "Forge Laptop Sticker",
            "desc": "Sticker"
        }))
        .unwrap_err();
        assert!(err.0.contains("price"));
    }

    #[test]
    fn test_wrong_shape_is_decode_error() {
        assert!(Product::from_json(json!({
            "itemId": 329199,
            "name": "Forge Laptop Sticker",
            "desc": "Sticker",
            "price": 8.5
        }))
        .is_err());
        assert!(Product::from_json(json!(["329199"])).is_err());
        assert!(Product::from_slice(b"not json").is_err());
    }

    #[test]
    fn test_negative_price_is_rejected() {
        let mut value = sticker().to_json();
        value["price"] = json!(-1.0);
        assert!(Product::from_json(value).is_err());
    }

    #[test]
    fn test_integer_price_is_accepted() {
        let mut value = sticker().to_json();
        value["price"] = json!(8);
        assert_eq!(Product::from_json(value).unwrap().price, 8.0);
    }

    fn any_price() -> impl Strategy<Value = f64> {
        prop_oneof![
            Just(0.0),
            (0u32..1_000_000).prop_map(f64::from),
            0.0f64..1.0e9,
        ]
    }

    prop_compose! {
        fn any_product()(
            item_id in any::<String>(),
            name in any::<String>(),
            desc in any::<String>(),
            price in any_price(),
        ) -> Product {
            Product::new(item_id, name, desc, price)
        }
    }

    proptest! {
        #[test]
        fn test_json_round_trip_any_product(product in any_product()) {
            prop_assert_eq!(Product::from_json(product.to_json()).unwrap(), product);
        }

        #[test]
        fn test_document_round_trip_any_product(product in any_product()) {
            let document = product.to_document();
            prop_assert_eq!(document.get_str("_id").unwrap(), product.item_id.as_str());
            prop_assert_eq!(Product::from_document(document).unwrap(), product);
        }
    }

    #[test]
    fn test_document_carries_id() {
        let document = sticker().to_document();
        assert_eq!(document.get_str("_id").unwrap(), "329199");
        assert_eq!(Product::from_document(document).unwrap(), sticker());
    }
}
