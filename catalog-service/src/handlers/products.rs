use crate::models::Product;
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use service_core::error::AppError;

pub async fn list_products(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let products = state.catalog.list_products().await?;
    Ok(Json(Value::Array(
        products.iter().map(Product::to_json).collect(),
    )))
}

/// 404 with an empty body when the product does not exist.
pub async fn get_product(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> Result<Response, AppError> {
    match state.catalog.get_product(&item_id).await? {
        Some(product) => Ok(Json(product.to_json()).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

/// The body is decoded from the raw bytes whatever its content type.
pub async fn add_product(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let product = Product::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Rejected product body");
        AppError::BadRequest(anyhow::Error::new(e))
    })?;

    state.catalog.add_product(product).await?;

    Ok(StatusCode::CREATED)
}
