//! HTTP handlers for the product catalog.
//!
//! Create and update take an `IngestedForm`, so by the time they run any
//! attached image is already on the media host. If the database write then
//! fails, the fresh image is removed again.

use crate::{
    errors::AppError,
    handlers::ingest_form::{IngestedForm, discard},
    models::product::Product,
    services::product_service::{NewProduct, ProductUpdate},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// `POST /api/products`: multipart create, image optional.
pub async fn create_product(
    State(state): State<AppState>,
    form: IngestedForm,
) -> Result<impl IntoResponse, AppError> {
    let new = match NewProduct::from_form(&form.fields, form.asset.clone()) {
        Ok(new) => new,
        Err(err) => {
            discard(&state, form.asset).await;
            return Err(err.into());
        }
    };

    match state.products.create(new).await {
        Ok(product) => {
            info!(request_id = %form.request_id, product_id = %product.id, "product created");
            Ok((StatusCode::CREATED, ApiResponse::ok(product)))
        }
        Err(err) => {
            discard(&state, form.asset).await;
            Err(err.into())
        }
    }
}

/// `GET /api/products`
pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Product>>>, AppError> {
    Ok(ApiResponse::ok(state.products.list().await?))
}

/// `GET /api/products/{id}`
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Product>>, AppError> {
    let id = parse_id(&id)?;
    Ok(ApiResponse::ok(state.products.get(id).await?))
}

/// `GET /api/products/barcode/{barcode}`: register scan lookup.
pub async fn get_product_by_barcode(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> Result<Json<ApiResponse<Product>>, AppError> {
    Ok(ApiResponse::ok(
        state.products.find_by_barcode(&barcode).await?,
    ))
}

/// `PUT /api/products/{id}`: multipart partial update.
///
/// A new image replaces the stored one; the old remote asset is then
/// destroyed best effort.
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    form: IngestedForm,
) -> Result<Json<ApiResponse<Product>>, AppError> {
    let parsed = parse_id(&id).and_then(|id| {
        ProductUpdate::from_form(&form.fields, form.asset.clone())
            .map(|update| (id, update))
            .map_err(AppError::from)
    });
    let (id, update) = match parsed {
        Ok(parsed) => parsed,
        Err(err) => {
            discard(&state, form.asset).await;
            return Err(err);
        }
    };

    match state.products.update(id, update).await {
        Ok((product, replaced)) => {
            if let Some(old) = replaced {
                discard_id(&state, old).await;
            }
            info!(request_id = %form.request_id, product_id = %product.id, "product updated");
            Ok(ApiResponse::ok(product))
        }
        Err(err) => {
            discard(&state, form.asset).await;
            Err(err.into())
        }
    }
}

/// `DELETE /api/products/{id}`: also removes the image from the media host.
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Product>>, AppError> {
    let id = parse_id(&id)?;
    let product = state.products.delete(id).await?;
    if let Some(image_id) = product.image_id.clone() {
        discard_id(&state, image_id).await;
    }
    info!(product_id = %product.id, "product deleted");
    Ok(ApiResponse::ok(product))
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request(format!("invalid product id `{raw}`")))
}

async fn discard_id(state: &AppState, public_id: String) {
    if let Err(err) = state.ingest.blob_store().destroy(&public_id).await {
        tracing::warn!(%public_id, error = %err, "failed to remove replaced remote asset");
    }
}
