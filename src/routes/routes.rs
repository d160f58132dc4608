//! Defines routes for the point-of-sale media service.
//!
//! ## Structure
//! - **Health**
//!   - `GET    /healthz`: liveness
//!   - `GET    /readyz` : readiness (SQLite + staging directory)
//!
//! - **Products** (multipart bodies run through the image-ingestion pipeline)
//!   - `GET    /api/products`: list products
//!   - `POST   /api/products`: create product, optional `image` file
//!   - `GET    /api/products/{id}`: fetch product
//!   - `PUT    /api/products/{id}`: partial update, optional replacement image
//!   - `DELETE /api/products/{id}`: delete product and its image
//!   - `GET    /api/products/barcode/{barcode}`: lookup by scanned barcode

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        product_handlers::{
            create_product, delete_product, get_product, get_product_by_barcode, list_products,
            update_product,
        },
    },
    state::AppState,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use tower_http::trace::TraceLayer;

/// Build and return the router for all service routes.
///
/// `body_limit` caps every request body; it should cover one maximum-size
/// image plus the accompanying form fields.
pub fn routes(body_limit: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Product routes
        .route("/api/products", get(list_products).post(create_product))
        .route(
            "/api/products/barcode/{barcode}",
            get(get_product_by_barcode),
        )
        .route(
            "/api/products/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
