use crate::services::{ingest_service::IngestService, product_service::ProductService};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub products: ProductService,
    pub ingest: Arc<IngestService>,
}
