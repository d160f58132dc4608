pub mod health_handlers;
pub mod ingest_form;
pub mod product_handlers;
