//! Business logic, independent of HTTP.

pub mod blob_store;
pub mod ingest_service;
pub mod product_service;
pub mod staging_service;
pub mod validator;
