//! Core data models for the point-of-sale media service.
//!
//! `upload` holds the types flowing through the ingestion pipeline; `product`
//! is the catalog record the pipeline's output is attached to. Products map to
//! SQLite rows via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod product;
pub mod upload;
