use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::{
    models::upload::Transformation,
    services::{
        blob_store::CloudinaryClient,
        ingest_service::{IngestOptions, IngestService},
        product_service::ProductService,
        staging_service::StagingService,
        validator::Validator,
    },
    state::AppState,
};

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting pos-media with config: {:?}", cfg);

    // --- Staging directory: create, then drop leftovers from a previous run ---
    let staging = StagingService::new(&cfg.staging_dir);
    tokio::fs::create_dir_all(staging.base_path())
        .await
        .with_context(|| format!("creating staging directory {}", cfg.staging_dir))?;
    let swept = staging.sweep().await?;
    if swept > 0 {
        tracing::warn!(swept, "Removed leftover staged files from {}", cfg.staging_dir);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Handle migration mode ---
    if migrate {
        db::apply_schema(&db, db::SCHEMA).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let blob_store = CloudinaryClient::new(cfg.blob.clone()).context("building media host client")?;
    let ingest = IngestService::new(
        Validator::default(),
        staging,
        Arc::new(blob_store),
        IngestOptions {
            field_name: cfg.file_field.clone(),
            folder: cfg.upload_folder.clone(),
            transformation: Transformation::bounded(cfg.max_dimension),
        },
    );
    let body_limit = usize::try_from(ingest.max_request_bytes())?;
    let state = AppState {
        products: ProductService::new(db.clone()),
        ingest: Arc::new(ingest),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(body_limit).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
