//! Shared fixtures for unit and router tests.

use crate::{
    models::upload::{RemoteAsset, StagedFile, Transformation},
    services::{
        blob_store::{BlobStore, RemoteUploadError},
        ingest_service::{IngestOptions, IngestService},
        staging_service::StagingService,
        validator::Validator,
    },
};
use async_trait::async_trait;
use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

/// In-process media host. Records what the pipeline hands it.
#[derive(Default)]
pub struct FakeBlobStore {
    failure: Option<RemoteUploadError>,
    /// Never answer uploads, like a host that accepted the connection and stalled.
    stall: bool,
    pub uploads: AtomicUsize,
    /// Whether the staged file existed on disk when `upload` ran.
    pub staged_present: AtomicBool,
    pub last_size: AtomicU64,
    pub destroyed: Mutex<Vec<String>>,
}

impl FakeBlobStore {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing(err: RemoteUploadError) -> Self {
        Self {
            failure: Some(err),
            ..Self::default()
        }
    }

    pub fn stalled() -> Self {
        Self {
            stall: true,
            ..Self::default()
        }
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn upload(
        &self,
        staged: &StagedFile,
        folder: &str,
        transformation: &Transformation,
    ) -> Result<RemoteAsset, RemoteUploadError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        self.staged_present
            .store(staged.path.is_file(), Ordering::SeqCst);
        self.last_size.store(staged.size_bytes, Ordering::SeqCst);

        if self.stall {
            std::future::pending::<()>().await;
        }

        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        // First upload is `x`, later ones are numbered so replacements differ.
        let name = if n == 0 { "x".to_string() } else { format!("x{n}") };
        Ok(RemoteAsset {
            url: format!("https://cdn/{name}.png"),
            public_id: format!("{folder}/{name}"),
            transformation: transformation.clone(),
        })
    }

    async fn destroy(&self, public_id: &str) -> Result<(), RemoteUploadError> {
        self.destroyed.lock().unwrap().push(public_id.to_string());
        Ok(())
    }
}

pub fn ingest_service(staging_dir: &Path, store: Arc<FakeBlobStore>) -> IngestService {
    IngestService::new(
        Validator::default(),
        StagingService::new(staging_dir),
        store,
        IngestOptions {
            field_name: "image".into(),
            folder: "pos-products".into(),
            transformation: Transformation::bounded(800),
        },
    )
}

pub const BOUNDARY: &str = "pos-media-test-boundary";

/// A file part for [`multipart_body`]: (field, filename, content type, bytes).
pub type FilePart<'a> = (&'a str, &'a str, &'a str, &'a [u8]);

/// Hand-built `multipart/form-data` body using [`BOUNDARY`].
pub fn multipart_body(fields: &[(&str, &str)], files: &[FilePart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (name, filename, content_type, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// Single-connection in-memory SQLite with the schema applied.
pub async fn memory_db() -> Arc<sqlx::SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    crate::db::apply_schema(&pool, crate::db::SCHEMA)
        .await
        .unwrap();
    Arc::new(pool)
}
