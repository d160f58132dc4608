//! src/services/blob_store.rs
//!
//! Remote media host adapter.
//!
//! `BlobStore` is the seam the ingestion pipeline talks to; `CloudinaryClient`
//! is the production implementation. The upload is the only network call in
//! the pipeline and is attempted exactly once.

use crate::models::upload::{RemoteAsset, StagedFile, Transformation};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    Client, Response,
    multipart::{Form, Part},
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.cloudinary.com/v1_1";

/// The media host refused the request or could not be reached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("remote upload failed ({}): {message}", status_label(.status))]
pub struct RemoteUploadError {
    /// HTTP status reported by the host; `None` for transport failures.
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteUploadError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for RemoteUploadError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a staged file into `folder`, asking the host to apply `transformation`.
    async fn upload(
        &self,
        staged: &StagedFile,
        folder: &str,
        transformation: &Transformation,
    ) -> Result<RemoteAsset, RemoteUploadError>;

    /// Delete a previously uploaded asset.
    async fn destroy(&self, public_id: &str) -> Result<(), RemoteUploadError>;
}

/// Credentials and endpoint for the media host. Built once, never mutated.
#[derive(Clone)]
pub struct BlobStoreConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for BlobStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStoreConfig")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
    public_id: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Signed-upload client for Cloudinary's image API.
pub struct CloudinaryClient {
    config: BlobStoreConfig,
    client: Client,
}

impl CloudinaryClient {
    pub fn new(config: BlobStoreConfig) -> Result<Self, RemoteUploadError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/{}/image/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name,
            action
        )
    }

    /// Sign `params` (name, value) as the host expects: sorted by name,
    /// joined as `k=v&k=v`, secret appended, SHA-256 hex.
    fn sign(&self, params: &[(&str, &str)]) -> String {
        sign_params(params, &self.config.api_secret)
    }

    async fn error_from(response: Response) -> RemoteUploadError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        RemoteUploadError::new(Some(status), message)
    }
}

#[async_trait]
impl BlobStore for CloudinaryClient {
    async fn upload(
        &self,
        staged: &StagedFile,
        folder: &str,
        transformation: &Transformation,
    ) -> Result<RemoteAsset, RemoteUploadError> {
        let timestamp = Utc::now().timestamp().to_string();
        let transformation_param = transformation.to_param();
        let signature = self.sign(&[
            ("folder", folder),
            ("timestamp", timestamp.as_str()),
            ("transformation", transformation_param.as_str()),
        ]);

        let file = File::open(&staged.path)
            .await
            .map_err(|e| RemoteUploadError::new(None, format!("cannot read staged file: {e}")))?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, staged.size_bytes).file_name(staged.filename.clone());

        let form = Form::new()
            .part("file", part)
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp)
            .text("folder", folder.to_string())
            .text("transformation", transformation_param)
            .text("signature_algorithm", "sha256")
            .text("signature", signature);

        debug!(folder, size_bytes = staged.size_bytes, "posting upload to media host");
        let response = self
            .client
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let uploaded: UploadResponse = response.json().await?;
        Ok(RemoteAsset {
            url: uploaded.secure_url,
            public_id: uploaded.public_id,
            transformation: transformation.clone(),
        })
    }

    async fn destroy(&self, public_id: &str) -> Result<(), RemoteUploadError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", public_id), ("timestamp", timestamp.as_str())]);

        let form = Form::new()
            .text("public_id", public_id.to_string())
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature_algorithm", "sha256")
            .text("signature", signature);

        let response = self
            .client
            .post(self.endpoint("destroy"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        // "not found" means it is already gone.
        let outcome: DestroyResponse = response.json().await?;
        match outcome.result.as_str() {
            "ok" | "not found" => Ok(()),
            other => Err(RemoteUploadError::new(None, format!("destroy returned `{other}`"))),
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "no response".into(),
    }
}

fn sign_params(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Multipart, Path},
        http::StatusCode,
        response::IntoResponse,
        routing::post,
    };
    use serde_json::json;
    use std::{collections::HashMap, io::Write};
    use tokio::net::TcpListener;

    /// Stand-in for the media host. Cloud name `denied` answers 401.
    async fn fake_upload(Path(cloud): Path<String>, mut multipart: Multipart) -> impl IntoResponse {
        let mut fields = HashMap::new();
        let mut file_len = 0;
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                file_len = field.bytes().await.unwrap().len();
            } else {
                fields.insert(name, field.text().await.unwrap());
            }
        }

        if cloud == "denied" {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"message": "Invalid api_key"}})),
            );
        }

        let expected = sign_params(
            &[
                ("folder", fields["folder"].as_str()),
                ("timestamp", fields["timestamp"].as_str()),
                ("transformation", fields["transformation"].as_str()),
            ],
            "shh",
        );
        if fields["signature"] != expected || fields["signature_algorithm"] != "sha256" {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"message": "Invalid Signature"}})),
            );
        }

        (
            StatusCode::OK,
            Json(json!({
                "secure_url": format!("https://cdn/{}/x.png", fields["folder"]),
                "public_id": format!("{}/x", fields["folder"]),
                "bytes": file_len,
                "transformation": fields["transformation"],
            })),
        )
    }

    async fn fake_destroy(mut multipart: Multipart) -> impl IntoResponse {
        let mut public_id = String::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            if field.name() == Some("public_id") {
                public_id = field.text().await.unwrap();
            }
        }
        let result = if public_id.ends_with("/gone") { "not found" } else { "ok" };
        Json(json!({ "result": result }))
    }

    async fn spawn_host() -> String {
        let app = Router::new()
            .route("/{cloud}/image/upload", post(fake_upload))
            .route("/{cloud}/image/destroy", post(fake_destroy));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(api_base: String, cloud_name: &str) -> CloudinaryClient {
        CloudinaryClient::new(BlobStoreConfig {
            cloud_name: cloud_name.into(),
            api_key: "key".into(),
            api_secret: "shh".into(),
            api_base,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn staged_png(dir: &tempfile::TempDir) -> StagedFile {
        let path = dir.path().join("1-2.png");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"\x89PNG fake").unwrap();
        StagedFile::new("1-2.png".into(), path, 9, String::new())
    }

    #[test]
    fn signature_sorts_params_and_appends_secret() {
        let sig = sign_params(&[("timestamp", "1700000000"), ("folder", "pos-products")], "secret");

        let mut hasher = Sha256::new();
        hasher.update(b"folder=pos-products&timestamp=1700000000secret");
        assert_eq!(sig, hex::encode(hasher.finalize()));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let config = BlobStoreConfig {
            cloud_name: "demo".into(),
            api_key: "key".into(),
            api_secret: "top-secret".into(),
            api_base: DEFAULT_API_BASE.into(),
            timeout: Duration::from_secs(30),
        };
        assert!(!format!("{config:?}").contains("top-secret"));
    }

    #[tokio::test]
    async fn upload_returns_url_and_public_id() {
        let base = spawn_host().await;
        let dir = tempfile::tempdir().unwrap();
        let staged = staged_png(&dir);

        let asset = client(base, "demo")
            .upload(&staged, "pos-products", &Transformation::bounded(800))
            .await
            .unwrap();

        assert_eq!(asset.url, "https://cdn/pos-products/x.png");
        assert_eq!(asset.public_id, "pos-products/x");
        assert_eq!(asset.transformation, Transformation::bounded(800));
    }

    #[tokio::test]
    async fn upload_surfaces_remote_status_and_message() {
        let base = spawn_host().await;
        let dir = tempfile::tempdir().unwrap();
        let staged = staged_png(&dir);

        let err = client(base, "denied")
            .upload(&staged, "pos-products", &Transformation::bounded(800))
            .await
            .unwrap_err();

        assert_eq!(err.status, Some(401));
        assert_eq!(err.message, "Invalid api_key");
    }

    #[tokio::test]
    async fn upload_to_unreachable_host_has_no_status() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let staged = staged_png(&dir);
        let err = client(format!("http://{addr}"), "demo")
            .upload(&staged, "pos-products", &Transformation::bounded(800))
            .await
            .unwrap_err();
        assert_eq!(err.status, None);
    }

    #[tokio::test]
    async fn destroy_treats_not_found_as_done() {
        let base = spawn_host().await;
        let c = client(base, "demo");
        c.destroy("pos-products/x").await.unwrap();
        c.destroy("pos-products/gone").await.unwrap();
    }
}
