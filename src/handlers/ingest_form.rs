//! `IngestedForm`: runs the ingestion pipeline as an axum extractor.
//!
//! Handlers that take an `IngestedForm` receive the text fields of a
//! multipart request plus, when an image was attached, the `RemoteAsset` it
//! was uploaded as. Any pipeline failure rejects the extractor, so the
//! handler never runs and the client gets the structured error instead.

use crate::{
    models::upload::{IngestState, RemoteAsset, UploadRequest},
    services::{ingest_service::IngestError, staging_service::StagingError},
    state::AppState,
};
use axum::{
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{HeaderMap, StatusCode, header},
};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug)]
pub struct IngestedForm {
    pub request_id: Uuid,
    /// Non-file form fields by name. A repeated name keeps the last value.
    pub fields: HashMap<String, String>,
    /// The uploaded image, if the request carried one.
    pub asset: Option<RemoteAsset>,
}

impl From<MultipartError> for StagingError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            StagingError::TooLarge
        } else {
            StagingError::Body(err.body_text())
        }
    }
}

impl FromRequest<AppState> for IngestedForm {
    type Rejection = IngestError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let ingest = &state.ingest;
        let request_id = request_id(req.headers());
        let declared_size = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if let Err(err) = ingest.check_declared_length(declared_size) {
            warn!(%request_id, state = %IngestState::Failed, ?declared_size, "request body over limit");
            return Err(err);
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|rejection| IngestError::MalformedUpload(rejection.body_text()))?;

        let limit = ingest.max_file_bytes();
        let mut fields = HashMap::new();
        let mut asset: Option<RemoteAsset> = None;

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(err) => {
                    discard(state, asset.take()).await;
                    return Err(multipart_failure(err, limit));
                }
            };
            let name = field.name().unwrap_or_default().to_string();

            if name != ingest.field_name() {
                match field.text().await {
                    Ok(value) => {
                        fields.insert(name, value);
                    }
                    Err(err) => {
                        discard(state, asset.take()).await;
                        return Err(multipart_failure(err, limit));
                    }
                }
                continue;
            }

            // An empty file input arrives as a part with no filename.
            let filename = field.file_name().unwrap_or_default().to_string();
            if filename.is_empty() {
                continue;
            }
            if asset.is_some() {
                discard(state, asset.take()).await;
                return Err(IngestError::MalformedUpload(format!(
                    "only one `{}` file may be attached",
                    ingest.field_name()
                )));
            }

            let upload = UploadRequest {
                request_id,
                filename,
                content_type: field.content_type().unwrap_or_default().to_string(),
                declared_size,
                body: field,
            };
            asset = Some(ingest.ingest(upload).await?);
        }

        if asset.is_none() {
            debug!(%request_id, state = %IngestState::NoFile, fields = fields.len(), "no file attached");
        }

        Ok(Self {
            request_id,
            fields,
            asset,
        })
    }
}

/// Use the caller's `x-request-id` when it is a UUID, otherwise mint one.
fn request_id(headers: &HeaderMap) -> Uuid {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .unwrap_or_else(Uuid::new_v4)
}

fn multipart_failure(err: MultipartError, limit: u64) -> IngestError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IngestError::PayloadTooLarge { limit }
    } else {
        IngestError::MalformedUpload(err.body_text())
    }
}

/// Best-effort removal of an asset the request will not use after all.
pub async fn discard(state: &AppState, asset: Option<RemoteAsset>) {
    let Some(asset) = asset else {
        return;
    };
    if let Err(err) = state.ingest.blob_store().destroy(&asset.public_id).await {
        warn!(public_id = %asset.public_id, error = %err, "failed to remove unused remote asset");
    }
}
