//! src/services/ingest_service.rs
//!
//! IngestService: the two-phase upload pipeline:
//!
//! ```text
//! NoFile ─────────────────────────────────────────────► (pass through)
//! Validating ──reject──► Failed
//!     │
//!     ▼
//! Staged ──► Uploading ──► Attached | Failed ──► Cleaned
//! ```
//!
//! A staged file is released exactly once, after the remote outcome is known.
//! Every event carries the request id (span) and the pipeline state.

use crate::{
    models::upload::{IngestState, RemoteAsset, Transformation, UploadRequest},
    services::{
        blob_store::{BlobStore, RemoteUploadError},
        staging_service::{StagingError, StagingService},
        validator::{ValidationError, Validator},
    },
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Room left in a request body for form fields and multipart framing.
pub const FORM_OVERHEAD_BYTES: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(ValidationError),
    #[error("file exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },
    #[error("malformed upload: {0}")]
    MalformedUpload(String),
    #[error("staging failed: {0}")]
    Staging(StagingError),
    #[error(transparent)]
    RemoteUpload(#[from] RemoteUploadError),
}

impl From<ValidationError> for IngestError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileTooLarge { max, .. } => IngestError::PayloadTooLarge { limit: max },
            other => IngestError::Validation(other),
        }
    }
}

/// Where and how accepted images are sent.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Multipart field carrying the image.
    pub field_name: String,
    /// Destination folder on the media host.
    pub folder: String,
    pub transformation: Transformation,
}

pub struct IngestService {
    validator: Validator,
    staging: StagingService,
    blob_store: Arc<dyn BlobStore>,
    options: IngestOptions,
}

impl IngestService {
    pub fn new(
        validator: Validator,
        staging: StagingService,
        blob_store: Arc<dyn BlobStore>,
        options: IngestOptions,
    ) -> Self {
        Self {
            validator,
            staging,
            blob_store,
            options,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.options.field_name
    }

    pub fn staging(&self) -> &StagingService {
        &self.staging
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blob_store
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.validator.policy().max_file_bytes
    }

    /// Largest request body worth reading: one file plus the form allowance.
    pub fn max_request_bytes(&self) -> u64 {
        self.max_file_bytes() + FORM_OVERHEAD_BYTES
    }

    /// Size gate on the declared request length, applied before any content
    /// type check or disk write.
    pub fn check_declared_length(&self, declared: Option<u64>) -> Result<(), IngestError> {
        match declared {
            Some(len) => self
                .validator
                .check_size(len.saturating_sub(FORM_OVERHEAD_BYTES))
                .map_err(IngestError::from),
            None => Ok(()),
        }
    }

    /// Run one file through validate → stage → upload → release.
    pub async fn ingest<S, E>(&self, upload: UploadRequest<S>) -> Result<RemoteAsset, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<StagingError> + Send,
    {
        let span = info_span!("ingest", request_id = %upload.request_id);
        self.run(upload).instrument(span).await
    }

    async fn run<S, E>(&self, upload: UploadRequest<S>) -> Result<RemoteAsset, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<StagingError> + Send,
    {
        let UploadRequest {
            filename,
            content_type,
            declared_size,
            body,
            ..
        } = upload;

        if let Err(err) = self.check_declared_length(declared_size) {
            warn!(state = %IngestState::Failed, declared_size = ?declared_size, "upload rejected at size gate");
            return Err(err);
        }

        debug!(state = %IngestState::Validating, %filename, %content_type, "validating upload");
        let extension = match self.validator.validate(&filename, &content_type) {
            Ok(extension) => extension,
            Err(err) => {
                if self.may_exceed_cap(declared_size) && self.oversized(body).await {
                    warn!(state = %IngestState::Failed, error = %err, "oversized upload rejected");
                    return Err(IngestError::PayloadTooLarge {
                        limit: self.max_file_bytes(),
                    });
                }
                warn!(state = %IngestState::Failed, error = %err, "upload rejected");
                return Err(err.into());
            }
        };

        let staged = match self
            .staging
            .stage(body, &extension, self.max_file_bytes())
            .await
        {
            Ok(staged) => staged,
            Err(err) => {
                warn!(state = %IngestState::Failed, error = %err, "staging failed");
                return Err(self.staging_failure(err));
            }
        };
        info!(
            state = %IngestState::Staged,
            staged = %staged.filename,
            size_bytes = staged.size_bytes,
            checksum = %staged.checksum,
            "upload staged"
        );

        debug!(state = %IngestState::Uploading, folder = %self.options.folder, "sending to media host");
        let outcome = self
            .blob_store
            .upload(&staged, &self.options.folder, &self.options.transformation)
            .await;
        match &outcome {
            Ok(asset) => info!(
                state = %IngestState::Attached,
                public_id = %asset.public_id,
                url = %asset.url,
                "upload attached"
            ),
            Err(err) => error!(
                state = %IngestState::Failed,
                status = ?err.status,
                error = %err.message,
                "remote upload failed"
            ),
        }

        match self.staging.release(staged).await {
            Ok(()) => debug!(state = %IngestState::Cleaned, "staged file released"),
            Err(warning) => warn!(
                state = %IngestState::Cleaned,
                path = %warning.path.display(),
                error = %warning.source,
                "staged file left behind"
            ),
        }

        outcome.map_err(IngestError::from)
    }

    /// Whether a request of `declared` bytes could carry a file over the cap.
    fn may_exceed_cap(&self, declared: Option<u64>) -> bool {
        declared.is_none_or(|len| len > self.max_file_bytes())
    }

    /// Count a rejected body without storing it, stopping once it passes the
    /// cap. The size cap takes precedence over the type policy.
    async fn oversized<S, E>(&self, body: S) -> bool
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<StagingError> + Send,
    {
        let limit = self.max_file_bytes();
        let mut seen: u64 = 0;
        pin_mut!(body);
        while let Some(chunk) = body.next().await {
            match chunk.map_err(Into::<StagingError>::into) {
                Ok(chunk) => {
                    seen += chunk.len() as u64;
                    if seen > limit {
                        return true;
                    }
                }
                Err(StagingError::TooLarge) => return true,
                Err(_) => return false,
            }
        }
        false
    }

    fn staging_failure(&self, err: StagingError) -> IngestError {
        match err {
            StagingError::TooLarge => IngestError::PayloadTooLarge {
                limit: self.max_file_bytes(),
            },
            StagingError::Body(message) => IngestError::MalformedUpload(message),
            other => IngestError::Staging(other),
        }
    }
}
