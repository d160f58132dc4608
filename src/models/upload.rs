//! Types that flow through the image-ingestion pipeline.

use serde::{Deserialize, Serialize};
use std::{fmt, io::ErrorKind, path::PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// One inbound file-carrying request, as seen by the pipeline.
///
/// `body` is the raw byte stream of the file part. The request owns it for
/// the duration of the pipeline; nothing here is ever persisted.
pub struct UploadRequest<S> {
    /// Correlates every log event emitted for this request.
    pub request_id: Uuid,

    /// Original filename as declared by the client.
    pub filename: String,

    /// Declared MIME type of the file part.
    pub content_type: String,

    /// Declared size in bytes (the request's `Content-Length`, if sent).
    pub declared_size: Option<u64>,

    /// Raw file bytes.
    pub body: S,
}

/// A file materialized in the staging directory.
///
/// Not `Clone`: `StagingService::release` consumes it, so a staged file can
/// be released at most once. A `StagedFile` dropped without being released
/// (request cancelled, client gone) removes its file on drop.
#[derive(Debug)]
pub struct StagedFile {
    /// Generated name, unique within the staging directory.
    pub filename: String,

    /// Absolute path of the staged file.
    pub path: PathBuf,

    /// Number of bytes written.
    pub size_bytes: u64,

    /// Hex MD5 of the staged bytes.
    pub checksum: String,

    /// Cleared once removal has been handed to `release`.
    armed: bool,
}

impl StagedFile {
    pub fn new(filename: String, path: PathBuf, size_bytes: u64, checksum: String) -> Self {
        Self {
            filename,
            path,
            size_bytes,
            checksum,
            armed: true,
        }
    }

    /// Take over removal of the file; `Drop` will no longer touch it.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed unreleased staged file {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                "could not remove unreleased staged file {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

/// Server-side processing the media host applies at upload time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    pub max_width: u32,
    pub max_height: u32,
}

impl Transformation {
    /// Bound both dimensions to `max`.
    pub fn bounded(max: u32) -> Self {
        Self {
            max_width: max,
            max_height: max,
        }
    }

    /// Render as the media host's transformation parameter.
    ///
    /// `c_limit` only ever shrinks, `q_auto` lets the host pick the quality.
    pub fn to_param(&self) -> String {
        format!(
            "c_limit,h_{},w_{}/q_auto",
            self.max_height, self.max_width
        )
    }
}

/// A file successfully persisted by the media host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    /// Secure retrieval URL.
    pub url: String,

    /// Host-assigned public identifier (includes the folder).
    pub public_id: String,

    /// Transformation requested at upload time.
    pub transformation: Transformation,
}

/// Pipeline states, used as the `state` field on every log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    NoFile,
    Validating,
    Staged,
    Uploading,
    Attached,
    Failed,
    Cleaned,
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestState::NoFile => "no_file",
            IngestState::Validating => "validating",
            IngestState::Staged => "staged",
            IngestState::Uploading => "uploading",
            IngestState::Attached => "attached",
            IngestState::Failed => "failed",
            IngestState::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}
