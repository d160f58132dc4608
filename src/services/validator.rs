//! src/services/validator.rs
//!
//! Upload validation gate.
//!
//! Pure predicates over file metadata. Nothing here touches the disk or the
//! network, so the gate can run before any byte of the upload is staged.

use std::path::Path;
use thiserror::Error;

/// Largest accepted image, in bytes (5 MiB).
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

const ALLOWED_EXTENSIONS: [&str; 5] = ["jpeg", "jpg", "png", "gif", "webp"];
const ALLOWED_CONTENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Only image files are allowed ({allowed}); got extension `{extension}`")]
    InvalidExtension { extension: String, allowed: String },
    #[error("Only image files are allowed ({allowed}); got content type `{content_type}`")]
    InvalidContentType {
        content_type: String,
        allowed: String,
    },
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },
}

/// Accepted extensions, content types and size cap.
///
/// Built once at startup and shared read-only by every request.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub extensions: Vec<String>,
    pub content_types: Vec<String>,
    pub max_file_bytes: u64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            extensions: ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            content_types: ALLOWED_CONTENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_bytes: MAX_FILE_BYTES,
        }
    }
}

impl ValidationPolicy {
    fn allowed_list(&self) -> String {
        self.extensions.join(", ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: ValidationPolicy,
}

impl Validator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Check the declared filename and content type against the policy.
    ///
    /// Both the extension and the content type must be accepted. Returns the
    /// lower-cased extension, which the staging store reuses for the staged
    /// filename.
    pub fn validate(&self, filename: &str, content_type: &str) -> Result<String, ValidationError> {
        let extension = extension_of(filename);
        if !self.policy.extensions.iter().any(|e| *e == extension) {
            return Err(ValidationError::InvalidExtension {
                extension,
                allowed: self.policy.allowed_list(),
            });
        }

        let normalized = normalize_content_type(content_type);
        if !self.policy.content_types.iter().any(|ct| *ct == normalized) {
            return Err(ValidationError::InvalidContentType {
                content_type: content_type.to_string(),
                allowed: self.policy.allowed_list(),
            });
        }

        Ok(extension)
    }

    /// Enforce the hard size cap.
    pub fn check_size(&self, size: u64) -> Result<(), ValidationError> {
        if size > self.policy.max_file_bytes {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.policy.max_file_bytes,
            });
        }
        Ok(())
    }
}

/// Lower-cased extension of the final path component, or empty.
fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Strip MIME parameters (`image/png; charset=binary` -> `image/png`).
fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}
