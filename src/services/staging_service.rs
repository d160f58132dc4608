//! src/services/staging_service.rs
//!
//! StagingService: transient local storage for uploaded files. A request's
//! file lives here only between validation and the end of the remote upload;
//! the orchestrator releases it whatever the remote outcome.

use crate::models::upload::StagedFile;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use rand::Rng;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};

const MAX_NAME_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("upload exceeds the size limit")]
    TooLarge,
    #[error("upload body could not be read: {0}")]
    Body(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A staged file could not be removed. Logged, never returned to clients.
#[derive(Debug, Error)]
#[error("could not remove staged file {path:?}: {source}")]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub source: io::Error,
}

pub type StagingResult<T> = Result<T, StagingError>;

#[derive(Clone, Debug)]
pub struct StagingService {
    /// Directory holding in-flight uploads.
    base_path: PathBuf,
}

impl StagingService {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Stream an upload into a freshly named file in the staging directory.
    ///
    /// - Creates the staging directory on first use.
    /// - Aborts with `TooLarge` as soon as more than `limit` bytes arrive.
    /// - Computes size and MD5 while streaming, then fsyncs.
    ///
    /// The `StagedFile` exists from the moment the file is created, so an
    /// error or a dropped future removes the partial file.
    pub async fn stage<S, E>(
        &self,
        stream: S,
        extension: &str,
        limit: u64,
    ) -> StagingResult<StagedFile>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<StagingError>,
    {
        fs::create_dir_all(&self.base_path).await?;
        let (filename, path, mut file) = self.create_unique(extension).await?;
        let mut staged = StagedFile::new(filename, path, 0, String::new());

        let (size_bytes, checksum) = write_stream(&mut file, stream, limit).await?;
        staged.size_bytes = size_bytes;
        staged.checksum = checksum;
        Ok(staged)
    }

    /// Delete a staged file. A file that is already gone counts as released.
    pub async fn release(&self, mut staged: StagedFile) -> Result<(), CleanupWarning> {
        staged.disarm();
        match fs::remove_file(&staged.path).await {
            Ok(()) => {
                debug!("removed staged file {}", staged.path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("staged file {} already missing", staged.path.display());
                Ok(())
            }
            Err(source) => Err(CleanupWarning {
                path: staged.path.clone(),
                source,
            }),
        }
    }

    /// Remove files left behind by a previous run (crash, killed process).
    ///
    /// Only names this service generates are touched. Returns how many files
    /// were removed. A missing directory is not an error.
    pub async fn sweep(&self) -> io::Result<usize> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file()
                || !entry.file_name().to_str().is_some_and(is_staged_name)
            {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(
                    "failed to sweep staged file {}: {}",
                    entry.path().display(),
                    err
                ),
            }
        }
        Ok(removed)
    }

    /// Open a new file under a generated name, retrying on the rare collision.
    async fn create_unique(&self, extension: &str) -> io::Result<(String, PathBuf, File)> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let filename = generate_name(extension);
            let path = self.base_path.join(&filename);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((filename, path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!("staging name {} taken, retrying", filename);
                }
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            ErrorKind::AlreadyExists,
            "could not allocate a unique staging filename",
        ))
    }
}

/// Copy `stream` into `file`, returning the byte count and hex MD5.
async fn write_stream<S, E>(file: &mut File, stream: S, limit: u64) -> StagingResult<(u64, String)>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<StagingError>,
{
    let mut size_bytes: u64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk_res) = stream.next().await {
        let chunk = chunk_res.map_err(Into::<StagingError>::into)?;
        size_bytes += chunk.len() as u64;
        if size_bytes > limit {
            return Err(StagingError::TooLarge);
        }
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok((size_bytes, format!("{:x}", digest.compute())))
}

/// `{unix-nanos}-{random}.{ext}`; the extension is dropped unless alphanumeric.
fn generate_name(extension: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let suffix: u32 = rand::rng().random_range(0..1_000_000_000);

    if !extension.is_empty() && extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        format!("{nanos}-{suffix}.{extension}")
    } else {
        format!("{nanos}-{suffix}")
    }
}

/// Whether `name` has the shape `generate_name` produces.
fn is_staged_name(name: &str) -> bool {
    let (stem, extension) = match name.split_once('.') {
        Some((stem, extension)) => (stem, Some(extension)),
        None => (name, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let stem_ok = stem
        .split_once('-')
        .is_some_and(|(nanos, suffix)| digits(nanos) && digits(suffix));
    let extension_ok = extension
        .is_none_or(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()));
    stem_ok && extension_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn chunks(parts: &[&str]) -> impl Stream<Item = io::Result<Bytes>> + use<> {
        let items: Vec<io::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        stream::iter(items)
    }

    fn entries(path: &Path) -> usize {
        std::fs::read_dir(path).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn stage_writes_bytes_and_checksum() {
        let dir = tempdir().unwrap();
        let staging = StagingService::new(dir.path());

        let staged = staging
            .stage(chunks(&["hello ", "world"]), "png", 1024)
            .await
            .unwrap();

        assert_eq!(staged.size_bytes, 11);
        assert_eq!(staged.checksum, format!("{:x}", md5::compute(b"hello world")));
        assert!(staged.filename.ends_with(".png"));
        assert_eq!(staged.path, dir.path().join(&staged.filename));
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn stage_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("nested").join("uploads");
        let staging = StagingService::new(&base);

        let staged = staging.stage(chunks(&["x"]), "gif", 16).await.unwrap();
        assert!(base.is_dir());
        assert!(staged.path.starts_with(&base));
    }

    #[tokio::test]
    async fn concurrent_stages_get_distinct_names() {
        let dir = tempdir().unwrap();
        let staging = StagingService::new(dir.path().join("uploads"));

        let staged = futures::future::join_all(
            (0..16).map(|_| staging.stage(chunks(&["data"]), "jpg", 16)),
        )
        .await;

        let staged: Vec<StagedFile> = staged.into_iter().map(|s| s.unwrap()).collect();
        let names: HashSet<&str> = staged.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names.len(), 16);
        assert_eq!(entries(&dir.path().join("uploads")), 16);
    }

    #[tokio::test]
    async fn oversized_stream_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let staging = StagingService::new(dir.path());

        let err = staging
            .stage(chunks(&["hel", "lo"]), "png", 4)
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::TooLarge));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn body_error_removes_partial_file() {
        let dir = tempdir().unwrap();
        let staging = StagingService::new(dir.path());
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::other("connection reset")),
        ]);

        let err = staging.stage(body, "png", 1024).await.unwrap_err();
        assert!(matches!(err, StagingError::Io(_)));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let dir = tempdir().unwrap();
        let staging = StagingService::new(dir.path());

        let staged = staging.stage(chunks(&["abc"]), "webp", 16).await.unwrap();
        let again = StagedFile::new(
            staged.filename.clone(),
            staged.path.clone(),
            staged.size_bytes,
            staged.checksum.clone(),
        );

        staging.release(staged).await.unwrap();
        assert_eq!(entries(dir.path()), 0);
        assert!(staging.release(again).await.is_ok());
    }

    #[tokio::test]
    async fn release_reports_undeletable_path_as_warning() {
        let dir = tempdir().unwrap();
        let staging = StagingService::new(dir.path());
        // A directory cannot be removed with remove_file.
        let sub = dir.path().join("not-a-file");
        std::fs::create_dir(&sub).unwrap();

        let warning = staging
            .release(StagedFile::new("not-a-file".into(), sub.clone(), 0, String::new()))
            .await
            .unwrap_err();
        assert_eq!(warning.path, sub);
    }

    #[tokio::test]
    async fn sweep_removes_leftovers() {
        let dir = tempdir().unwrap();
        let staging = StagingService::new(dir.path());
        // Leftovers from a run that died mid-request.
        std::fs::write(dir.path().join(generate_name("png")), b"a").unwrap();
        std::fs::write(dir.path().join(generate_name("gif")), b"b").unwrap();

        assert_eq!(staging.sweep().await.unwrap(), 2);
        assert_eq!(entries(dir.path()), 0);

        std::fs::write(dir.path().join(".readyz-probe"), b"readyz").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();
        assert_eq!(staging.sweep().await.unwrap(), 0);
        assert_eq!(entries(dir.path()), 2);

        let missing = StagingService::new(dir.path().join("absent"));
        assert_eq!(missing.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_stage_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let staging = StagingService::new(dir.path());
        // One chunk arrives, then the client stalls forever.
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"abc"))])
            .chain(stream::pending());

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            staging.stage(body, "png", 1024),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(entries(dir.path()), 0);
    }

    #[test]
    fn staged_names_are_recognised() {
        assert!(is_staged_name(&generate_name("png")));
        assert!(is_staged_name(&generate_name("")));
        assert!(!is_staged_name(".readyz-0b5c"));
        assert!(!is_staged_name("notes.txt"));
        assert!(!is_staged_name("12-ab.png"));
    }

    #[test]
    fn generated_names_drop_suspicious_extensions() {
        assert!(generate_name("png").ends_with(".png"));
        assert!(!generate_name("../x").contains('/'));
        assert!(!generate_name("").contains('.'));
    }
}
