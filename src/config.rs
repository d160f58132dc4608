use crate::services::blob_store::{BlobStoreConfig, DEFAULT_API_BASE};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub staging_dir: String,
    pub database_url: String,
    /// Folder on the media host that product images land in.
    pub upload_folder: String,
    /// Bounding box (pixels) the media host resizes images into.
    pub max_dimension: u32,
    /// Multipart field name that carries the image.
    pub file_field: String,
    pub blob: BlobStoreConfig,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Point-of-sale product image service")]
pub struct Args {
    /// Host to bind to (overrides POS_MEDIA_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides POS_MEDIA_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploads are staged (overrides POS_MEDIA_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Database URL (overrides POS_MEDIA_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Remote folder for product images (overrides POS_MEDIA_UPLOAD_FOLDER)
    #[arg(long)]
    pub upload_folder: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // A missing .env is fine; real deployments set the environment directly.
        dotenvy::dotenv().ok();

        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI arguments over values found through `lookup`.
    fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // --- Environment fallback ---
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{key} must be set"))
        };

        let env_port = parse_or(&lookup, "POS_MEDIA_PORT", 3000u16)?;
        let max_dimension = parse_or(&lookup, "POS_MEDIA_MAX_DIMENSION", 800u32)?;
        let timeout_secs = parse_or(&lookup, "POS_MEDIA_BLOB_TIMEOUT_SECS", 30u64)?;

        let blob = BlobStoreConfig {
            cloud_name: required("CLOUDINARY_CLOUD_NAME")?,
            api_key: required("CLOUDINARY_API_KEY")?,
            api_secret: required("CLOUDINARY_API_SECRET")?,
            api_base: env_or("CLOUDINARY_API_BASE", DEFAULT_API_BASE),
            timeout: Duration::from_secs(timeout_secs),
        };

        // --- Merge ---
        Ok(Self {
            host: args
                .host
                .unwrap_or_else(|| env_or("POS_MEDIA_HOST", "0.0.0.0")),
            port: args.port.unwrap_or(env_port),
            staging_dir: args
                .staging_dir
                .unwrap_or_else(|| env_or("POS_MEDIA_STAGING_DIR", "./data/uploads")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_or("POS_MEDIA_DATABASE_URL", "sqlite://./data/meta/pos_media.db")
            }),
            upload_folder: args
                .upload_folder
                .unwrap_or_else(|| env_or("POS_MEDIA_UPLOAD_FOLDER", "pos-products")),
            max_dimension,
            file_field: env_or("POS_MEDIA_FILE_FIELD", "image"),
            blob,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {key} value `{value}`")),
        None => Ok(default),
    }
}
