use crate::{
    models::blob::BlobLayout,
    services::{
        batch::WorkerSettings, ingress::ImageBounds, locations::LocationDirectory,
        media_api::MediaCategory, retry::RetryPolicy,
    },
};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "PHOTO_INGEST_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub key_root: String,
    pub public_base_url: String,
    pub media_api_base: String,
    pub media_category: MediaCategory,
    pub account_id: Option<String>,
    pub credentials_file: String,
    pub locations: LocationDirectory,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub upload_timeout: Duration,
    pub image_bounds: ImageBounds,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    pub max_receive_count: u32,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Photo ingestion pipeline for business listings")]
pub struct Args {
    /// Host to bind to (overrides PHOTO_INGEST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PHOTO_INGEST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where photo blobs are stored (overrides PHOTO_INGEST_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides PHOTO_INGEST_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket photos are stored in (overrides PHOTO_INGEST_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Base URL the media API fetches blobs from (overrides PHOTO_INGEST_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Media API account id (overrides PHOTO_INGEST_ACCOUNT_ID)
    #[arg(long)]
    pub account_id: Option<String>,

    /// Service-account key file (overrides PHOTO_INGEST_CREDENTIALS_FILE)
    #[arg(long)]
    pub credentials_file: Option<String>,

    /// `store=locationId` pair; repeatable, added on top of PHOTO_INGEST_LOCATIONS
    #[arg(long = "location")]
    pub locations: Vec<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::from_sources(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over the variables `lookup` returns over defaults.
    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let parsed = |name: &str, default: u64| parse_var(&var, name, default);

        let port = match args.port {
            Some(port) => port,
            None => parse_var(&var, "PORT", 3000u16)?,
        };
        let bucket = args
            .bucket
            .or_else(|| var("BUCKET"))
            .unwrap_or_else(|| "street-lawyer-services".into());
        let public_base_url = args
            .public_base_url
            .or_else(|| var("PUBLIC_BASE_URL"))
            .unwrap_or_else(|| format!("http://127.0.0.1:{}/blobs/{}", port, bucket));

        let mut locations = match var("LOCATIONS") {
            Some(raw) => LocationDirectory::parse(&raw)
                .map_err(|err| anyhow!(err))
                .context("parsing PHOTO_INGEST_LOCATIONS")?,
            None => LocationDirectory::default(),
        };
        for entry in &args.locations {
            locations
                .insert_entry(entry)
                .map_err(|err| anyhow!(err))
                .context("parsing --location")?;
        }

        let image_bounds = ImageBounds {
            min_bytes: parse_var(&var, "MIN_IMAGE_BYTES", ImageBounds::default().min_bytes)?,
            max_bytes: parse_var(&var, "MAX_IMAGE_BYTES", ImageBounds::default().max_bytes)?,
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.or_else(|| var("HOST")).unwrap_or_else(|| "0.0.0.0".into()),
            port,
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/photo_ingest.db".into()),
            bucket,
            key_root: var("KEY_ROOT").unwrap_or_else(|| "local-seo-photos".into()),
            public_base_url,
            media_api_base: var("MEDIA_API_BASE")
                .unwrap_or_else(|| "https://mybusiness.googleapis.com/v4".into()),
            media_category: parse_var(&var, "MEDIA_CATEGORY", MediaCategory::default())?,
            account_id: args.account_id.or_else(|| var("ACCOUNT_ID")),
            credentials_file: args
                .credentials_file
                .or_else(|| var("CREDENTIALS_FILE"))
                .unwrap_or_else(|| "sls_gbp_key.json".into()),
            locations,
            max_attempts: parse_var(&var, "MAX_ATTEMPTS", 3u32)?,
            retry_delay: Duration::from_millis(parsed("RETRY_DELAY_MS", 2000)?),
            upload_timeout: Duration::from_secs(parsed("UPLOAD_TIMEOUT_SECS", 30)?),
            image_bounds,
            batch_size: parse_var(&var, "BATCH_SIZE", 10usize)?,
            poll_interval: Duration::from_millis(parsed("POLL_INTERVAL_MS", 1000)?),
            visibility_timeout: Duration::from_secs(parsed("VISIBILITY_TIMEOUT_SECS", 60)?),
            max_receive_count: parse_var(&var, "MAX_RECEIVE_COUNT", 5u32)?,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn layout(&self) -> BlobLayout {
        BlobLayout::new(&self.bucket, &self.key_root, &self.public_base_url)
    }

    /// Policy for ingress writes.
    pub fn ingress_retry(&self) -> RetryPolicy {
        RetryPolicy::linear(self.max_attempts, self.retry_delay)
    }

    /// Policy for processing-side calls and credential acquisition.
    pub fn egress_retry(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, self.retry_delay)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            batch_size: self.batch_size,
            poll_interval: self.poll_interval,
        }
    }

    /// Largest JSON body `POST /photos` must accept: the base64 form of the
    /// biggest allowed image plus room for the other fields.
    pub fn max_request_bytes(&self) -> usize {
        self.image_bounds.max_bytes.div_ceil(3) * 4 + 64 * 1024
    }

    pub fn require_account_id(&self) -> Result<&str> {
        self.account_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("PHOTO_INGEST_ACCOUNT_ID (or --account-id) must be set"))
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, name, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(args: Args, vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_sources(args, |name| vars.get(name).cloned()).map(|(cfg, _)| cfg)
    }

    #[test]
    fn defaults_apply_without_any_input() {
        let cfg = from(Args::default(), &[]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.bucket, "street-lawyer-services");
        assert_eq!(cfg.key_root, "local-seo-photos");
        assert_eq!(
            cfg.public_base_url,
            "http://127.0.0.1:3000/blobs/street-lawyer-services"
        );
        assert_eq!(cfg.ingress_retry(), RetryPolicy::linear(3, Duration::from_secs(2)));
        assert_eq!(cfg.egress_retry(), RetryPolicy::exponential(3, Duration::from_secs(2)));
        assert_eq!(cfg.upload_timeout, Duration::from_secs(30));
        assert_eq!(cfg.image_bounds, ImageBounds::default());
        assert_eq!(cfg.media_category, MediaCategory::Product);
        assert!(cfg.require_account_id().is_err());
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            port: Some(8080),
            account_id: Some("1065".into()),
            locations: vec!["towson=999".into()],
            ..Args::default()
        };
        let cfg = from(
            args,
            &[
                ("PHOTO_INGEST_PORT", "9000"),
                ("PHOTO_INGEST_ACCOUNT_ID", "42"),
                ("PHOTO_INGEST_LOCATIONS", "dc=111,towson=222"),
                ("PHOTO_INGEST_RETRY_DELAY_MS", "10"),
            ],
        )
        .unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.require_account_id().unwrap(), "1065");
        assert_eq!(cfg.locations.resolve("dc"), Some("111"));
        assert_eq!(cfg.locations.resolve("towson"), Some("999"));
        assert_eq!(cfg.retry_delay, Duration::from_millis(10));
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = from(Args::default(), &[("PHOTO_INGEST_MAX_ATTEMPTS", "three")]).unwrap_err();
        assert!(err.to_string().contains("PHOTO_INGEST_MAX_ATTEMPTS"));

        let err = from(Args::default(), &[("PHOTO_INGEST_LOCATIONS", "dc")]).unwrap_err();
        assert!(err.to_string().contains("PHOTO_INGEST_LOCATIONS"));

        let err = from(Args::default(), &[("PHOTO_INGEST_MEDIA_CATEGORY", "selfie")]).unwrap_err();
        assert!(err.to_string().contains("PHOTO_INGEST_MEDIA_CATEGORY"));
    }

    #[test]
    fn media_category_is_configurable() {
        let cfg = from(Args::default(), &[("PHOTO_INGEST_MEDIA_CATEGORY", "exterior")]).unwrap();
        assert_eq!(cfg.media_category, MediaCategory::Exterior);
    }

    #[test]
    fn request_limit_covers_the_largest_encoded_image() {
        let cfg = from(Args::default(), &[]).unwrap();
        assert!(cfg.max_request_bytes() > 5 * 1024 * 1024 * 4 / 3);
    }
}
