use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub blob_database_url: String,
    pub catalog_database_url: String,
    pub bucket: String,
    pub record_kind: String,
    pub public_base_url: String,
    pub default_uploader: String,
    pub backend_timeout: Duration,
    pub reconcile_attempts: u32,
    pub reconcile_delay: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Photo upload catalog")]
pub struct Args {
    /// Host to bind to (overrides PHOTO_CATALOG_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PHOTO_CATALOG_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blob payloads are stored (overrides PHOTO_CATALOG_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Blob descriptor database (overrides PHOTO_CATALOG_BLOB_DATABASE_URL)
    #[arg(long)]
    pub blob_database_url: Option<String>,

    /// Catalog database (overrides PHOTO_CATALOG_CATALOG_DATABASE_URL)
    #[arg(long)]
    pub catalog_database_url: Option<String>,

    /// Bucket uploads are stored in (overrides PHOTO_CATALOG_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Catalog record kind (overrides PHOTO_CATALOG_RECORD_KIND)
    #[arg(long)]
    pub record_kind: Option<String>,

    /// Prefix of resolved blob URLs (overrides PHOTO_CATALOG_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Uploader recorded when a request names none (overrides PHOTO_CATALOG_DEFAULT_UPLOADER)
    #[arg(long)]
    pub default_uploader: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |key| env::var(key))?;
        Ok((cfg, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let text = |key: &str, default: &str| -> Result<String> {
            match lookup(key) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {}", key)),
            }
        };
        let parsed = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Ok(value) => parse_value(key, &value),
                Err(env::VarError::NotPresent) => Ok(default),
                Err(err) => Err(err).with_context(|| format!("reading {}", key)),
            }
        };

        let env_port = match lookup("PHOTO_CATALOG_PORT") {
            Ok(value) => parse_value::<u16>("PHOTO_CATALOG_PORT", &value)?,
            Err(env::VarError::NotPresent) => 8080,
            Err(err) => return Err(err).context("reading PHOTO_CATALOG_PORT"),
        };

        let host = match args.host {
            Some(host) => host,
            None => text("PHOTO_CATALOG_HOST", "0.0.0.0")?,
        };
        let port = args.port.unwrap_or(env_port);

        let public_base_url = match args.public_base_url {
            Some(url) => url,
            None => text(
                "PHOTO_CATALOG_PUBLIC_BASE_URL",
                &default_public_base_url(&host, port),
            )?,
        };

        Ok(Self {
            storage_dir: match args.storage_dir {
                Some(dir) => dir,
                None => text("PHOTO_CATALOG_STORAGE_DIR", "./data/blobs")?,
            },
            blob_database_url: match args.blob_database_url {
                Some(url) => url,
                None => text(
                    "PHOTO_CATALOG_BLOB_DATABASE_URL",
                    "sqlite://./data/meta/blobs.db",
                )?,
            },
            catalog_database_url: match args.catalog_database_url {
                Some(url) => url,
                None => text(
                    "PHOTO_CATALOG_CATALOG_DATABASE_URL",
                    "sqlite://./data/catalog/catalog.db",
                )?,
            },
            bucket: match args.bucket {
                Some(bucket) => bucket,
                None => text("PHOTO_CATALOG_BUCKET", "image-storage")?,
            },
            record_kind: match args.record_kind {
                Some(kind) => kind,
                None => text("PHOTO_CATALOG_RECORD_KIND", "photos")?,
            },
            default_uploader: match args.default_uploader {
                Some(uploader) => uploader,
                None => text("PHOTO_CATALOG_DEFAULT_UPLOADER", "anonymous")?,
            },
            backend_timeout: Duration::from_secs(parsed("PHOTO_CATALOG_BACKEND_TIMEOUT_SECS", 5)?),
            reconcile_attempts: parsed("PHOTO_CATALOG_RECONCILE_ATTEMPTS", 3)?
                .try_into()
                .context("PHOTO_CATALOG_RECONCILE_ATTEMPTS out of range")?,
            reconcile_delay: Duration::from_millis(parsed(
                "PHOTO_CATALOG_RECONCILE_DELAY_MS",
                2000,
            )?),
            public_base_url,
            host,
            port,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("parsing {} value `{}`", key, value))
}

/// Wildcard bind addresses are not reachable from a browser, so resolved URLs
/// point at loopback instead.
fn default_public_base_url(host: &str, port: u16) -> String {
    let host = match host {
        "0.0.0.0" | "::" | "" => "127.0.0.1",
        other => other,
    };
    format!("http://{}:{}/blobs", host, port)
}
