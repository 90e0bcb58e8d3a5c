//! src/services/blob_store.rs
//!
//! Blob store gateway. `BlobStore` is the seam the upload coordinator and the
//! HTTP layer talk to; `DiskBlobStore` is the bundled backend, keeping payloads
//! on local disk sharded beneath `base_path/{bucket}/{shard}/{shard}/{name}`
//! and object descriptors in SQLite.

use crate::{
    errors::FailureClass,
    models::{bucket::Bucket, object::StoredObject},
    services::Probe,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream::BoxStream};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

/// A stream of payload chunks flowing into or out of the store.
pub type BlobBody<'a> = BoxStream<'a, io::Result<Bytes>>;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object name `{name}` invalid: {reason}")]
    InvalidObjectName { name: String, reason: &'static str },
    #[error("object `{name}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, name: String },
    #[error("write rejected by storage: {0}")]
    Rejected(#[source] io::Error),
    #[error("upload body interrupted: {0}")]
    BodyInterrupted(#[source] io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BlobStoreError {
    pub fn class(&self) -> FailureClass {
        match self {
            BlobStoreError::BucketNotFound(_) | BlobStoreError::ObjectNotFound { .. } => {
                FailureClass::NotFound
            }
            BlobStoreError::InvalidBucketName { .. }
            | BlobStoreError::InvalidObjectName { .. }
            | BlobStoreError::Rejected(_) => FailureClass::WriteRejected,
            BlobStoreError::BodyInterrupted(_) => FailureClass::InvalidRequest,
            BlobStoreError::Sqlx(err) => classify_sqlx(err),
            BlobStoreError::Io(_) => FailureClass::BackendUnavailable,
        }
    }
}

pub type BlobResult<T> = Result<T, BlobStoreError>;

/// Operations the catalog needs from an object store.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Create `bucket` if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> BlobResult<Bucket>;

    /// Every object name currently stored in `bucket`, in backend order.
    async fn list_names(&self, bucket: &str) -> BlobResult<Vec<String>>;

    /// Write `body` as object `name`, replacing any existing object silently.
    async fn put(
        &self,
        bucket: &str,
        name: &str,
        content_type: Option<&str>,
        body: BlobBody<'_>,
    ) -> BlobResult<StoredObject>;

    /// A URL the object can be fetched from. Does not check that it exists.
    fn resolve(&self, bucket: &str, name: &str) -> String;

    /// Descriptor plus payload stream for an existing object.
    async fn fetch(&self, bucket: &str, name: &str)
    -> BlobResult<(StoredObject, BlobBody<'static>)>;

    async fn health_check(&self) -> Vec<Probe>;
}

/// Payloads on local disk, descriptors in SQLite.
#[derive(Clone)]
pub struct DiskBlobStore {
    /// Shared SQLite connection pool used for descriptor rows.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Prefix of the URLs handed out by `resolve`.
    pub public_base_url: String,
}

/// Per-component limit of common filesystems (ext4, xfs, apfs, ntfs).
const MAX_OBJECT_NAME_LEN: usize = 255;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

impl DiskBlobStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Object names are flat keys: one path segment, no traversal, no
    /// control bytes.
    fn ensure_name_safe(&self, name: &str) -> BlobResult<()> {
        let reject = |reason| {
            Err(BlobStoreError::InvalidObjectName {
                name: name.to_string(),
                reason,
            })
        };
        if name.is_empty() {
            return reject("must not be empty");
        }
        if name.len() > MAX_OBJECT_NAME_LEN {
            return reject("must be at most 255 bytes");
        }
        if name == "." || name == ".." {
            return reject("must not be `.` or `..`");
        }
        if name.contains('/') || name.contains('\\') {
            return reject("must not contain path separators");
        }
        if name.bytes().any(|b| b.is_ascii_control()) {
            return reject("must not contain control characters");
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3-63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> BlobResult<()> {
        let invalid = |reason: &str| {
            Err(BlobStoreError::InvalidBucketName {
                name: name.to_string(),
                reason: reason.into(),
            })
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return invalid("must be between 3 and 63 characters");
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return invalid("must start and end with a lowercase letter or digit");
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return invalid("cannot contain consecutive dots or dot-hyphen combinations");
        }
        if is_ipv4_like(name) {
            return invalid("must not be formatted like an IP address");
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from MD5(bucket/name), keeping the number
    /// of files per directory small.
    fn object_shards(bucket_name: &str, name: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, name));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, name: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, name);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> BlobResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => BlobStoreError::BucketNotFound(bucket.to_string()),
                other => BlobStoreError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &Bucket, name: &str) -> BlobResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket_id, name, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE name = ? AND bucket_id = ?",
        )
        .bind(name)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => BlobStoreError::ObjectNotFound {
                bucket: bucket.name.clone(),
                name: name.to_string(),
            },
            other => BlobStoreError::Sqlx(other),
        })
    }

    /// Stream `body` into a temp file next to the final location, returning
    /// its size and hex MD5. The temp file is removed on any error.
    async fn write_temp(&self, tmp_path: &Path, mut body: BlobBody<'_>) -> BlobResult<(i64, String)> {
        let mut file = File::create(tmp_path).await.map_err(write_error)?;
        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();

        let written = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(BlobStoreError::BodyInterrupted)?;
                size_bytes += chunk.len() as i64;
                digest.consume(&chunk);
                file.write_all(&chunk).await.map_err(write_error)?;
            }
            file.flush().await.map_err(write_error)?;
            file.sync_all().await.map_err(write_error)?;
            Ok::<(), BlobStoreError>(())
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(tmp_path).await;
            return Err(err);
        }
        Ok((size_bytes, format!("{:x}", digest.compute())))
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> BlobResult<Bucket> {
        match self.fetch_bucket(bucket).await {
            Ok(existing) => return Ok(existing),
            Err(BlobStoreError::BucketNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        fs::create_dir_all(self.bucket_root(bucket)).await?;

        let created = Bucket {
            id: Uuid::new_v4(),
            name: bucket.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT OR IGNORE INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(created.id)
            .bind(&created.name)
            .bind(created.created_at)
            .execute(&*self.db)
            .await?;
        info!(bucket, "bucket ready");

        // Another process may have won the insert; read back whichever row stuck.
        self.fetch_bucket(bucket).await
    }

    async fn list_names(&self, bucket: &str) -> BlobResult<Vec<String>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM objects WHERE bucket_id = ? ORDER BY name ASC",
        )
        .bind(bucket_rec.id)
        .fetch_all(&*self.db)
        .await?;
        debug!(bucket, count = names.len(), "listed objects");
        Ok(names)
    }

    /// Stream-upload an object to disk and upsert its descriptor.
    ///
    /// Bytes go to a temp file first, are fsynced, then renamed over the final
    /// path so readers never see a half-written payload.
    async fn put(
        &self,
        bucket: &str,
        name: &str,
        content_type: Option<&str>,
        body: BlobBody<'_>,
    ) -> BlobResult<StoredObject> {
        self.ensure_name_safe(name)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, name);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobStoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await.map_err(write_error)?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let (size_bytes, etag) = self.write_temp(&tmp_path, body).await?;

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(write_error(err));
            }
        }

        let content_type = content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        let stored = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (
                id, bucket_id, name, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, name) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket_id, name, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(name)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        debug!(bucket, name, size_bytes, etag = %stored.etag, "stored object");
        Ok(stored)
    }

    fn resolve(&self, bucket: &str, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_base_url.trim_end_matches('/'),
            urlencoding::encode(bucket),
            urlencoding::encode(name)
        )
    }

    /// Names that could never have been stored read as ObjectNotFound, as does
    /// a descriptor whose payload is gone.
    async fn fetch(
        &self,
        bucket: &str,
        name: &str,
    ) -> BlobResult<(StoredObject, BlobBody<'static>)> {
        let not_found = || BlobStoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            name: name.to_string(),
        };
        if self.ensure_name_safe(name).is_err() {
            return Err(not_found());
        }
        let bucket_rec = match self.fetch_bucket(bucket).await {
            Err(BlobStoreError::InvalidBucketName { .. }) => return Err(not_found()),
            other => other?,
        };
        let object = self.fetch_object(&bucket_rec, name).await?;

        let file_path = self.object_path(&bucket_rec.name, name);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                not_found()
            } else {
                BlobStoreError::Io(err)
            }
        })?;

        Ok((object, ReaderStream::new(file).boxed()))
    }

    /// SQLite `SELECT 1` plus a write/read/delete round trip under `base_path`.
    async fn health_check(&self) -> Vec<Probe> {
        let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => Probe::ok("blob_sqlite"),
            Ok(v) => Probe::failed("blob_sqlite", format!("unexpected result: {}", v)),
            Err(e) => Probe::failed("blob_sqlite", format!("error: {}", e)),
        };

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        let disk = match fs::write(&tmp_path, b"readyz").await {
            Ok(()) => {
                let read = fs::read(&tmp_path).await;
                let _ = fs::remove_file(&tmp_path).await;
                match read {
                    Ok(bytes) if bytes == b"readyz" => Probe::ok("disk"),
                    Ok(_) => Probe::failed("disk", "file content mismatch"),
                    Err(e) => Probe::failed("disk", format!("could not read tmp file: {}", e)),
                }
            }
            Err(e) => Probe::failed("disk", format!("could not write tmp file: {}", e)),
        };

        vec![sqlite, disk]
    }
}

/// Storage-side refusals are rejections; everything else is an outage.
fn write_error(err: io::Error) -> BlobStoreError {
    match err.kind() {
        ErrorKind::PermissionDenied | ErrorKind::StorageFull => BlobStoreError::Rejected(err),
        _ => BlobStoreError::Io(err),
    }
}

pub(crate) fn classify_sqlx(err: &sqlx::Error) -> FailureClass {
    match err {
        sqlx::Error::RowNotFound => FailureClass::NotFound,
        sqlx::Error::Database(_) => FailureClass::WriteRejected,
        _ => FailureClass::BackendUnavailable,
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
