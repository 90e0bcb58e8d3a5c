//! Represents an object (uploaded file) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Descriptor of a single stored blob.
///
/// The payload bytes live on disk; this row only describes them. A later
/// upload under the same `name` replaces both payload and descriptor.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Parent bucket ID.
    pub bucket_id: Uuid,

    /// Object key, unique within the bucket.
    pub name: String,

    /// Content type taken from the upload.
    pub content_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// When the payload was last written.
    pub last_modified: DateTime<Utc>,
}
