//! Represents a logical bucket, the flat namespace uploaded objects live in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket known to the blob store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Internal identifier used to key objects.
    pub id: Uuid,

    /// Bucket name (S3-style naming rules).
    pub name: String,

    /// When this bucket was first created.
    pub created_at: DateTime<Utc>,
}
