//! Metadata records kept by the catalog index.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Descriptive metadata written once per successful upload.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct CatalogRecord {
    /// Name of the stored object this record describes.
    pub name: String,

    /// Location the object's bytes can be fetched from.
    pub url: String,

    /// Identity of whoever uploaded the file.
    pub uploader: String,

    /// Seconds since the Unix epoch at the time of the metadata write.
    pub timestamp: i64,
}

/// A catalog record together with the identifier the index assigned to it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct IndexedRecord {
    pub id: Uuid,

    #[serde(flatten)]
    #[sqlx(flatten)]
    pub record: CatalogRecord,
}
