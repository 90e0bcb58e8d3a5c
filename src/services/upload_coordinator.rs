//! Upload coordinator: the staged commit across the two backends.
//!
//! The blob is written first, then its catalog record. There is no
//! transaction spanning both; if the catalog write fails the blob stays where
//! it is and an `OrphanedBlob` is reported for reconciliation.

use crate::{
    errors::FailureClass,
    models::{catalog::CatalogRecord, object::StoredObject},
    services::{
        blob_store::{BlobBody, BlobStore, BlobStoreError},
        catalog_index::{CatalogError, CatalogIndex},
        reconciler::{OrphanReporter, OrphanedBlob},
    },
};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

/// Source of upload timestamps.
pub trait Clock: Send + Sync + 'static {
    /// Whole seconds since the Unix epoch.
    fn now_secs(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// A file taken off the upload form.
pub struct IncomingFile<'a> {
    pub file_name: String,
    pub content_type: Option<String>,
    pub body: BlobBody<'a>,
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub object: StoredObject,
    pub record_id: Uuid,
    pub record: CatalogRecord,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no file provided")]
    NoFileProvided,
    #[error(transparent)]
    Blob(#[from] BlobStoreError),
    #[error("blob `{name}` stored in `{bucket}` but catalog write failed: {source}")]
    Orphaned {
        bucket: String,
        name: String,
        #[source]
        source: CatalogError,
    },
}

impl UploadError {
    pub fn class(&self) -> FailureClass {
        match self {
            UploadError::NoFileProvided => FailureClass::NoFileProvided,
            UploadError::Blob(err) => err.class(),
            UploadError::Orphaned { source, .. } => source.class(),
        }
    }
}

#[derive(Clone)]
pub struct UploadCoordinator {
    blobs: Arc<dyn BlobStore>,
    catalog: Arc<dyn CatalogIndex>,
    bucket: String,
    clock: Arc<dyn Clock>,
    orphans: OrphanReporter,
}

impl UploadCoordinator {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        catalog: Arc<dyn CatalogIndex>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            blobs,
            catalog,
            bucket: bucket.into(),
            clock: Arc::new(SystemClock),
            orphans: OrphanReporter::disabled(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_orphan_reporter(mut self, orphans: OrphanReporter) -> Self {
        self.orphans = orphans;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store `file` in the blob store, then record it in the catalog.
    ///
    /// `None` or an empty file name is `NoFileProvided` and touches neither
    /// backend. A blob failure stops before any metadata is written.
    pub async fn handle_upload(
        &self,
        file: Option<IncomingFile<'_>>,
        uploader: &str,
    ) -> Result<UploadReceipt, UploadError> {
        let file = match file {
            Some(file) if !file.file_name.is_empty() => file,
            _ => return Err(UploadError::NoFileProvided),
        };

        let object = self
            .blobs
            .put(
                &self.bucket,
                &file.file_name,
                file.content_type.as_deref(),
                file.body,
            )
            .await?;

        let record = CatalogRecord {
            url: self.blobs.resolve(&self.bucket, &file.file_name),
            name: file.file_name,
            uploader: uploader.to_string(),
            timestamp: self.clock.now_secs(),
        };

        match self.catalog.insert(&record).await {
            Ok(record_id) => {
                info!(
                    bucket = %self.bucket,
                    name = %record.name,
                    uploader = %record.uploader,
                    size_bytes = object.size_bytes,
                    "upload stored"
                );
                Ok(UploadReceipt {
                    object,
                    record_id,
                    record,
                })
            }
            Err(err) => {
                error!(
                    target: "photo_catalog::orphan",
                    bucket = %self.bucket,
                    name = %record.name,
                    error = %err,
                    "orphaned blob: stored without a catalog record"
                );
                let name = record.name.clone();
                self.orphans.report(OrphanedBlob {
                    bucket: self.bucket.clone(),
                    record,
                });
                Err(UploadError::Orphaned {
                    bucket: self.bucket.clone(),
                    name,
                    source: err,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        catalog_index::CatalogFilter,
        mock_backends::{FixedClock, MemoryBlobStore, MemoryCatalog, bytes_body},
    };

    const BUCKET: &str = "image-storage";

    fn coordinator(
        blobs: &Arc<MemoryBlobStore>,
        catalog: &Arc<MemoryCatalog>,
    ) -> UploadCoordinator {
        UploadCoordinator::new(blobs.clone(), catalog.clone(), BUCKET)
            .with_clock(Arc::new(FixedClock(1_700_000_000)))
    }

    fn file(name: &str, bytes: &'static [u8]) -> Option<IncomingFile<'static>> {
        Some(IncomingFile {
            file_name: name.to_string(),
            content_type: Some("image/jpeg".into()),
            body: bytes_body(bytes),
        })
    }

    #[tokio::test]
    async fn successful_upload_is_listed_resolvable_and_recorded() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let catalog = Arc::new(MemoryCatalog::default());
        let coordinator = coordinator(&blobs, &catalog);

        let receipt = coordinator
            .handle_upload(file("cat.jpg", b"\xFF\xD8\xFF\xE0"), "alice")
            .await
            .unwrap();
        assert_eq!(receipt.record.uploader, "alice");
        assert_eq!(receipt.record.timestamp, 1_700_000_000);
        assert_eq!(receipt.record.url, blobs.resolve(BUCKET, "cat.jpg"));

        assert_eq!(blobs.list_names(BUCKET).await.unwrap(), vec!["cat.jpg"]);
        assert_eq!(blobs.contents(BUCKET, "cat.jpg").unwrap(), b"\xFF\xD8\xFF\xE0");

        let found = catalog
            .query(&[CatalogFilter::Name("cat.jpg".into())])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, receipt.record_id);
        assert_eq!(found[0].record, receipt.record);
    }

    #[tokio::test]
    async fn missing_file_touches_neither_backend() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let catalog = Arc::new(MemoryCatalog::default());
        let coordinator = coordinator(&blobs, &catalog);

        let err = coordinator.handle_upload(None, "alice").await.unwrap_err();
        assert!(matches!(err, UploadError::NoFileProvided));

        let err = coordinator
            .handle_upload(file("", b"ignored"), "alice")
            .await
            .unwrap_err();
        assert_eq!(err.class(), FailureClass::NoFileProvided);

        assert_eq!(blobs.put_calls(), 0);
        assert_eq!(catalog.insert_calls(), 0);
    }

    #[tokio::test]
    async fn blob_failure_never_writes_metadata() {
        let blobs = Arc::new(MemoryBlobStore::default());
        blobs.fail_puts(true);
        let catalog = Arc::new(MemoryCatalog::default());
        let coordinator = coordinator(&blobs, &catalog);

        let err = coordinator
            .handle_upload(file("cat.jpg", b"bytes"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Blob(_)));
        assert_eq!(err.class(), FailureClass::BackendUnavailable);
        assert_eq!(catalog.insert_calls(), 0);
    }

    #[tokio::test]
    async fn catalog_failure_reports_orphan_and_keeps_blob() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let catalog = Arc::new(MemoryCatalog::default());
        catalog.fail_next_inserts(usize::MAX);
        let (reporter, mut rx) = OrphanReporter::channel();
        let coordinator = coordinator(&blobs, &catalog).with_orphan_reporter(reporter);

        let err = coordinator
            .handle_upload(file("cat.jpg", b"bytes"), "alice")
            .await
            .unwrap_err();
        match &err {
            UploadError::Orphaned { bucket, name, .. } => {
                assert_eq!(bucket, BUCKET);
                assert_eq!(name, "cat.jpg");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.class(), FailureClass::BackendUnavailable);

        // no rollback: the blob is still there
        assert_eq!(blobs.list_names(BUCKET).await.unwrap(), vec!["cat.jpg"]);

        let orphan = rx.try_recv().unwrap();
        assert_eq!(orphan.bucket, BUCKET);
        assert_eq!(orphan.record.name, "cat.jpg");
        assert_eq!(orphan.record.uploader, "alice");
    }

    #[tokio::test]
    async fn reupload_overwrites_blob_and_adds_second_record() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let catalog = Arc::new(MemoryCatalog::default());
        let clock = Arc::new(FixedClock(100));

        UploadCoordinator::new(blobs.clone(), catalog.clone(), BUCKET)
            .with_clock(clock)
            .handle_upload(file("cat.jpg", b"first"), "alice")
            .await
            .unwrap();
        UploadCoordinator::new(blobs.clone(), catalog.clone(), BUCKET)
            .with_clock(Arc::new(FixedClock(200)))
            .handle_upload(file("cat.jpg", b"second"), "alice")
            .await
            .unwrap();

        assert_eq!(blobs.contents(BUCKET, "cat.jpg").unwrap(), b"second");

        let mut timestamps: Vec<i64> = catalog
            .query(&[CatalogFilter::Name("cat.jpg".into())])
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.record.timestamp)
            .collect();
        timestamps.sort();
        assert_eq!(timestamps, vec![100, 200]);
    }
}
