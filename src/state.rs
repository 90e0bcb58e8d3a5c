//! Shared state handed to every handler.

use crate::services::{
    blob_store::BlobStore, catalog_index::CatalogIndex, upload_coordinator::UploadCoordinator,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: UploadCoordinator,
    pub blobs: Arc<dyn BlobStore>,
    pub catalog: Arc<dyn CatalogIndex>,

    /// Uploader recorded when a request does not name one.
    pub default_uploader: String,
}

impl AppState {
    pub fn new(
        coordinator: UploadCoordinator,
        blobs: Arc<dyn BlobStore>,
        catalog: Arc<dyn CatalogIndex>,
        default_uploader: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            blobs,
            catalog,
            default_uploader: default_uploader.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        self.coordinator.bucket()
    }
}
