//! Defines routes for the photo catalog.
//!
//! ## Structure
//! - **Catalog pages**
//!   - `GET  /`                  - upload form plus file listing
//!   - `POST /upload`            - multipart upload, redirects to `/`
//!   - `GET  /files`             - stored names as JSON
//!   - `GET  /files/{filename}`  - redirect to the resolved blob URL
//!   - `GET  /catalog`           - catalog records filtered by query params
//!
//! - **Blob endpoint**
//!   - `GET|HEAD /blobs/{bucket}/{*key}` - serve stored bytes
//!
//! - **Probes**: `/healthz`, `/readyz`

use crate::{
    handlers::{
        blob_handlers::{get_blob, head_blob},
        catalog_handlers::{get_file, index, list_files, query_catalog, upload},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router for every catalog route.
///
/// Uploads are streamed to disk, so the default request body limit is lifted
/// for `/upload`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // catalog pages
        .route("/", get(index))
        .route("/upload", post(upload).layer(DefaultBodyLimit::disable()))
        .route("/files", get(list_files))
        .route("/files/{filename}", get(get_file))
        .route("/catalog", get(query_catalog))
        // blob endpoint
        .route("/blobs/{bucket}/{*key}", get(get_blob).head(head_blob))
}

/// The router with state attached, ready to serve.
pub fn app(state: AppState) -> Router {
    routes().with_state(state)
}
