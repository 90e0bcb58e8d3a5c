//! HTTP handlers for the upload form, file listing and catalog lookup.
//! Upload bodies are streamed straight into the blob store; nothing is
//! buffered in memory.

use crate::{
    errors::AppError,
    models::catalog::IndexedRecord,
    services::{
        catalog_index::CatalogFilter,
        upload_coordinator::{IncomingFile, UploadError},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::io;
use tracing::warn;

/// Multipart field carrying the file.
pub const FILE_FIELD: &str = "form_file";

/// Optional multipart text field naming the uploader. Must precede the file.
pub const UPLOADER_FIELD: &str = "uploader";

/// Optional request header naming the uploader.
pub const UPLOADER_HEADER: &str = "x-uploader";

pub const NO_FILE_LOCATION: &str = "/?error=no-file";

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    pub error: Option<String>,
}

/// `GET /` - upload form followed by a link for every stored file.
pub async fn index(
    State(state): State<AppState>,
    Query(q): Query<IndexQuery>,
) -> Result<Html<String>, AppError> {
    let names = state.blobs.list_names(state.bucket()).await?;
    Ok(Html(render_index(&names, q.error.as_deref())))
}

/// `POST /upload` - store the submitted file, then redirect to the listing.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut uploader = headers
        .get(UPLOADER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let mut result = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {}", err)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(UPLOADER_FIELD) => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                if uploader.is_none() && !text.is_empty() {
                    uploader = Some(text);
                }
            }
            Some(FILE_FIELD) => {
                let file = IncomingFile {
                    file_name: field.file_name().unwrap_or_default().to_string(),
                    content_type: field.content_type().map(str::to_string),
                    body: field
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
                        .boxed(),
                };
                let uploader = uploader.as_deref().unwrap_or(&state.default_uploader);
                result = Some(state.coordinator.handle_upload(Some(file), uploader).await);
                break;
            }
            _ => {}
        }
    }

    let result = match result {
        Some(result) => result,
        None => {
            let uploader = uploader.as_deref().unwrap_or(&state.default_uploader);
            state.coordinator.handle_upload(None, uploader).await
        }
    };

    match result {
        Ok(_) => Ok(found("/")),
        Err(UploadError::NoFileProvided) => {
            warn!("upload submitted without a file");
            Ok(found(NO_FILE_LOCATION))
        }
        Err(err) => Err(err.into()),
    }
}

/// `GET /files` - every stored name, as JSON.
pub async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.blobs.list_names(state.bucket()).await?))
}

/// `GET /files/{filename}` - redirect to wherever the blob store serves it.
/// Unknown names still redirect; the blob endpoint answers for them.
pub async fn get_file(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    found(&state.blobs.resolve(state.bucket(), &filename))
}

/// `GET /catalog?field=value&...` - catalog records matching every filter.
pub async fn query_catalog(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<IndexedRecord>>, AppError> {
    let filters = CatalogFilter::parse_all(params)?;
    Ok(Json(state.catalog.query(&filters).await?))
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn render_index(names: &[String], error: Option<&str>) -> String {
    let mut html = String::from(concat!(
        "<!DOCTYPE html>\n<html>\n<head><title>Photo catalog</title></head>\n<body>\n",
        r#"<form method="post" enctype="multipart/form-data" action="/upload">"#,
        "\n  <div>\n",
        r#"    <label for="file">Choose file to upload</label>"#,
        "\n",
        r#"    <input type="file" id="file" name="form_file" accept="image/jpeg"/>"#,
        "\n  </div>\n  <div>\n    <button>Submit</button>\n  </div>\n</form>\n",
    ));

    if error == Some("no-file") {
        html.push_str("<p class=\"error\">No file was selected.</p>\n");
    }

    html.push_str("<ul>\n");
    for name in names {
        html.push_str(&format!(
            "<li><a href=\"/files/{}\">{}</a></li>\n",
            urlencoding::encode(name),
            html_escape(name)
        ));
    }
    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_lists_names_in_given_order() {
        let html = render_index(&["b.jpg".to_string(), "a.jpg".to_string()], None);
        let b = html.find(r#"<li><a href="/files/b.jpg">b.jpg</a></li>"#).unwrap();
        let a = html.find(r#"<li><a href="/files/a.jpg">a.jpg</a></li>"#).unwrap();
        assert!(b < a);
        assert!(html.contains(r#"name="form_file""#));
        assert!(!html.contains("No file was selected"));
    }

    #[test]
    fn index_escapes_names() {
        let html = render_index(&["<x> & y.jpg".to_string()], Some("no-file"));
        assert!(html.contains(
            r#"<li><a href="/files/%3Cx%3E%20%26%20y.jpg">&lt;x&gt; &amp; y.jpg</a></li>"#
        ));
        assert!(html.contains("No file was selected"));
    }
}
