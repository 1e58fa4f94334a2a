//! Defines routes for the file store.
//!
//! ## Structure
//! - **File endpoints**
//!   - `POST   /files`               — ingest the request body (`?type=&name=`)
//!   - `GET    /files`               — list records (`?include_removed=true`)
//!   - `GET    /files/{id}`          — record metadata
//!   - `DELETE /files/{id}`          — logical delete
//!   - `GET    /files/{id}/content`  — download payload
//!   - `POST   /files/{id}/restore`  — mark current again
//!   - `GET    /lookup`              — record for an on-disk `path` + `name`
//!
//! - **Health endpoints**: `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        file_handlers::{
            get_file, get_file_content, list_files, lookup_file, remove_file, restore_file,
            upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    services::blob_store::BlobStore,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router for all file store routes.
///
/// `max_upload_bytes` caps request bodies; payloads are buffered whole.
pub fn routes(max_upload_bytes: usize) -> Router<BlobStore> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files", post(upload_file).get(list_files))
        .route("/files/{id}", get(get_file).delete(remove_file))
        .route("/files/{id}/content", get(get_file_content))
        .route("/files/{id}/restore", post(restore_file))
        .route("/lookup", get(lookup_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
