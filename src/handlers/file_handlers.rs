//! HTTP handlers for ingesting, serving, and managing stored files.
//! Authentication happens upstream; the authenticated actor arrives in the
//! `X-Actor` header. All storage concerns are delegated to `BlobStore`.

use crate::{
    errors::AppError,
    models::stored_file::{FileView, StoredFile},
    services::blob_store::{BlobStore, WriteOutcome},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

/// Header carrying the authenticated actor's identity.
pub const ACTOR_HEADER: &str = "x-actor";

/// Query params accepted by `POST /files`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Declared type or extension.
    #[serde(rename = "type", default)]
    pub file_type: String,
    /// Original file name.
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub include_removed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub path: String,
    pub name: String,
}

fn actor(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request("missing X-Actor header"))
}

/// `POST /files?type=&name=` — store the request body.
///
/// 201 when new bytes were written, 200 when the payload was a duplicate.
pub async fn upload_file(
    State(store): State<BlobStore>,
    Query(q): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let actor = actor(&headers)?;
    let (file, outcome) = store.ingest(&q.file_type, &q.name, &actor, &body).await?;

    let status = match outcome {
        WriteOutcome::Stored => StatusCode::CREATED,
        WriteOutcome::Duplicate => StatusCode::OK,
    };
    Ok((status, Json(file.view())).into_response())
}

/// `GET /files` — list records, current first.
pub async fn list_files(
    State(store): State<BlobStore>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<FileView>>, AppError> {
    let files = store.list(q.include_removed.unwrap_or(false)).await?;
    Ok(Json(files.iter().map(StoredFile::view).collect()))
}

/// `GET /files/{id}` — record metadata.
pub async fn get_file(
    State(store): State<BlobStore>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileView>, AppError> {
    let file = store.open(id).await?;
    Ok(Json(file.view()))
}

/// `GET /files/{id}/content` — payload as an attachment.
pub async fn get_file_content(
    State(store): State<BlobStore>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let file = store.open(id).await?;
    let data = store.read(&file).await?;

    let mut response = Response::new(Body::from(data));
    *response.status_mut() = StatusCode::OK;
    set_content_headers(response.headers_mut(), &file);
    Ok(response)
}

/// `DELETE /files/{id}` — logical delete; the blob stays on disk.
pub async fn remove_file(
    State(store): State<BlobStore>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<FileView>, AppError> {
    let actor = actor(&headers)?;
    let mut file = store.open(id).await?;
    store.remove(&mut file, &actor).await?;
    Ok(Json(file.view()))
}

/// `POST /files/{id}/restore` — mark a removed record current again.
pub async fn restore_file(
    State(store): State<BlobStore>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<FileView>, AppError> {
    let actor = actor(&headers)?;
    let mut file = store.open(id).await?;
    store.restore(&mut file, &actor).await?;
    Ok(Json(file.view()))
}

/// `GET /lookup?path=&name=` — map an on-disk blob back to its record.
pub async fn lookup_file(
    State(store): State<BlobStore>,
    Query(q): Query<LookupQuery>,
) -> Result<Json<FileView>, AppError> {
    match store.locate(&q.path, &q.name).await? {
        Some(file) => Ok(Json(file.view())),
        None => Err(AppError::not_found(format!(
            "no file record for `{}/{}`",
            q.path, q.name
        ))),
    }
}

fn set_content_headers(headers: &mut HeaderMap, file: &StoredFile) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&file.file_type)),
    );

    let filename: String = file
        .download_name()
        .chars()
        .filter(|c| c.is_ascii_graphic() && *c != '"' && *c != '\\')
        .collect();
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

/// MIME type for a declared file type. Unknown types are served as octets.
fn content_type_for(file_type: &str) -> &'static str {
    match file_type
        .trim_start_matches('.')
        .to_ascii_lowercase()
        .as_str()
    {
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        "csv" => "text/csv",
        "html" | "htm" => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}
