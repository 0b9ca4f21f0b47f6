//! Upload and read-back handlers.
//! Streams request bodies straight into chunked storage and streams stored
//! objects back out, never buffering whole payloads in memory.

use crate::{
    errors::AppError,
    form::{UploadForm, UploadFormOptions},
    handlers::AppState,
    models::file::StoredObject,
    session::ParseOutcome,
    storage::StorageDriver,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::{StreamExt, TryStreamExt};
use serde_json::json;
use std::io;
use uuid::Uuid;

/// POST `/uploads` — parse a multipart form. Field parts come back as values,
/// file parts are persisted and come back as descriptors tagged with the
/// field name they arrived under.
pub async fn store_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ParseOutcome>, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::bad_request("expected a multipart/form-data content type"))?
        .to_string();

    let mut form = UploadForm::new(UploadFormOptions {
        db: Some(state.db.clone()),
        driver: Some(state.driver.clone()),
        ..UploadFormOptions::default()
    })?;
    // Record the originating field name on every stored file.
    form.on_file_begin(|name, file| {
        file.metadata = Some(json!({ "name": name }));
    });

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

    let outcome = form.parse(&content_type, stream).await?;
    Ok(Json(outcome))
}

/// GET `/files/{id}` — stream a stored object back.
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let meta = state.driver.describe(&state.db, id).await?;
    let stream = state.driver.open_read(&state.db, id).await?;
    let body = Body::from_stream(
        stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err)),
    );

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/files/{id}` — same headers as GET but no body.
pub async fn head_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let meta = state.driver.describe(&state.db, id).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn set_file_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.length.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&meta.upload_date.to_rfc2822())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
}
