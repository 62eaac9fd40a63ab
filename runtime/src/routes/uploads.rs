use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
};
use serde::Serialize;
use tracing::{error, info};

use super::ApiError;
use crate::{
    AppState,
    pipeline::{PayloadError, UploadedObject, new_document_id},
    storage::StorageLocation,
};

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    document_ids: Vec<String>,
}

pub fn upload_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/uploads", post(upload_notification))
        .route("/uploads/file", post(upload_file))
}

/// Accepts an upload notification (`{"Records":[...]}`) for objects that
/// are already stored.
async fn upload_notification(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let document_ids = state
        .pipeline
        .intake()
        .handle_raw(&body)
        .await
        .map_err(|err| {
            if err.downcast_ref::<PayloadError>().is_some() {
                (StatusCode::BAD_REQUEST, format!("{err:#}"))
            } else {
                error!(error = %err, "failed to register upload");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("failed to register upload: {err:#}"),
                )
            }
        })?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            status: "received",
            document_ids,
        }),
    ))
}

/// Stores a multipart `file` field in the upload bucket and registers it.
async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid multipart payload: {err}"),
        )
    })? {
        if field.name() == Some("file") {
            let file_name = field.file_name().map(str::to_string).ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    "uploaded file missing filename".to_string(),
                )
            })?;
            let data = field.bytes().await.map_err(|err| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("failed to read upload field: {err}"),
                )
            })?;
            upload = Some((file_name, data.to_vec()));
            break;
        }
    }

    let (file_name, bytes) = upload.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "missing file field in multipart payload".to_string(),
        )
    })?;
    let file_name = sanitize_file_name(&file_name).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid filename '{file_name}'"),
        )
    })?;

    // one prefix per upload so equal names never overwrite each other
    let key = format!("incoming/{}/{}", new_document_id(), file_name);
    let object = UploadedObject {
        bucket: state.config.upload_bucket.clone(),
        key,
        size: bytes.len() as u64,
    };

    state
        .objects
        .put(&StorageLocation::new(&object.bucket, &object.key), bytes)
        .await
        .map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to persist uploaded file: {err}"),
            )
        })?;

    let document_id = state
        .pipeline
        .intake()
        .register(&object)
        .await
        .map_err(|err| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("failed to register upload: {err:#}"),
            )
        })?;

    info!(file_name = %file_name, doc_id = %document_id, "file uploaded");
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            status: "received",
            document_ids: vec![document_id],
        }),
    ))
}

fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}
