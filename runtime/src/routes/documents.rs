use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::{
    AppState,
    pipeline::ReprocessError,
    storage::{DocStatus, DocumentRecord, StoreError},
};

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct DocumentListResponse {
    total: usize,
    documents: Vec<DocumentRecord>,
}

#[derive(Debug, Serialize)]
struct ReprocessResponse {
    document_id: String,
    message_id: String,
}

pub fn document_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/documents", get(list_documents))
        .route("/documents/{id}", get(get_document))
        .route("/documents/{id}/reprocess", post(reprocess_document))
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentRecord>, ApiError> {
    state
        .pipeline
        .status()
        .store()
        .read(&id)
        .await
        .map(Json)
        .map_err(store_error)
}

async fn list_documents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentListResponse>, ApiError> {
    let statuses = match query.status.as_deref() {
        Some(raw) => vec![
            raw.parse::<DocStatus>()
                .map_err(|err| (StatusCode::BAD_REQUEST, err))?,
        ],
        None => DocStatus::ALL.to_vec(),
    };

    let store = state.pipeline.status().store();
    let mut documents = Vec::new();
    for status in statuses {
        documents.extend(store.list_by_status(status).await.map_err(store_error)?);
    }
    documents.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    Ok(Json(DocumentListResponse {
        total: documents.len(),
        documents,
    }))
}

async fn reprocess_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ReprocessResponse>), ApiError> {
    match state.pipeline.reprocess(&id).await {
        Ok(message_id) => Ok((
            StatusCode::ACCEPTED,
            Json(ReprocessResponse {
                document_id: id,
                message_id,
            }),
        )),
        Err(err @ ReprocessError::NotFound(_)) => Err((StatusCode::NOT_FOUND, err.to_string())),
        Err(err @ ReprocessError::NotReprocessable { .. }) => {
            Err((StatusCode::CONFLICT, err.to_string()))
        }
        Err(ReprocessError::Other(err)) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            format!("failed to reprocess {id}: {err:#}"),
        )),
    }
}

fn store_error(err: StoreError) -> ApiError {
    let status = match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
