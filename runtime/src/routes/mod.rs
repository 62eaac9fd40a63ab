use std::{collections::BTreeMap, sync::Arc};

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::AppState;

pub mod documents;
pub mod uploads;

pub use documents::document_routes;
pub use uploads::upload_routes;

pub type ApiError = (StatusCode, String);

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(upload_routes())
        .merge(document_routes())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    storages: String,
    documents: BTreeMap<String, usize>,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let counts = state
        .pipeline
        .status()
        .store()
        .status_counts()
        .await
        .map_err(|err| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("metadata store unavailable: {err}"),
            )
        })?;

    Ok(Json(HealthResponse {
        status: "ok",
        storages: format!("{:?}", state.storages_status),
        documents: counts
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect(),
    }))
}
