//! Handlers for graph load and save.
//!
//! Saves use optimistic concurrency: the payload names the version it was
//! based on, and the store rejects it with the current copy when that is
//! no longer the stored version.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use graphsync_core::error::CoreError;
use graphsync_core::graph::SavePayload;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/graphs/{name}
pub async fn get_graph(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let store = state.store.read().await;
    let snapshot = store
        .get(&name)
        .cloned()
        .ok_or_else(|| AppError::NotFound(name.clone()))?;

    Ok(Json(DataResponse { data: snapshot }))
}

/// PUT /api/v1/graphs/{name}
///
/// Commit a full snapshot. Version 0 creates a graph that does not exist
/// yet; otherwise the version must match the stored one.
pub async fn put_graph(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<SavePayload>,
) -> AppResult<impl IntoResponse> {
    if payload.name != name {
        return Err(CoreError::Validation(format!(
            "Payload names graph '{}' but was sent to '{name}'",
            payload.name
        ))
        .into());
    }

    let base_version = payload.version;
    let result = state
        .store
        .write()
        .await
        .commit(payload, chrono::Utc::now());

    match result {
        Ok(ack) => {
            tracing::info!(graph = %name, version = ack.version, "Graph saved");
            Ok(Json(DataResponse { data: ack }))
        }
        Err(rejection) => {
            let error = AppError::from(rejection);
            if let AppError::VersionConflict(current) = &error {
                tracing::info!(
                    graph = %name,
                    base_version,
                    server_version = current.version,
                    "Rejected stale save",
                );
            }
            Err(error)
        }
    }
}
