//! REST API endpoint handlers for the Observer server.
//!
//! All handlers read the latest snapshot from the shared [`AppState`];
//! none of them touch the aggregation tables.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Liveness message |
//! | `GET` | `/api/snapshot` | Latest snapshot |
//! | `GET` | `/api/entities/{id}` | One service from the latest snapshot |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use metropolis_types::Snapshot;

use crate::error::ObserverError;
use crate::state::AppState;

/// Report that the backend is up.
pub async fn index() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Log Metropolis Backend is running" }))
}

/// Return the most recent snapshot.
///
/// # Errors
///
/// Returns [`ObserverError::NoSnapshot`] before the first tick.
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let snapshot = state.latest().await.ok_or(ObserverError::NoSnapshot)?;
    Ok(Json(Snapshot::clone(&snapshot)))
}

/// Return one service from the most recent snapshot.
///
/// # Errors
///
/// Returns [`ObserverError::NoSnapshot`] before the first tick, or
/// [`ObserverError::NotFound`] if the service is not tracked.
pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let snapshot = state.latest().await.ok_or(ObserverError::NoSnapshot)?;
    let entity = snapshot
        .entity(&id)
        .cloned()
        .ok_or_else(|| ObserverError::NotFound(format!("entity {id}")))?;
    Ok(Json(entity))
}
