//! Axum router construction for the Observer API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the Observer server.
///
/// The router includes:
/// - `GET /` -- liveness message
/// - `GET /ws` -- `WebSocket` snapshot stream
/// - `GET /api/snapshot` -- latest snapshot
/// - `GET /api/entities/{id}` -- single service
///
/// CORS allows any origin; the city dashboard is served separately.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/ws", get(ws::ws_snapshots))
        .route("/api/snapshot", get(handlers::get_snapshot))
        .route("/api/entities/{id}", get(handlers::get_entity))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
