//! `WebSocket` handler for real-time snapshot streaming.
//!
//! Clients connect to `GET /ws` and receive every snapshot as a JSON text
//! frame. Each connection owns one fan-out subscription: it is registered
//! on upgrade and removed when the socket closes, whatever the reason.
//!
//! A client that reads slowly sees gaps rather than a growing backlog:
//! its subscription buffer is bounded, and a frame that cannot be written
//! within the delivery timeout ends the connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use metropolis_types::Snapshot;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming snapshots.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_snapshots(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Run one connection, then release its subscription.
async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let subscription = state.subscribe();
    let id = subscription.id();
    debug!(%id, "WebSocket client connected");

    stream_snapshots(socket, subscription, &state).await;

    state.unsubscribe(id);
    debug!(%id, "WebSocket client disconnected");
}

/// Forward snapshots until either side goes away.
async fn stream_snapshots(
    mut socket: WebSocket,
    mut subscription: metropolis_core::Subscription,
    state: &AppState,
) {
    loop {
        tokio::select! {
            snapshot = subscription.recv() => {
                let Some(snapshot) = snapshot else {
                    debug!("subscription closed, shutting down WebSocket");
                    return;
                };
                if !send_snapshot(&mut socket, &snapshot, state).await {
                    return;
                }
            }
            // Check if the client sent a close frame or disconnected.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {
                        // Ignore other message types (text, binary from client).
                    }
                }
            }
        }
    }
}

/// Write one snapshot frame. Returns `false` if the connection should end.
async fn send_snapshot(socket: &mut WebSocket, snapshot: &Snapshot, state: &AppState) -> bool {
    let json = match serde_json::to_string(snapshot) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize snapshot: {e}");
            return true;
        }
    };

    match tokio::time::timeout(state.delivery_timeout, socket.send(Message::Text(json.into()))).await
    {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            debug!("WebSocket client disconnected (send failed)");
            false
        }
        Err(_) => {
            warn!(
                timeout = ?state.delivery_timeout,
                "WebSocket send timed out, dropping client"
            );
            false
        }
    }
}
