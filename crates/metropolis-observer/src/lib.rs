//! Observer API server for the Log Metropolis health engine.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws`) streaming every snapshot as JSON,
//!   one bounded fan-out subscription per connection
//! - **REST endpoints** for the latest snapshot and single services
//! - **Liveness message** (`GET /`)
//!
//! # Architecture
//!
//! The observer never reads the aggregation tables. The engine's tick
//! callback calls [`AppState::publish`], which hands the snapshot to the
//! fan-out and records it for the REST handlers.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
