//! Tick callback that feeds the Observer API state.
//!
//! After each tick, this callback hands the snapshot to
//! [`AppState::publish`], which fans it out to `WebSocket` clients and
//! records it for the REST endpoints.

use std::sync::Arc;

use metropolis_core::TickCallback;
use metropolis_observer::AppState;
use metropolis_types::Snapshot;
use tracing::debug;

/// Callback that bridges the tick loop to the Observer API.
pub struct ObserverCallback {
    state: Arc<AppState>,
}

impl ObserverCallback {
    /// Create a new observer callback backed by the given app state.
    pub const fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl TickCallback for ObserverCallback {
    fn on_tick(&mut self, tick: u64, snapshot: &Arc<Snapshot>) {
        let report = self.state.publish(snapshot);
        if report.skipped > 0 || !report.removed.is_empty() {
            debug!(
                tick,
                delivered = report.delivered,
                skipped = report.skipped,
                removed = report.removed.len(),
                "Snapshot published with losses"
            );
        }
    }
}
