//! Shared application state for the Observer API server.
//!
//! [`AppState`] holds the snapshot [`Fanout`] that `WebSocket` clients
//! subscribe to, and the most recent snapshot that the REST endpoints
//! serve. The engine's tick callback writes both; handlers only read.

use std::sync::Arc;
use std::time::Duration;

use metropolis_core::{Fanout, PublishReport, Subscription};
use metropolis_types::{Snapshot, SubscriptionId};
use tokio::sync::RwLock;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Snapshot fan-out to connected `WebSocket` clients.
    pub fanout: Arc<Fanout>,
    /// The most recent snapshot (absent until the first tick).
    pub latest: Arc<RwLock<Option<Arc<Snapshot>>>>,
    /// Upper bound on one `WebSocket` frame send.
    pub delivery_timeout: Duration,
}

impl AppState {
    /// Create a new application state around an existing fan-out.
    pub fn new(fanout: Arc<Fanout>, delivery_timeout: Duration) -> Self {
        Self {
            fanout,
            latest: Arc::new(RwLock::new(None)),
            delivery_timeout,
        }
    }

    /// Register a new snapshot subscriber.
    pub fn subscribe(&self) -> Subscription {
        self.fanout.subscribe()
    }

    /// Remove a snapshot subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.fanout.unsubscribe(id)
    }

    /// Publish a snapshot to every subscriber and record it as the latest.
    ///
    /// Never waits: if a REST handler holds the read lock, the latest
    /// snapshot is left as is and the next tick replaces it.
    pub fn publish(&self, snapshot: &Arc<Snapshot>) -> PublishReport {
        if let Ok(mut latest) = self.latest.try_write() {
            *latest = Some(Arc::clone(snapshot));
        }
        self.fanout.publish(snapshot)
    }

    /// The most recent snapshot, if any tick has run.
    pub async fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.read().await.clone()
    }
}
