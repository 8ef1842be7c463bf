//! Best-effort snapshot delivery to any number of subscribers.
//!
//! [`Fanout`] owns the subscription registry. Each subscriber gets a
//! small bounded channel; [`Fanout::publish`] offers the shared snapshot
//! to every channel with a non-blocking send:
//!
//! - accepted: delivered
//! - channel full: skipped for this tick (the subscriber keeps its
//!   older snapshots and will see a newer one once it catches up)
//! - receiver dropped: the subscriber is removed from the registry
//!
//! A stalled subscriber therefore loses snapshots but never delays the
//! tick or any other subscriber, and never holds more than its buffer.

use std::sync::Arc;

use dashmap::DashMap;
use metropolis_types::{Snapshot, SubscriptionId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::error::DeliveryFailure;

/// Outcome of one [`Fanout::publish`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that accepted the snapshot.
    pub delivered: usize,
    /// Subscribers whose buffer was full.
    pub skipped: usize,
    /// Subscribers removed because their receiver was gone.
    pub removed: Vec<DeliveryFailure>,
}

/// The receiving side of one registration.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<Arc<Snapshot>>,
}

impl Subscription {
    /// Handle to pass to [`Fanout::unsubscribe`].
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next snapshot. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.recv().await
    }

    /// Take a buffered snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.try_recv().ok()
    }
}

/// Subscription registry and broadcaster.
#[derive(Debug)]
pub struct Fanout {
    subscribers: DashMap<SubscriptionId, mpsc::Sender<Arc<Snapshot>>>,
    buffer: usize,
}

impl Fanout {
    /// Create a fan-out whose subscribers each buffer up to `buffer`
    /// snapshots (at least one).
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = SubscriptionId::new();
        self.subscribers.insert(id, tx);
        debug!(%id, subscribers = self.subscribers.len(), "subscriber registered");
        Subscription { id, rx }
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    ///
    /// Its receiver sees `None` after draining whatever was buffered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(%id, subscribers = self.subscribers.len(), "subscriber removed");
        }
        removed
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Offer `snapshot` to every subscriber without waiting on any.
    pub fn publish(&self, snapshot: &Arc<Snapshot>) -> PublishReport {
        let mut report = PublishReport::default();

        for entry in self.subscribers.iter() {
            match entry.value().try_send(Arc::clone(snapshot)) {
                Ok(()) => report.delivered = report.delivered.saturating_add(1),
                Err(TrySendError::Full(_)) => report.skipped = report.skipped.saturating_add(1),
                Err(TrySendError::Closed(_)) => {
                    report.removed.push(DeliveryFailure::Closed(*entry.key()));
                }
            }
        }

        // Removal needs the shard write lock, so it waits until iteration
        // has released every read lock.
        for failure in &report.removed {
            let DeliveryFailure::Closed(id) = *failure;
            self.subscribers.remove(&id);
            debug!(%failure, "subscriber dropped after failed delivery");
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn snapshot() -> Arc<Snapshot> {
        Arc::new(Snapshot::empty(Utc::now()))
    }

    fn drain(sub: &mut Subscription) -> usize {
        let mut count = 0_usize;
        while sub.try_recv().is_some() {
            count = count.saturating_add(1);
        }
        count
    }

    #[test]
    fn every_subscriber_receives_a_publish() {
        let fanout = Fanout::new(4);
        let mut a = fanout.subscribe();
        let mut b = fanout.subscribe();

        let report = fanout.publish(&snapshot());
        assert_eq!(report.delivered, 2);
        assert_eq!(drain(&mut a), 1);
        assert_eq!(drain(&mut b), 1);
    }

    #[test]
    fn slow_subscriber_is_bounded_and_fast_one_gets_every_tick() {
        let fanout = Fanout::new(3);
        let mut fast = fanout.subscribe();
        let mut slow = fanout.subscribe();

        let mut fast_received = 0_usize;
        let mut skipped = 0_usize;
        for _ in 0..50 {
            let report = fanout.publish(&snapshot());
            skipped = skipped.saturating_add(report.skipped);
            fast_received = fast_received.saturating_add(drain(&mut fast));
        }

        assert_eq!(fast_received, 50);
        assert_eq!(skipped, 47);
        assert_eq!(drain(&mut slow), 3);
        assert_eq!(fanout.subscriber_count(), 2);
    }

    #[test]
    fn dropped_receiver_is_unsubscribed_on_next_publish() {
        let fanout = Fanout::new(2);
        let mut keeper = fanout.subscribe();
        let gone = fanout.subscribe();
        let gone_id = gone.id();
        drop(gone);

        let report = fanout.publish(&snapshot());
        assert_eq!(report.delivered, 1);
        assert_eq!(report.removed, vec![DeliveryFailure::Closed(gone_id)]);
        assert_eq!(fanout.subscriber_count(), 1);
        assert_eq!(drain(&mut keeper), 1);
    }

    #[test]
    fn unsubscribe_ends_the_stream() {
        let fanout = Fanout::new(2);
        let mut sub = fanout.subscribe();
        fanout.publish(&snapshot());

        assert!(fanout.unsubscribe(sub.id()));
        assert!(!fanout.unsubscribe(sub.id()));
        assert_eq!(drain(&mut sub), 1);
        assert_eq!(fanout.publish(&snapshot()).delivered, 0);
    }

    #[tokio::test]
    async fn recv_returns_none_after_unsubscribe() {
        let fanout = Fanout::new(2);
        let mut sub = fanout.subscribe();
        fanout.publish(&snapshot());
        fanout.unsubscribe(sub.id());

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn zero_buffer_is_raised_to_one() {
        let fanout = Fanout::new(0);
        let mut sub = fanout.subscribe();
        fanout.publish(&snapshot());
        fanout.publish(&snapshot());
        assert_eq!(drain(&mut sub), 1);
    }
}
