//! Event aggregation: folds one event at a time into the tables.
//!
//! Per event, the [`Aggregator`]:
//!
//! 1. Clamps timestamps further in the future than the skew tolerance
//!    to the ingest time.
//! 2. Drops the event if its `event_id` was seen recently (when the
//!    duplicate window is enabled).
//! 3. Re-anchors the source service's state at the event time, then adds
//!    the activity increment, and the error increment if the error-channel
//!    policy selects the event.
//! 4. Does the same for the `(source, target)` pair when a real target is
//!    named.
//!
//! Each table write holds only the shard lock for the addressed key, so
//! any number of tasks may call [`Aggregator::ingest`] concurrently with a
//! running tick.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use metropolis_types::{Event, EventKind, Severity};
use tracing::debug;

use crate::config::{EngineSettings, ErrorChannelPolicy};
use crate::snapshot::Snapshotter;
use crate::table::Tables;

/// What happened to one ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event was folded into the tables.
    Applied {
        /// Whether the timestamp was clamped for being too far ahead.
        clamped: bool,
    },
    /// The event's id was already seen inside the duplicate window.
    Duplicate,
}

/// Running totals since the aggregator was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Events folded into the tables.
    pub applied: u64,
    /// Events dropped as duplicates.
    pub duplicates: u64,
    /// Applied events whose timestamp was clamped.
    pub clamped: u64,
}

/// Bounded FIFO of recently seen event ids.
#[derive(Debug)]
struct DedupWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `key`. Returns `false` if it was already present.
    fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(key.to_owned());
        self.seen.insert(key.to_owned());
        true
    }
}

/// Applies events to the shared entity and relationship tables.
#[derive(Debug)]
pub struct Aggregator {
    tables: Arc<Tables>,
    settings: EngineSettings,
    dedup: Option<Mutex<DedupWindow>>,
    applied: AtomicU64,
    duplicates: AtomicU64,
    clamped: AtomicU64,
}

impl Aggregator {
    /// Create an aggregator over fresh, empty tables.
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_tables(Arc::new(Tables::default()), settings)
    }

    /// Create an aggregator over existing tables.
    pub fn with_tables(tables: Arc<Tables>, settings: EngineSettings) -> Self {
        let dedup = (settings.dedup_capacity > 0)
            .then(|| Mutex::new(DedupWindow::new(settings.dedup_capacity)));
        Self {
            tables,
            settings,
            dedup,
            applied: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            clamped: AtomicU64::new(0),
        }
    }

    /// A snapshotter reading the same tables with the same settings.
    pub fn snapshotter(&self) -> Snapshotter {
        Snapshotter::new(Arc::clone(&self.tables), self.settings)
    }

    /// The tables this aggregator writes.
    pub const fn tables(&self) -> &Arc<Tables> {
        &self.tables
    }

    /// Fold `event` into the tables, using the wall clock as ingest time.
    pub fn ingest(&self, event: Event) -> IngestOutcome {
        self.ingest_at(event, Utc::now())
    }

    /// Fold `event` into the tables as if it arrived at `now`.
    pub fn ingest_at(&self, event: Event, now: DateTime<Utc>) -> IngestOutcome {
        if let (Some(window), Some(key)) = (&self.dedup, event.event_id.as_deref()) {
            let fresh = window
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key);
            if !fresh {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = key, source = event.source_id, "duplicate event dropped");
                return IngestOutcome::Duplicate;
            }
        }

        let horizon = now
            .checked_add_signed(self.settings.clock_skew_tolerance)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let clamped = event.observed_at > horizon;
        let at = if clamped {
            debug!(
                source = event.source_id,
                observed_at = %event.observed_at,
                "future timestamp clamped to ingest time"
            );
            now
        } else {
            event.observed_at
        };

        let signal = self.increments(&event);
        let settings = &self.settings;

        self.tables.entities.update(&event.source_id, at, |state| {
            state.decay_to(at, settings);
            state.activity_level = accumulate(state.activity_level, signal.activity);
            state.error_level = accumulate(state.error_level, signal.error);
            // A late event adds its amount but does not describe the latest state.
            if at >= state.last_seen {
                state.last_severity = event.severity;
            }
            state.idle_since = None;
        });

        if let Some(target) = event.target() {
            self.tables
                .relationships
                .update(&event.source_id, target, at, |state| {
                    state.decay_to(at, settings);
                    state.volume = accumulate(state.volume, signal.interaction);
                    state.idle_since = None;
                });
        }

        self.applied.fetch_add(1, Ordering::Relaxed);
        if clamped {
            self.clamped.fetch_add(1, Ordering::Relaxed);
        }
        IngestOutcome::Applied { clamped }
    }

    /// Running totals.
    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            applied: self.applied.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            clamped: self.clamped.load(Ordering::Relaxed),
        }
    }

    fn increments(&self, event: &Event) -> Increments {
        let explicit = (event.metric_value.is_finite() && event.metric_value > 0.0)
            .then_some(event.metric_value);
        let fallback = self.settings.default_metric_value;

        let activity = explicit.unwrap_or(if event.kind.defaults_to_unit_activity() {
            fallback
        } else {
            0.0
        });
        let error = if feeds_error(self.settings.error_channel, event.kind, event.severity) {
            explicit.unwrap_or(fallback)
        } else {
            0.0
        };

        Increments {
            activity,
            error,
            interaction: explicit.unwrap_or(fallback),
        }
    }
}

/// Amounts one event adds to each channel.
#[derive(Debug, Clone, Copy)]
struct Increments {
    activity: f64,
    error: f64,
    interaction: f64,
}

/// Add `amount` to a stored level, saturating at the largest finite value.
fn accumulate(level: f64, amount: f64) -> f64 {
    (level + amount).min(f64::MAX)
}

/// Whether an event of this kind and severity feeds the error channel.
pub const fn feeds_error(policy: ErrorChannelPolicy, kind: EventKind, severity: Severity) -> bool {
    let by_kind = matches!(kind, EventKind::Error);
    let by_severity = matches!(severity, Severity::Error);
    match policy {
        ErrorChannelPolicy::KindOrSeverity => by_kind || by_severity,
        ErrorChannelPolicy::KindOnly => by_kind,
        ErrorChannelPolicy::SeverityOnly => by_severity,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < TOLERANCE
    }

    fn activity(agg: &Aggregator, id: &str) -> f64 {
        agg.tables()
            .entities
            .get(id)
            .map_or(f64::NAN, |s| s.activity_level())
    }

    fn errors(agg: &Aggregator, id: &str) -> f64 {
        agg.tables()
            .entities
            .get(id)
            .map_or(f64::NAN, |s| s.error_level())
    }

    #[test]
    fn traffic_adds_its_metric() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        agg.ingest_at(Event::new("api", EventKind::Traffic, t).with_metric(5.0), t);
        assert!(close(activity(&agg, "api"), 5.0));
        assert!(close(errors(&agg, "api"), 0.0));
    }

    #[test]
    fn non_positive_traffic_counts_as_default() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        agg.ingest_at(Event::new("api", EventKind::Traffic, t), t);
        agg.ingest_at(Event::new("api", EventKind::Heartbeat, t).with_metric(-3.0), t);
        assert!(close(activity(&agg, "api"), 2.0));
    }

    #[test]
    fn error_event_feeds_error_channel_only() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        agg.ingest_at(Event::new("api", EventKind::Traffic, t).with_metric(5.0), t);
        agg.ingest_at(
            Event::new("api", EventKind::Error, t).with_severity(Severity::Error),
            t,
        );
        assert!(close(activity(&agg, "api"), 5.0));
        assert!(close(errors(&agg, "api"), 1.0));
        let state = agg.tables().entities.get("api");
        assert!(state.is_some_and(|s| s.last_severity() == Severity::Error));
    }

    #[test]
    fn error_severity_on_traffic_feeds_both_channels() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        agg.ingest_at(
            Event::new("api", EventKind::Traffic, t)
                .with_metric(2.0)
                .with_severity(Severity::Error),
            t,
        );
        assert!(close(activity(&agg, "api"), 2.0));
        assert!(close(errors(&agg, "api"), 2.0));
    }

    #[test]
    fn kind_only_policy_ignores_error_severity() {
        let settings = EngineSettings {
            error_channel: ErrorChannelPolicy::KindOnly,
            ..EngineSettings::default()
        };
        let agg = Aggregator::new(settings);
        let t = Utc::now();
        agg.ingest_at(
            Event::new("api", EventKind::Traffic, t).with_severity(Severity::Error),
            t,
        );
        assert!(close(errors(&agg, "api"), 0.0));
    }

    #[test]
    fn later_event_decays_before_adding() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        agg.ingest_at(Event::new("api", EventKind::Traffic, t).with_metric(4.0), t);
        let later = t + TimeDelta::seconds(5);
        agg.ingest_at(Event::new("api", EventKind::Traffic, later).with_metric(1.0), later);
        assert!(close(activity(&agg, "api"), 3.0));
    }

    #[test]
    fn out_of_order_event_never_decays_negatively() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        agg.ingest_at(Event::new("api", EventKind::Traffic, t).with_metric(4.0), t);
        let earlier = t - TimeDelta::seconds(30);
        agg.ingest_at(Event::new("api", EventKind::Traffic, earlier).with_metric(1.0), t);
        assert!(close(activity(&agg, "api"), 5.0));
        let state = agg.tables().entities.get("api");
        assert!(state.is_some_and(|s| s.last_seen() == t));
    }

    #[test]
    fn late_event_keeps_latest_severity() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        agg.ingest_at(Event::new("api", EventKind::Traffic, t), t);
        let earlier = t - TimeDelta::seconds(30);
        agg.ingest_at(
            Event::new("api", EventKind::Error, earlier).with_severity(Severity::Error),
            t,
        );
        let state = agg.tables().entities.get("api");
        assert!(state.as_ref().is_some_and(|s| s.last_seen() == t));
        assert!(state.is_some_and(|s| s.last_severity() == Severity::Info));
        assert!(close(errors(&agg, "api"), 1.0));
    }

    #[test]
    fn huge_metrics_saturate_instead_of_overflowing() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        for _ in 0..2 {
            agg.ingest_at(
                Event::new("api", EventKind::Error, t)
                    .with_target("db")
                    .with_metric(f64::MAX)
                    .with_severity(Severity::Error),
                t,
            );
        }
        let state = agg.tables().entities.get("api");
        assert!(state.as_ref().is_some_and(|s| s.activity_level().is_finite()));
        assert!(state.as_ref().is_some_and(|s| s.activity_level() > 1e300));
        assert!(state.is_some_and(|s| s.error_level().is_finite() && s.error_level() > 1e300));
        let rel = agg.tables().relationships.get("api", "db");
        assert!(rel.is_some_and(|r| r.volume().is_finite() && r.volume() > 1e300));

        let snap = agg.snapshotter().tick(t);
        let api = snap.entity("api");
        assert!(api.is_some_and(|e| e.activity_level > 1e300 && e.error_level > 1e300));
        assert!(api.is_some_and(|e| e.health < 1.0));
    }

    #[test]
    fn future_timestamp_is_clamped() {
        let agg = Aggregator::new(EngineSettings::default());
        let now = Utc::now();
        let far_future = now + TimeDelta::hours(6);
        let outcome = agg.ingest_at(Event::new("api", EventKind::Traffic, far_future), now);
        assert_eq!(outcome, IngestOutcome::Applied { clamped: true });
        let state = agg.tables().entities.get("api");
        assert!(state.is_some_and(|s| s.last_seen() == now));
        assert_eq!(agg.stats().clamped, 1);
    }

    #[test]
    fn small_future_skew_is_accepted() {
        let agg = Aggregator::new(EngineSettings::default());
        let now = Utc::now();
        let slightly_ahead = now + TimeDelta::seconds(1);
        let outcome = agg.ingest_at(Event::new("api", EventKind::Traffic, slightly_ahead), now);
        assert_eq!(outcome, IngestOutcome::Applied { clamped: false });
        let state = agg.tables().entities.get("api");
        assert!(state.is_some_and(|s| s.last_seen() == slightly_ahead));
    }

    #[test]
    fn target_creates_relationship() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        agg.ingest_at(Event::new("api", EventKind::Traffic, t).with_target("db"), t);
        let rel = agg.tables().relationships.get("api", "db");
        assert!(rel.is_some_and(|r| close(r.volume(), 1.0)));
    }

    #[test]
    fn missing_or_unknown_target_creates_no_relationship() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        agg.ingest_at(Event::new("api", EventKind::Traffic, t), t);
        agg.ingest_at(Event::new("api", EventKind::Traffic, t).with_target("unknown"), t);
        assert!(agg.tables().relationships.is_empty());
        assert!(close(activity(&agg, "api"), 2.0));
    }

    #[test]
    fn relationships_are_directed() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        agg.ingest_at(Event::new("api", EventKind::Traffic, t).with_target("db"), t);
        agg.ingest_at(Event::new("db", EventKind::Traffic, t).with_target("api"), t);
        assert_eq!(agg.tables().relationships.len(), 2);
    }

    #[test]
    fn duplicates_dropped_when_window_enabled() {
        let settings = EngineSettings {
            dedup_capacity: 2,
            ..EngineSettings::default()
        };
        let agg = Aggregator::new(settings);
        let t = Utc::now();
        let event = Event::new("api", EventKind::Traffic, t).with_event_id("p1-1");
        assert!(matches!(agg.ingest_at(event.clone(), t), IngestOutcome::Applied { .. }));
        assert_eq!(agg.ingest_at(event, t), IngestOutcome::Duplicate);
        assert!(close(activity(&agg, "api"), 1.0));
        assert_eq!(agg.stats().duplicates, 1);
    }

    #[test]
    fn dedup_window_forgets_oldest_keys() {
        let mut window = DedupWindow::new(2);
        assert!(window.insert("a"));
        assert!(window.insert("b"));
        assert!(window.insert("c"));
        assert!(window.insert("a"));
        assert!(!window.insert("c"));
    }

    #[test]
    fn duplicates_counted_twice_without_window() {
        let agg = Aggregator::new(EngineSettings::default());
        let t = Utc::now();
        let event = Event::new("api", EventKind::Traffic, t).with_event_id("p1-1");
        agg.ingest_at(event.clone(), t);
        agg.ingest_at(event, t);
        assert!(close(activity(&agg, "api"), 2.0));
    }

    #[test]
    fn concurrent_ingest_loses_no_updates() {
        let agg = Arc::new(Aggregator::new(EngineSettings::default()));
        let t = Utc::now();
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let agg = Arc::clone(&agg);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        let id = if worker % 2 == 0 { "api" } else { "db" };
                        agg.ingest_at(Event::new(id, EventKind::Traffic, t).with_target("cache"), t);
                    }
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().is_ok());
        }
        assert!(close(activity(&agg, "api"), 1000.0));
        assert!(close(activity(&agg, "db"), 1000.0));
        assert_eq!(agg.stats().applied, 2000);
    }
}
