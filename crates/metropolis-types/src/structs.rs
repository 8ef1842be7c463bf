//! Event and snapshot structures.
//!
//! An [`Event`] is the normalized form of one producer message. It is
//! consumed by value by the aggregator and never retained afterwards.
//!
//! A [`Snapshot`] is the immutable, per-tick rendering of every tracked
//! service and service pair. Entities are sorted by id and relationships
//! by `(source_id, target_id)`, so two snapshots over the same identity
//! set line up position by position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{EventKind, Severity};

/// Sentinel producers use for "no target service".
pub const UNKNOWN_SERVICE: &str = "unknown";

/// One normalized service-health event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Event {
    /// The service that emitted or experienced the signal.
    pub source_id: String,
    /// The service on the other end of the interaction, if any.
    pub target_id: Option<String>,
    /// When the producer observed the signal.
    pub observed_at: DateTime<Utc>,
    /// Magnitude of the signal (request count, error count, ...).
    pub metric_value: f64,
    /// Signal kind.
    pub kind: EventKind,
    /// Producer-assigned severity.
    pub severity: Severity,
    /// Opaque producer payload. Never interpreted by the engine.
    pub payload: String,
    /// Optional producer-assigned key used for duplicate suppression.
    pub event_id: Option<String>,
}

impl Event {
    /// Create an event with no target, zero metric, `INFO` severity and an
    /// empty payload.
    pub fn new(source_id: impl Into<String>, kind: EventKind, observed_at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: None,
            observed_at,
            metric_value: 0.0,
            kind,
            severity: Severity::Info,
            payload: String::new(),
            event_id: None,
        }
    }

    /// Set the target service.
    #[must_use]
    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Set the metric value.
    #[must_use]
    pub fn with_metric(mut self, metric_value: f64) -> Self {
        self.metric_value = metric_value;
        self
    }

    /// Set the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the duplicate-suppression key.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// The target service, unless absent, empty, or the `"unknown"`
    /// sentinel.
    pub fn target(&self) -> Option<&str> {
        self.target_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != UNKNOWN_SERVICE)
    }
}

/// Point-in-time view of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EntityView {
    /// Service identity.
    pub id: String,
    /// Decayed traffic volume.
    pub activity_level: f64,
    /// Decayed error volume.
    pub error_level: f64,
    /// Share of activity that is not error, in `[0, 1]`.
    pub health: f64,
    /// Severity of the most recent event for this service.
    pub last_severity: Severity,
    /// Most recent observation time for this service.
    pub last_seen: DateTime<Utc>,
}

/// Point-in-time view of one directed service pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RelationshipView {
    /// Calling service.
    pub source_id: String,
    /// Called service.
    pub target_id: String,
    /// Decayed interaction volume.
    pub volume: f64,
}

/// Immutable rendering of all tracked state at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Snapshot {
    /// The instant every value was decayed to.
    pub tick_time: DateTime<Utc>,
    /// Services, sorted by id.
    pub entities: Vec<EntityView>,
    /// Service pairs, sorted by `(source_id, target_id)`.
    pub relationships: Vec<RelationshipView>,
}

impl Snapshot {
    /// An empty snapshot at `tick_time`.
    pub const fn empty(tick_time: DateTime<Utc>) -> Self {
        Self {
            tick_time,
            entities: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Look up a service by id.
    pub fn entity(&self, id: &str) -> Option<&EntityView> {
        self.entities
            .binary_search_by(|e| e.id.as_str().cmp(id))
            .ok()
            .and_then(|idx| self.entities.get(idx))
    }

    /// Look up a directed service pair.
    pub fn relationship(&self, source_id: &str, target_id: &str) -> Option<&RelationshipView> {
        self.relationships
            .binary_search_by(|r| {
                (r.source_id.as_str(), r.target_id.as_str()).cmp(&(source_id, target_id))
            })
            .ok()
            .and_then(|idx| self.relationships.get(idx))
    }
}
