//! Snapshot production and the eviction sweep.
//!
//! [`Snapshotter::tick`] is a read-only pass: every stored record is
//! decayed to the tick time on a copy, so repeated ticks with no new
//! events converge smoothly toward zero and two ticks at the same instant
//! produce identical snapshots.
//!
//! [`Snapshotter::sweep`] is the only writer besides the aggregator. It
//! removes entries that have sat at or below the eviction threshold for
//! longer than the grace period.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metropolis_types::Snapshot;
use tracing::debug;

use crate::config::EngineSettings;
use crate::table::Tables;

/// Number of entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Services removed.
    pub entities: usize,
    /// Service pairs removed.
    pub relationships: usize,
}

impl SweepReport {
    /// Total entries removed.
    pub const fn total(&self) -> usize {
        self.entities.saturating_add(self.relationships)
    }
}

/// Renders the shared tables into immutable snapshots.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    tables: Arc<Tables>,
    settings: EngineSettings,
}

impl Snapshotter {
    /// Create a snapshotter over `tables`.
    pub const fn new(tables: Arc<Tables>, settings: EngineSettings) -> Self {
        Self { tables, settings }
    }

    /// The settings values are decayed with.
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Render every tracked entry decayed to `now`.
    pub fn tick(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot {
            tick_time: now,
            entities: self.tables.entities.views(now, &self.settings),
            relationships: self.tables.relationships.views(now, &self.settings),
        }
    }

    /// Evict entries idle for longer than the grace period.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let report = SweepReport {
            entities: self.tables.entities.sweep(now, &self.settings),
            relationships: self.tables.relationships.sweep(now, &self.settings),
        };
        if report.total() > 0 {
            debug!(
                entities = report.entities,
                relationships = report.relationships,
                "evicted idle entries"
            );
        }
        report
    }
}
