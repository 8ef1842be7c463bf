//! Tick loop runner.
//!
//! [`run_ticks`] drives the snapshotter at the configured cadence until
//! the shutdown token is cancelled. Each tick:
//!
//! 1. every `sweep_every_ticks` ticks, evicts idle entries
//! 2. renders a snapshot decayed to the current wall-clock time
//! 3. hands it to the [`TickCallback`]
//!
//! Missed ticks are skipped rather than bursted, so a stalled process
//! resumes at the normal cadence with one snapshot reflecting the whole
//! gap.

use std::sync::Arc;

use chrono::Utc;
use metropolis_types::Snapshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::snapshot::Snapshotter;

/// Result of a tick loop run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Ticks executed.
    pub total_ticks: u64,
    /// Entries removed by eviction sweeps.
    pub evicted: usize,
    /// The last snapshot rendered, if any tick ran.
    pub final_snapshot: Option<Arc<Snapshot>>,
}

/// Callback invoked after each tick.
///
/// Implementations publish the snapshot to subscribers, cache it for
/// request handlers, and so on. They run on the tick loop and must not
/// block.
pub trait TickCallback: Send {
    /// Called with the tick number (starting at 1) and its snapshot.
    fn on_tick(&mut self, tick: u64, snapshot: &Arc<Snapshot>);
}

/// A no-op tick callback for testing.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _tick: u64, _snapshot: &Arc<Snapshot>) {}
}

/// Run the tick loop until `shutdown` is cancelled.
///
/// The first tick fires immediately. A cancelled token is honoured
/// between ticks; a tick in progress always completes.
pub async fn run_ticks(
    snapshotter: &Snapshotter,
    callback: &mut dyn TickCallback,
    shutdown: CancellationToken,
) -> RunSummary {
    let settings = *snapshotter.settings();
    let mut interval = tokio::time::interval(settings.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut summary = RunSummary::default();

    info!(
        tick_interval = ?settings.tick_interval,
        sweep_every_ticks = settings.sweep_every_ticks,
        "Tick loop starting"
    );

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        summary.total_ticks = summary.total_ticks.saturating_add(1);
        let now = Utc::now();

        if settings.sweep_every_ticks > 0
            && summary.total_ticks.checked_rem(settings.sweep_every_ticks) == Some(0)
        {
            let report = snapshotter.sweep(now);
            summary.evicted = summary.evicted.saturating_add(report.total());
        }

        let snapshot = Arc::new(snapshotter.tick(now));
        callback.on_tick(summary.total_ticks, &snapshot);
        summary.final_snapshot = Some(snapshot);
    }

    summary
}

/// Log the end of a tick loop run.
pub fn log_run_end(summary: &RunSummary) {
    match summary.final_snapshot {
        Some(ref snapshot) => info!(
            total_ticks = summary.total_ticks,
            evicted = summary.evicted,
            entities = snapshot.entities.len(),
            relationships = snapshot.relationships.len(),
            "Tick loop stopped"
        ),
        None => warn!("Tick loop stopped with no ticks executed"),
    }
}
