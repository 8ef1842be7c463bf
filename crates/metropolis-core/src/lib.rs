//! State aggregation engine for Log Metropolis.
//!
//! This crate turns a high-rate stream of service events into a periodic
//! series of immutable health snapshots:
//!
//! - ingest is any number of concurrent [`Aggregator::ingest`] calls, each
//!   touching only the records it addresses
//! - every tick, [`Snapshotter::tick`] decays every record to the tick
//!   time and renders a sorted [`Snapshot`](metropolis_types::Snapshot)
//! - [`Fanout::publish`] offers that snapshot to every subscriber without
//!   waiting on any of them
//!
//! # Modules
//!
//! - [`aggregator`] -- Event folding, clock-skew clamping, duplicate window.
//! - [`config`] -- Configuration loading from `metropolis-config.yaml` and
//!   the validated [`EngineSettings`].
//! - [`decay`] -- Half-life exponential decay.
//! - [`error`] -- Per-event warnings and per-subscriber delivery failures.
//! - [`fanout`] -- Subscription registry and bounded, non-blocking delivery.
//! - [`normalize`] -- Lenient decoding of producer messages.
//! - [`runner`] -- The tick loop and [`TickCallback`].
//! - [`snapshot`] -- Snapshot rendering and the eviction sweep.
//! - [`table`] -- Sharded entity and relationship tables.

pub mod aggregator;
pub mod config;
pub mod decay;
pub mod error;
pub mod fanout;
pub mod normalize;
pub mod runner;
pub mod snapshot;
pub mod table;

pub use aggregator::{Aggregator, AggregatorStats, IngestOutcome};
pub use config::{ConfigError, EngineSettings, ErrorChannelPolicy, MetropolisConfig};
pub use decay::{HalfLife, decayed_value};
pub use error::{DeliveryFailure, EventWarning};
pub use fanout::{Fanout, PublishReport, Subscription};
pub use normalize::{Normalized, RawEvent};
pub use runner::{NoOpCallback, RunSummary, TickCallback, run_ticks};
pub use snapshot::{Snapshotter, SweepReport};
