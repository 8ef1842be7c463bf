//! Shared type definitions for the Log Metropolis health engine.
//!
//! This crate is the single source of truth for the values that cross
//! crate boundaries: the normalized [`Event`] handed to the aggregator,
//! and the immutable [`Snapshot`] pushed to observers every tick. Types
//! flow downstream to `TypeScript` via `ts-rs` for the city dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers (subscription handles)
//! - [`enums`] -- Event kind and severity
//! - [`structs`] -- Events and snapshot projections

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{EventKind, Severity};
pub use ids::SubscriptionId;
pub use structs::{EntityView, Event, RelationshipView, Snapshot, UNKNOWN_SERVICE};
