//! Event intake for the Log Metropolis health engine.
//!
//! Producers publish JSON log events over NATS. This crate subscribes to
//! them and feeds each one through normalization into the
//! [`Aggregator`](metropolis_core::Aggregator). The ingest loop is generic
//! over any payload stream, so tests and alternative transports drive it
//! without a broker.
//!
//! # Modules
//!
//! - [`consumer`] -- The decode, normalize, ingest loop.
//! - [`error`] -- Connection and decode errors.
//! - [`nats`] -- NATS connection and queue-group subscription.

pub mod consumer;
pub mod error;
pub mod nats;

pub use consumer::{IngestStats, consume, ingest_payload};
pub use error::IngestError;
pub use nats::{NatsSource, payloads};
