//! Recoverable failure types for the aggregation engine.
//!
//! Only [`ConfigError`](crate::config::ConfigError) is ever surfaced to
//! the caller of the whole engine. The types here are contained at the
//! granularity they occur at: one event, or one subscriber.

use metropolis_types::SubscriptionId;

/// A malformed-but-usable event field that was replaced by a default.
///
/// Warnings are logged and counted, never returned to producers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventWarning {
    /// The event kind was not recognised; `TRAFFIC` was used.
    #[error("unknown event kind {0:?}, defaulted to TRAFFIC")]
    UnknownKind(String),

    /// The severity was not recognised; `INFO` was used.
    #[error("unknown severity {0:?}, defaulted to INFO")]
    UnknownSeverity(String),

    /// No source service was given; `"unknown"` was used.
    #[error("missing source service, defaulted to \"unknown\"")]
    MissingSource,

    /// The timestamp was absent or unreadable; the receive time was used.
    #[error("unreadable timestamp {0:?}, defaulted to receive time")]
    UnparseableTimestamp(String),

    /// The metric was NaN or infinite; zero was used.
    #[error("non-finite metric value, defaulted to 0")]
    NonFiniteMetric,
}

/// A snapshot could not be handed to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    /// The subscriber's receiving side has gone away.
    #[error("subscriber {0} closed its channel")]
    Closed(SubscriptionId),
}
