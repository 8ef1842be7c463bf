//! The ingest loop: payloads in, aggregator updates out.
//!
//! Every payload is decoded, normalized, and folded into the aggregator.
//! A payload that is not a JSON object is logged and skipped; a payload
//! with unusable fields is ingested with defaults and its warnings are
//! logged. Nothing a producer sends can stop the loop.

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use metropolis_core::{Aggregator, EventWarning, IngestOutcome, RawEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::IngestError;

/// Running totals for one [`consume`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Payloads received.
    pub received: u64,
    /// Events folded into the tables.
    pub applied: u64,
    /// Events dropped as duplicates.
    pub duplicates: u64,
    /// Payloads that could not be decoded.
    pub rejected: u64,
    /// Field defaults applied across all events.
    pub warnings: u64,
}

/// Decode, normalize, and ingest one payload received at `now`.
///
/// Returns the ingest outcome and the warnings raised while normalizing.
///
/// # Errors
///
/// Returns [`IngestError::Decode`] if the payload is not a JSON object.
pub fn ingest_payload(
    aggregator: &Aggregator,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<(IngestOutcome, Vec<EventWarning>), IngestError> {
    let raw = RawEvent::decode(payload)?;
    let normalized = raw.normalize(now);
    for warning in &normalized.warnings {
        warn!(
            source_id = %normalized.event.source_id,
            warning = %warning,
            "event field defaulted"
        );
    }
    let outcome = aggregator.ingest_at(normalized.event, now);
    Ok((outcome, normalized.warnings))
}

/// Feed every payload from `stream` into `aggregator` until the stream
/// ends or `shutdown` is cancelled.
pub async fn consume<S>(mut stream: S, aggregator: &Aggregator, shutdown: CancellationToken) -> IngestStats
where
    S: Stream + Unpin,
    S::Item: AsRef<[u8]>,
{
    let mut stats = IngestStats::default();
    info!("event ingestion started");

    loop {
        let payload = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(payload) => payload,
                None => {
                    info!("event stream ended");
                    break;
                }
            },
        };

        stats.received = stats.received.saturating_add(1);
        match ingest_payload(aggregator, payload.as_ref(), Utc::now()) {
            Ok((outcome, warnings)) => {
                let count = u64::try_from(warnings.len()).unwrap_or(u64::MAX);
                stats.warnings = stats.warnings.saturating_add(count);
                match outcome {
                    IngestOutcome::Applied { .. } => {
                        stats.applied = stats.applied.saturating_add(1);
                    }
                    IngestOutcome::Duplicate => {
                        stats.duplicates = stats.duplicates.saturating_add(1);
                    }
                }
            }
            Err(e) => {
                stats.rejected = stats.rejected.saturating_add(1);
                warn!(
                    payload_size = payload.as_ref().len(),
                    error = %e,
                    "failed to decode event, skipping"
                );
            }
        }
    }

    debug!(?stats, "ingest loop finished");
    info!(
        received = stats.received,
        applied = stats.applied,
        rejected = stats.rejected,
        "event ingestion stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use metropolis_core::EngineSettings;

    use super::*;

    fn settings_with_dedup() -> EngineSettings {
        EngineSettings {
            dedup_capacity: 16,
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn bad_payloads_are_skipped_and_good_ones_applied() {
        let aggregator = Aggregator::new(EngineSettings::default());
        let payloads: Vec<&[u8]> = vec![
            br#"{"source_service": "api", "target_service": "db", "metric_value": 3}"#,
            b"not json at all",
            br#"{"source_service": "api", "event_type": "ERROR"}"#,
            br#"{"event_type": "MYSTERY"}"#,
        ];

        let stats = consume(stream::iter(payloads), &aggregator, CancellationToken::new()).await;

        assert_eq!(stats.received, 4);
        assert_eq!(stats.applied, 3);
        assert_eq!(stats.rejected, 1);
        // MissingSource + UnknownKind on the last payload.
        assert_eq!(stats.warnings, 2);

        let snap = aggregator.snapshotter().tick(Utc::now());
        assert!(snap.entity("api").is_some_and(|e| e.error_level > 0.0));
        assert!(snap.relationship("api", "db").is_some());
        assert!(snap.entity("unknown").is_some());
    }

    #[tokio::test]
    async fn duplicates_are_counted() {
        let aggregator = Aggregator::new(settings_with_dedup());
        let payload = br#"{"source_service": "api", "event_id": "abc"}"#.to_vec();
        let payloads = vec![payload.clone(), payload.clone(), payload];

        let stats = consume(stream::iter(payloads), &aggregator, CancellationToken::new()).await;

        assert_eq!(stats.applied, 1);
        assert_eq!(stats.duplicates, 2);
    }

    #[tokio::test]
    async fn cancelled_token_stops_a_pending_stream() {
        let aggregator = Aggregator::new(EngineSettings::default());
        let token = CancellationToken::new();
        token.cancel();

        let stats = consume(stream::pending::<Vec<u8>>(), &aggregator, token).await;

        assert_eq!(stats, IngestStats::default());
    }

    #[test]
    fn ingest_payload_reports_warnings() {
        let aggregator = Aggregator::new(EngineSettings::default());
        let result = ingest_payload(
            &aggregator,
            br#"{"source_service": "api", "severity": "LOUD"}"#,
            Utc::now(),
        );
        assert!(result.is_ok());
        let (outcome, warnings) = result.unwrap_or((IngestOutcome::Duplicate, Vec::new()));
        assert_eq!(outcome, IngestOutcome::Applied { clamped: false });
        assert_eq!(warnings, vec![EventWarning::UnknownSeverity(String::from("LOUD"))]);
    }

    #[test]
    fn ingest_payload_rejects_non_objects() {
        let aggregator = Aggregator::new(EngineSettings::default());
        let result = ingest_payload(&aggregator, b"42", Utc::now());
        assert!(matches!(result, Err(IngestError::Decode(_))));
        assert!(aggregator.tables().entities.is_empty());
    }
}
