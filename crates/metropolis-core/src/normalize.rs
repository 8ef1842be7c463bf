//! Defensive decoding of producer messages into [`Event`]s.
//!
//! Producers are untrusted and their schema drifts, so [`RawEvent`]
//! accepts every field as optional and in several spellings (the log
//! agent's `source_service`/`event_type`, the older `service_name`, and
//! the engine's own `source_id`/`kind`). [`RawEvent::normalize`] never
//! fails: anything unusable is replaced by a neutral default and reported
//! as an [`EventWarning`].

use chrono::{DateTime, NaiveDateTime, Utc};
use metropolis_types::{Event, EventKind, Severity, UNKNOWN_SERVICE};
use serde::Deserialize;

use crate::error::EventWarning;

/// Epoch values above this are taken to be milliseconds, not seconds.
const EPOCH_MILLIS_CUTOFF: f64 = 100_000_000_000.0;

/// A timestamp as producers send it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Unix epoch seconds (or milliseconds, if implausibly large).
    Epoch(f64),
    /// RFC 3339 or a naive ISO 8601 date-time taken as UTC.
    Text(String),
}

/// A producer message with every field optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawEvent {
    /// Emitting service.
    #[serde(default, alias = "service_name", alias = "source_id")]
    pub source_service: Option<String>,
    /// Peer service.
    #[serde(default, alias = "target_id")]
    pub target_service: Option<String>,
    /// Observation time.
    #[serde(default, alias = "observed_at")]
    pub timestamp: Option<RawTimestamp>,
    /// Number or numeric string.
    #[serde(default)]
    pub metric_value: Option<serde_json::Value>,
    /// Kind name.
    #[serde(default, alias = "kind")]
    pub event_type: Option<String>,
    /// Severity name.
    #[serde(default)]
    pub severity: Option<String>,
    /// Opaque payload; non-string JSON is kept in its serialized form.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Duplicate-suppression key.
    #[serde(default, alias = "id")]
    pub event_id: Option<String>,
}

/// A normalized event and the defaults applied to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// The usable event.
    pub event: Event,
    /// Every field that had to be defaulted.
    pub warnings: Vec<EventWarning>,
}

impl RawEvent {
    /// Decode one JSON message.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the bytes are not a JSON object of the
    /// expected shape.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Turn this message into an [`Event`], defaulting what is unusable.
    ///
    /// `received_at` stands in for a missing or unreadable timestamp.
    pub fn normalize(self, received_at: DateTime<Utc>) -> Normalized {
        let mut warnings = Vec::new();

        let source_id = match self.source_service.as_deref().map(str::trim) {
            Some(source) if !source.is_empty() => source.to_owned(),
            _ => {
                warnings.push(EventWarning::MissingSource);
                UNKNOWN_SERVICE.to_owned()
            }
        };

        let kind = match self.event_type.as_deref() {
            None => EventKind::default(),
            Some(raw) => EventKind::parse_lenient(raw).unwrap_or_else(|| {
                warnings.push(EventWarning::UnknownKind(raw.to_owned()));
                EventKind::default()
            }),
        };

        let severity = match self.severity.as_deref() {
            None if kind == EventKind::Error => Severity::Error,
            None => Severity::default(),
            Some(raw) => Severity::parse_lenient(raw).unwrap_or_else(|| {
                warnings.push(EventWarning::UnknownSeverity(raw.to_owned()));
                Severity::default()
            }),
        };

        let observed_at = match self.timestamp {
            None => received_at,
            Some(raw) => parse_timestamp(&raw).unwrap_or_else(|| {
                warnings.push(EventWarning::UnparseableTimestamp(describe(&raw)));
                received_at
            }),
        };

        let metric_value = match self.metric_value.as_ref().and_then(metric_from_json) {
            Some(value) if value.is_finite() => value,
            Some(_) => {
                warnings.push(EventWarning::NonFiniteMetric);
                0.0
            }
            None => 0.0,
        };

        let payload = match self.payload {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(text)) => text,
            Some(other) => other.to_string(),
        };

        Normalized {
            event: Event {
                source_id,
                target_id: self.target_service,
                observed_at,
                metric_value,
                kind,
                severity,
                payload,
                event_id: self.event_id,
            },
            warnings,
        }
    }
}

fn metric_from_json(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_timestamp(raw: &RawTimestamp) -> Option<DateTime<Utc>> {
    match raw {
        RawTimestamp::Epoch(value) => from_epoch(*value),
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(naive.and_utc());
            }
            text.parse::<f64>().ok().and_then(from_epoch)
        }
    }
}

/// Convert epoch seconds (or milliseconds) to a UTC instant.
#[allow(clippy::cast_possible_truncation)]
fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > EPOCH_MILLIS_CUTOFF {
        value
    } else {
        value * 1_000.0
    };
    // Anything past year 9999 is rejected by chrono below; the range check
    // keeps the cast itself in bounds.
    if millis >= 253_402_300_800_000.0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis.round() as i64)
}

fn describe(raw: &RawTimestamp) -> String {
    match raw {
        RawTimestamp::Epoch(value) => value.to_string(),
        RawTimestamp::Text(text) => text.clone(),
    }
}
