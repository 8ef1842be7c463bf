//! Enumeration types carried by health events and snapshots.
//!
//! Both enums serialize in the upper-case form producers put on the wire
//! (`"TRAFFIC"`, `"WARNING"`, ...). Parsing from raw producer strings is
//! lenient: case and surrounding whitespace are ignored, and anything
//! unrecognised yields `None` so the caller can substitute the neutral
//! default and record a warning.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// What kind of signal an event carries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum EventKind {
    /// Request traffic observed between services.
    #[default]
    Traffic,
    /// A failed operation.
    Error,
    /// A liveness ping with no traffic attached.
    Heartbeat,
}

impl EventKind {
    /// Parse a producer-supplied kind string, ignoring case.
    ///
    /// Returns `None` for anything that is not a known kind.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        [Self::Traffic, Self::Error, Self::Heartbeat]
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(raw))
    }

    /// The wire representation of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Traffic => "TRAFFIC",
            Self::Error => "ERROR",
            Self::Heartbeat => "HEARTBEAT",
        }
    }

    /// Whether a non-positive metric on this kind counts as one unit of
    /// activity rather than zero.
    pub const fn defaults_to_unit_activity(self) -> bool {
        matches!(self, Self::Traffic | Self::Heartbeat)
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to an event by its producer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum Severity {
    /// Informational.
    #[default]
    Info,
    /// Degraded but working.
    Warning,
    /// Failing.
    Error,
}

impl Severity {
    /// Parse a producer-supplied severity string, ignoring case.
    ///
    /// `WARN` is accepted as a synonym for `WARNING`.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("WARN") {
            return Some(Self::Warning);
        }
        [Self::Info, Self::Warning, Self::Error]
            .into_iter()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(raw))
    }

    /// The wire representation of this severity.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
