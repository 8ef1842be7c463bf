//! Exponential decay of activity and error volumes.
//!
//! Every stored quantity is a pair of `(value, anchor time)`. Its value at
//! any later instant is `value * 0.5^(elapsed / half_life)`, computed on
//! demand; nothing is decayed in the background. Values that fall below
//! [`DECAY_EPSILON`] snap to exactly zero so idle entries converge instead
//! of carrying vanishing residues forever.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::ConfigError;

/// Decayed values at or below this are reported as zero.
pub const DECAY_EPSILON: f64 = 1e-9;

/// A strictly positive, finite half-life.
///
/// Construction is the only place a half-life is checked, so
/// [`decayed_value`] itself cannot fail.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct HalfLife {
    secs: f64,
}

impl HalfLife {
    /// Default half-life of the activity channel (5 s).
    pub const DEFAULT_ACTIVITY: Self = Self { secs: 5.0 };

    /// Default half-life of the error channel (20 s).
    pub const DEFAULT_ERROR: Self = Self { secs: 20.0 };

    /// Build a half-life from whole milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `millis` is zero.
    pub fn from_millis(millis: u64) -> Result<Self, ConfigError> {
        Self::from_secs_f64(Duration::from_millis(millis).as_secs_f64())
    }

    /// Build a half-life from fractional seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `secs` is zero, negative, or
    /// not finite.
    pub fn from_secs_f64(secs: f64) -> Result<Self, ConfigError> {
        if secs.is_finite() && secs > 0.0 {
            Ok(Self { secs })
        } else {
            Err(ConfigError::Invalid {
                reason: format!("half-life must be positive and finite, got {secs}s"),
            })
        }
    }

    /// The half-life in seconds.
    pub const fn as_secs_f64(self) -> f64 {
        self.secs
    }
}

/// Value of `last_value` at `now`, given it was last set at `last_updated`.
///
/// A `now` earlier than `last_updated` (clock skew) is treated as zero
/// elapsed time: values never grow by decaying backwards.
pub fn decayed_value(
    last_value: f64,
    last_updated: DateTime<Utc>,
    now: DateTime<Utc>,
    half_life: HalfLife,
) -> f64 {
    let elapsed = now
        .signed_duration_since(last_updated)
        .to_std()
        .map_or(0.0, |d| d.as_secs_f64());
    decay_by(last_value, elapsed, half_life)
}

/// Decay `value` by `elapsed_secs` (negative treated as zero).
pub fn decay_by(value: f64, elapsed_secs: f64, half_life: HalfLife) -> f64 {
    if !value.is_finite() || value <= DECAY_EPSILON {
        return 0.0;
    }
    let elapsed = elapsed_secs.max(0.0);
    let decayed = value * 0.5_f64.powf(elapsed / half_life.secs);
    if decayed <= DECAY_EPSILON { 0.0 } else { decayed }
}
