//! Configuration loading and typed config structures for Log Metropolis.
//!
//! The canonical configuration lives in `metropolis-config.yaml` next to
//! the engine binary. This module defines strongly-typed structs that
//! mirror the YAML structure, a loader, and [`EngineSettings`]: the
//! validated form the aggregator and snapshotter are built from. Invalid
//! decay or tick parameters are rejected here, once, at startup.

use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::decay::HalfLife;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A parameter is outside its valid range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

impl ConfigError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `metropolis-config.yaml`. Every section and
/// field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetropolisConfig {
    /// Aggregation, decay, and eviction parameters.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Snapshot fan-out parameters.
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// Message queue and observer server addresses.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MetropolisConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values for infrastructure:
    /// - `NATS_URL` overrides `infrastructure.nats_url`
    /// - `METROPOLIS_SUBJECT` overrides `infrastructure.subject`
    /// - `OBSERVER_PORT` overrides `infrastructure.observer_port`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yml rejects an empty document; treat it as all defaults.
        if yaml.trim().is_empty() {
            let mut config = Self::default();
            config.infrastructure.apply_env_overrides();
            return Ok(config);
        }
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }

    /// Check every runtime parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        EngineSettings::from_config(&self.engine)?;
        if self.fanout.subscriber_buffer == 0 {
            return Err(ConfigError::invalid(
                "fanout.subscriber_buffer must be at least 1",
            ));
        }
        if self.fanout.delivery_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "fanout.delivery_timeout_ms must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Which events feed the error channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorChannelPolicy {
    /// `ERROR` kind or `ERROR` severity.
    #[default]
    KindOrSeverity,
    /// Only `ERROR` kind.
    KindOnly,
    /// Only `ERROR` severity.
    SeverityOnly,
}

/// Aggregation engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Real-time milliseconds between snapshots.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Half-life of the activity channel in milliseconds.
    #[serde(default = "default_activity_half_life_ms")]
    pub activity_half_life_ms: u64,

    /// Half-life of the error channel in milliseconds.
    #[serde(default = "default_error_half_life_ms")]
    pub error_half_life_ms: u64,

    /// How far into the future an event timestamp may be before it is
    /// clamped to the ingest time.
    #[serde(default = "default_clock_skew_tolerance_ms")]
    pub clock_skew_tolerance_ms: u64,

    /// Increment used when an event carries a non-positive metric.
    #[serde(default = "default_metric_value")]
    pub default_metric_value: f64,

    /// Which events feed the error channel.
    #[serde(default)]
    pub error_channel: ErrorChannelPolicy,

    /// How long an entry must stay idle before the sweep removes it.
    #[serde(default = "default_eviction_grace_ms")]
    pub eviction_grace_ms: u64,

    /// Decayed value at or below which an entry counts as idle.
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: f64,

    /// Run the eviction sweep every N ticks (0 disables eviction).
    #[serde(default = "default_sweep_every_ticks")]
    pub sweep_every_ticks: u64,

    /// Number of recent event ids remembered for duplicate suppression
    /// (0 disables it).
    #[serde(default)]
    pub dedup_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            activity_half_life_ms: default_activity_half_life_ms(),
            error_half_life_ms: default_error_half_life_ms(),
            clock_skew_tolerance_ms: default_clock_skew_tolerance_ms(),
            default_metric_value: default_metric_value(),
            error_channel: ErrorChannelPolicy::default(),
            eviction_grace_ms: default_eviction_grace_ms(),
            eviction_threshold: default_eviction_threshold(),
            sweep_every_ticks: default_sweep_every_ticks(),
            dedup_capacity: 0,
        }
    }
}

/// Snapshot fan-out configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FanoutConfig {
    /// Snapshots buffered per subscriber before new ones are skipped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Upper bound on one outbound frame write to an observer.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

impl FanoutConfig {
    /// The delivery timeout as a [`Duration`].
    pub const fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

/// Infrastructure addresses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// NATS messaging URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Subject raw log events are published on.
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Queue group shared by engine replicas.
    #[serde(default = "default_queue_group")]
    pub queue_group: String,

    /// Observer bind host.
    #[serde(default = "default_observer_host")]
    pub observer_host: String,

    /// Observer port.
    #[serde(default = "default_observer_port")]
    pub observer_port: u16,
}

impl InfrastructureConfig {
    /// Override infrastructure settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NATS_URL") {
            self.nats_url = val;
        }
        if let Ok(val) = std::env::var("METROPOLIS_SUBJECT") {
            self.subject = val;
        }
        if let Some(port) = std::env::var("OBSERVER_PORT")
            .ok()
            .and_then(|val| val.parse::<u16>().ok())
        {
            self.observer_port = port;
        }
    }
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            subject: default_subject(),
            queue_group: default_queue_group(),
            observer_host: default_observer_host(),
            observer_port: default_observer_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG`
    /// is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Validated engine parameters in the units the hot paths use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Snapshot cadence.
    pub tick_interval: Duration,
    /// Activity channel half-life.
    pub activity_half_life: HalfLife,
    /// Error channel half-life.
    pub error_half_life: HalfLife,
    /// Maximum accepted distance of an event timestamp into the future.
    pub clock_skew_tolerance: TimeDelta,
    /// Increment for non-positive metrics.
    pub default_metric_value: f64,
    /// Which events feed the error channel.
    pub error_channel: ErrorChannelPolicy,
    /// Idle time before eviction.
    pub eviction_grace: TimeDelta,
    /// Idle threshold.
    pub eviction_threshold: f64,
    /// Sweep cadence in ticks (0 disables eviction).
    pub sweep_every_ticks: u64,
    /// Duplicate suppression window size.
    pub dedup_capacity: usize,
}

impl EngineSettings {
    /// Validate an [`EngineConfig`] and convert it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero tick interval or
    /// half-life, a negative or non-finite default metric or eviction
    /// threshold, or a duration too large to represent.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        if config.tick_interval_ms == 0 {
            return Err(ConfigError::invalid("engine.tick_interval_ms must be at least 1"));
        }
        if !config.default_metric_value.is_finite() || config.default_metric_value < 0.0 {
            return Err(ConfigError::invalid(
                "engine.default_metric_value must be a finite, non-negative number",
            ));
        }
        if !config.eviction_threshold.is_finite() || config.eviction_threshold < 0.0 {
            return Err(ConfigError::invalid(
                "engine.eviction_threshold must be a finite, non-negative number",
            ));
        }

        Ok(Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            activity_half_life: HalfLife::from_millis(config.activity_half_life_ms)?,
            error_half_life: HalfLife::from_millis(config.error_half_life_ms)?,
            clock_skew_tolerance: delta_from_millis(
                "engine.clock_skew_tolerance_ms",
                config.clock_skew_tolerance_ms,
            )?,
            default_metric_value: config.default_metric_value,
            error_channel: config.error_channel,
            eviction_grace: delta_from_millis("engine.eviction_grace_ms", config.eviction_grace_ms)?,
            eviction_threshold: config.eviction_threshold,
            sweep_every_ticks: config.sweep_every_ticks,
            dedup_capacity: config.dedup_capacity,
        })
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(default_tick_interval_ms()),
            activity_half_life: HalfLife::DEFAULT_ACTIVITY,
            error_half_life: HalfLife::DEFAULT_ERROR,
            clock_skew_tolerance: TimeDelta::milliseconds(5_000),
            default_metric_value: default_metric_value(),
            error_channel: ErrorChannelPolicy::default(),
            eviction_grace: TimeDelta::milliseconds(60_000),
            eviction_threshold: default_eviction_threshold(),
            sweep_every_ticks: default_sweep_every_ticks(),
            dedup_capacity: 0,
        }
    }
}

fn delta_from_millis(field: &str, millis: u64) -> Result<TimeDelta, ConfigError> {
    TimeDelta::from_std(Duration::from_millis(millis))
        .map_err(|_err| ConfigError::invalid(format!("{field} is out of range")))
}

const fn default_tick_interval_ms() -> u64 {
    100
}

const fn default_activity_half_life_ms() -> u64 {
    5_000
}

const fn default_error_half_life_ms() -> u64 {
    20_000
}

const fn default_clock_skew_tolerance_ms() -> u64 {
    5_000
}

const fn default_metric_value() -> f64 {
    1.0
}

const fn default_eviction_grace_ms() -> u64 {
    60_000
}

const fn default_eviction_threshold() -> f64 {
    0.01
}

const fn default_sweep_every_ticks() -> u64 {
    50
}

const fn default_subscriber_buffer() -> usize {
    4
}

const fn default_delivery_timeout_ms() -> u64 {
    50
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_subject() -> String {
    "observability.logs.raw.v1".to_owned()
}

fn default_queue_group() -> String {
    "city-builder-v1".to_owned()
}

fn default_observer_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_observer_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_owned()
}
