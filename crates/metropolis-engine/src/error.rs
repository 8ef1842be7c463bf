//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type for the failures that stop
//! the engine: bad configuration at startup, or an observer server that
//! cannot serve. A missing message queue is not one of them; the engine
//! keeps ticking and serving without ingestion.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: metropolis_core::ConfigError,
    },

    /// Observer API server failed to start or serve.
    #[error("observer error: {message}")]
    Observer {
        /// Description of the observer failure.
        message: String,
    },
}
