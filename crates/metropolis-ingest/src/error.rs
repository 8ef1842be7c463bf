//! Error types for ingestion.

/// Errors that can occur while receiving events.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Failed to connect to or subscribe on the NATS server.
    #[error("NATS error: {0}")]
    Nats(String),

    /// A message was not a JSON object.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
