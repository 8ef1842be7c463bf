//! NATS subscription for raw log events.
//!
//! Log agents publish one JSON object per message on a single subject
//! (`observability.logs.raw.v1` by default). Engine instances join a queue
//! group so that, when several run side by side, each message is handled
//! by exactly one of them.

use futures::{Stream, StreamExt};
use tracing::{debug, info};

use crate::error::IngestError;

/// NATS client wrapper for event intake.
pub struct NatsSource {
    client: async_nats::Client,
}

impl NatsSource {
    /// Connect to a NATS server.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Nats`] if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, IngestError> {
        info!(url = url, "connecting to NATS server");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| IngestError::Nats(format!("failed to connect to {url}: {e}")))?;
        info!("NATS connection established");
        Ok(Self { client })
    }

    /// Subscribe to `subject`, joining `queue_group` unless it is empty.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Nats`] if the subscription fails.
    pub async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<async_nats::Subscriber, IngestError> {
        debug!(subject = subject, queue_group = queue_group, "subscribing to events");
        let subscriber = if queue_group.is_empty() {
            self.client.subscribe(subject.to_owned()).await
        } else {
            self.client
                .queue_subscribe(subject.to_owned(), queue_group.to_owned())
                .await
        }
        .map_err(|e| IngestError::Nats(format!("failed to subscribe to {subject}: {e}")))?;
        info!(subject = subject, queue_group = queue_group, "subscribed to events");
        Ok(subscriber)
    }
}

/// The payload of each message on `subscriber`.
pub fn payloads(
    subscriber: async_nats::Subscriber,
) -> impl Stream<Item = impl AsRef<[u8]>> + Unpin + Send {
    subscriber.map(|message| message.payload)
}
