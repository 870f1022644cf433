use std::sync::Arc;

use crate::channel::EventPublisher;
use crate::clog_debug;
use crate::envelope::{MessageEnvelope, SendRequest};
use crate::errors::DeliveryError;
use crate::metrics::DeliveryMetrics;

/// Accepts a submitted message, seals it into an envelope, and publishes it
/// to the durable channel before acknowledging the sender.
pub struct Ingest {
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<DeliveryMetrics>,
}

impl Ingest {
    pub fn new(publisher: Arc<dyn EventPublisher>, metrics: Arc<DeliveryMetrics>) -> Self {
        Self { publisher, metrics }
    }

    /// Publish the message and return its idempotency key.
    ///
    /// Returns only after the durable channel has acknowledged acceptance;
    /// a `PublishUnavailable` error means the sender saw no ack and must
    /// resubmit. The conversation pair keys the partition so one
    /// conversation's envelopes stay in publish order.
    pub async fn submit(&self, request: SendRequest) -> Result<String, DeliveryError> {
        let envelope = MessageEnvelope::new(request.from, request.to, request.text);
        let payload =
            serde_json::to_vec(&envelope).map_err(|e| DeliveryError::Decode(e.to_string()))?;

        match self
            .publisher
            .publish(&envelope.conversation_key(), &payload)
            .await
        {
            Ok(()) => {
                self.metrics.record_published();
                clog_debug!(
                    "published envelope {} ({} -> {})",
                    envelope.idempotency_key,
                    envelope.sender_id,
                    envelope.receiver_id
                );
                Ok(envelope.idempotency_key)
            }
            Err(err) => {
                self.metrics.record_publish_failure();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingPublisher, MemoryEventChannel};

    #[tokio::test]
    async fn submit_publishes_under_the_conversation_key() {
        let channel = Arc::new(MemoryEventChannel::new());
        let ingest = Ingest::new(channel.clone(), Arc::new(DeliveryMetrics::new()));

        let key = ingest
            .submit(SendRequest {
                from: 2,
                to: 1,
                text: "hello".into(),
            })
            .await
            .unwrap();

        let published = channel.published();
        assert_eq!(published.len(), 1);
        // Normalized pair: sender/receiver order does not matter
        assert_eq!(published[0].0, "1:2");

        let envelope: MessageEnvelope = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(envelope.idempotency_key, key);
        assert_eq!(envelope.sender_id, 2);
        assert_eq!(envelope.receiver_id, 1);
        assert_eq!(envelope.content, "hello");
    }

    #[tokio::test]
    async fn submit_fails_without_a_durable_ack() {
        let metrics = Arc::new(DeliveryMetrics::new());
        let ingest = Ingest::new(Arc::new(FailingPublisher), metrics.clone());

        let err = ingest
            .submit(SendRequest {
                from: 1,
                to: 2,
                text: "hi".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::PublishUnavailable(_)));
        assert_eq!(metrics.snapshot().publish_failures, 1);
        assert_eq!(metrics.snapshot().published, 0);
    }
}
