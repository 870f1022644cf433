use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;

use crate::clog_warn;
use crate::envelope::MessageEnvelope;
use crate::errors::DeliveryError;

/// Ordered, replicated, at-least-once append log.
///
/// `publish` resolves only once the channel has durably accepted the record
/// (the broker delivery report), never on local buffering. That is the
/// boundary of the sender-visible ack.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, partition_key: &str, payload: &[u8]) -> Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// Kafka publisher
// ---------------------------------------------------------------------------

pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
    publish_timeout: Duration,
}

impl KafkaEventPublisher {
    pub fn connect(
        brokers: &str,
        topic: &str,
        publish_timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            // Full-ISR acknowledgment: a positive delivery report means the
            // record survives broker restarts.
            .set("acks", "all")
            .set(
                "message.timeout.ms",
                publish_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| DeliveryError::Config(format!("kafka producer: {}", e)))?;
        Ok(Self {
            producer,
            topic: topic.to_string(),
            publish_timeout,
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, partition_key: &str, payload: &[u8]) -> Result<(), DeliveryError> {
        let record = FutureRecord::to(&self.topic)
            .key(partition_key)
            .payload(payload);
        match self.producer.send(record, self.publish_timeout).await {
            Ok(_) => Ok(()),
            Err((err, _unsent)) => Err(DeliveryError::PublishUnavailable(err.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Kafka consumer
// ---------------------------------------------------------------------------

/// Consumer-group member over the chat topic.
///
/// Offsets are stored only after an envelope has been fully processed
/// (`enable.auto.offset.store=false`), so a crash mid-envelope redelivers
/// it: at-least-once, with the processor's idempotent persistence
/// absorbing the repeats. Partition assignment within the group keeps
/// per-conversation ordering while instances scale out.
pub struct KafkaEventSource {
    consumer: StreamConsumer,
}

impl KafkaEventSource {
    pub fn connect(
        brokers: &str,
        group_id: &str,
        topic: &str,
        offset_reset: &str,
    ) -> Result<Self, DeliveryError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            // Store offsets only after we've processed the message.
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", offset_reset)
            .create()
            .map_err(|e| DeliveryError::Config(format!("kafka consumer: {}", e)))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| DeliveryError::Config(format!("kafka subscribe: {}", e)))?;
        Ok(Self { consumer })
    }

    /// Next raw record from the assigned partitions. Blocks until one
    /// arrives or the underlying consumer errors.
    pub async fn recv(&self) -> Result<BorrowedMessage<'_>, DeliveryError> {
        self.consumer
            .recv()
            .await
            .map_err(|e| DeliveryError::PublishUnavailable(e.to_string()))
    }

    /// Decode a record body into an envelope.
    pub fn decode(message: &BorrowedMessage<'_>) -> Result<MessageEnvelope, DeliveryError> {
        let payload = message
            .payload()
            .ok_or_else(|| DeliveryError::Decode("empty record payload".into()))?;
        serde_json::from_slice(payload).map_err(|e| DeliveryError::Decode(e.to_string()))
    }

    /// Mark a record processed. Stores offset+1 for the next auto-commit;
    /// a store failure is logged, the record will simply redeliver.
    pub fn store(&self, message: &BorrowedMessage<'_>) {
        if let Err(err) = self.consumer.store_offset_from_message(message) {
            clog_warn!("failed to store consumer offset: {}", err);
        }
    }

    /// Flush stored offsets synchronously. Called once on shutdown.
    pub fn commit(&self) {
        if let Err(err) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            clog_warn!("consumer commit on shutdown failed: {}", err);
        }
    }
}
