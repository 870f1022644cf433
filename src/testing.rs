//! In-memory doubles for the external collaborators, shared by the unit
//! tests. Each one follows the corresponding trait seam exactly; the fake
//! channel records a publish before acking so the "no false-positive ack"
//! property is observable.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use crate::channel::EventPublisher;
use crate::envelope::MessageEnvelope;
use crate::errors::DeliveryError;
use crate::notify::Notifier;
use crate::presence::PresenceStore;
use crate::store::{MessageStore, StoredMessage};

// ---------------------------------------------------------------------------
// Durable channel
// ---------------------------------------------------------------------------

/// Records `(partition_key, payload)` pairs in publish order.
#[derive(Default)]
pub struct MemoryEventChannel {
    records: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryEventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.records.lock().clone()
    }

    /// Decode every published payload back into an envelope, in order.
    pub fn envelopes(&self) -> Vec<MessageEnvelope> {
        self.records
            .lock()
            .iter()
            .map(|(_, payload)| serde_json::from_slice(payload).expect("stored envelope decodes"))
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventChannel {
    async fn publish(&self, partition_key: &str, payload: &[u8]) -> Result<(), DeliveryError> {
        // Durably recorded before the ack returns
        self.records
            .lock()
            .push((partition_key.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// A channel whose broker is unreachable.
pub struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(&self, _partition_key: &str, _payload: &[u8]) -> Result<(), DeliveryError> {
        Err(DeliveryError::PublishUnavailable("broker unreachable".into()))
    }
}

// ---------------------------------------------------------------------------
// Message store
// ---------------------------------------------------------------------------

/// Keyed rows behind the `MessageStore` contract.
#[derive(Default)]
pub struct MemoryMessageStore {
    rows: Mutex<Vec<(String, StoredMessage)>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<StoredMessage> {
        self.rows.lock().iter().map(|(_, row)| row.clone()).collect()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert_if_absent(&self, envelope: &MessageEnvelope) -> Result<bool, DeliveryError> {
        let mut rows = self.rows.lock();
        if rows.iter().any(|(key, _)| key == &envelope.idempotency_key) {
            return Ok(false);
        }
        rows.push((
            envelope.idempotency_key.clone(),
            StoredMessage {
                sender_id: envelope.sender_id,
                receiver_id: envelope.receiver_id,
                content: envelope.content.clone(),
                created_at: Utc
                    .timestamp_millis_opt(envelope.created_at_millis)
                    .single()
                    .unwrap_or_else(Utc::now),
            },
        ));
        Ok(true)
    }

    async fn query_conversation(
        &self,
        user_a: i64,
        user_b: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredMessage>, DeliveryError> {
        let mut matched: Vec<StoredMessage> = self
            .rows
            .lock()
            .iter()
            .map(|(_, row)| row.clone())
            .filter(|row| {
                (row.sender_id == user_a && row.receiver_id == user_b)
                    || (row.sender_id == user_b && row.receiver_id == user_a)
            })
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

/// A store whose backend is down.
pub struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn insert_if_absent(&self, _envelope: &MessageEnvelope) -> Result<bool, DeliveryError> {
        Err(DeliveryError::PersistenceUnavailable("database down".into()))
    }

    async fn query_conversation(
        &self,
        _user_a: i64,
        _user_b: i64,
        _limit: i64,
        _offset: i64,
    ) -> Result<Vec<StoredMessage>, DeliveryError> {
        Err(DeliveryError::PersistenceUnavailable("database down".into()))
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// A presence store whose backend is unreachable.
pub struct FailingPresence;

#[async_trait]
impl PresenceStore for FailingPresence {
    async fn set_online(
        &self,
        _user_id: i64,
        _ttl: std::time::Duration,
    ) -> Result<(), DeliveryError> {
        Err(DeliveryError::PresenceUnavailable("redis down".into()))
    }

    async fn is_online(&self, _user_id: i64) -> Result<bool, DeliveryError> {
        Err(DeliveryError::PresenceUnavailable("redis down".into()))
    }

    async fn clear(&self, _user_id: i64) -> Result<(), DeliveryError> {
        Err(DeliveryError::PresenceUnavailable("redis down".into()))
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Records every dispatched notification.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(i64, i64, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(i64, i64, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipient_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<(), DeliveryError> {
        self.calls
            .lock()
            .push((recipient_id, sender_id, content.to_string()));
        Ok(())
    }
}

/// A notifier whose transport is down.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(
        &self,
        _recipient_id: i64,
        _sender_id: i64,
        _content: &str,
    ) -> Result<(), DeliveryError> {
        Err(DeliveryError::NotificationUnavailable("smtp down".into()))
    }
}
