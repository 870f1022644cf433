use serde::{Deserialize, Serialize};

use crate::utils::time_utils::now_ms;

/// The immutable unit of a chat message in transit through the durable
/// channel. Created once by ingest, never mutated afterwards.
///
/// Wire names are the compact event-body form (`key`/`from`/`to`/`text`/
/// `timestamp`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(rename = "key")]
    pub idempotency_key: String,
    #[serde(rename = "from")]
    pub sender_id: i64,
    #[serde(rename = "to")]
    pub receiver_id: i64,
    #[serde(rename = "text")]
    pub content: String,
    #[serde(rename = "timestamp")]
    pub created_at_millis: i64,
}

impl MessageEnvelope {
    /// Build an envelope for a fresh submission, assigning the creation
    /// timestamp and a unique idempotency key.
    ///
    /// The key embeds sender, receiver and timestamp for debuggability; the
    /// v7 uuid suffix is what makes it unique per logical send.
    pub fn new(sender_id: i64, receiver_id: i64, content: String) -> Self {
        let created_at_millis = now_ms();
        let idempotency_key = format!(
            "{}:{}:{}:{}",
            sender_id,
            receiver_id,
            created_at_millis,
            uuid::Uuid::now_v7()
        );
        Self {
            idempotency_key,
            sender_id,
            receiver_id,
            content,
            created_at_millis,
        }
    }

    /// Partition key for the durable channel: all envelopes of one
    /// conversation land on one partition, in publish order.
    pub fn conversation_key(&self) -> String {
        conversation_key(self.sender_id, self.receiver_id)
    }
}

/// A message submission as it arrives from an authenticated connection,
/// before an envelope is assigned.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub from: i64,
    pub to: i64,
    pub text: String,
}

/// Normalized, order-independent identifier of the two participants in a
/// 1:1 chat. `conversation_key(1, 2) == conversation_key(2, 1)`.
pub fn conversation_key(user_a: i64, user_b: i64) -> String {
    let (low, high) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("{}:{}", low, high)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_is_order_independent() {
        assert_eq!(conversation_key(1, 2), conversation_key(2, 1));
        assert_eq!(conversation_key(1, 2), "1:2");
        assert_eq!(conversation_key(7, 7), "7:7");
    }

    #[test]
    fn envelope_keys_are_unique_per_send() {
        let a = MessageEnvelope::new(1, 2, "hi".into());
        let b = MessageEnvelope::new(1, 2, "hi".into());
        assert_ne!(a.idempotency_key, b.idempotency_key);
        assert_eq!(a.conversation_key(), b.conversation_key());
    }

    #[test]
    fn wire_format_uses_compact_field_names() {
        let envelope = MessageEnvelope {
            idempotency_key: "k-1".into(),
            sender_id: 1,
            receiver_id: 2,
            content: "hi".into(),
            created_at_millis: 1_700_000_000_000,
        };
        let value: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["from"], 1);
        assert_eq!(value["to"], 2);
        assert_eq!(value["text"], "hi");
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
        assert_eq!(value["key"], "k-1");

        let back: MessageEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, envelope);
    }
}
