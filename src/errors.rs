use thiserror::Error;

/// Failure taxonomy for the delivery pipeline.
///
/// A duplicate idempotency key is deliberately absent: redelivering an
/// already-persisted envelope is a no-op, not an error, and surfaces as
/// `insert_if_absent` returning `false`.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Bad, missing, or expired token. Terminal for the connection/request.
    #[error("unauthenticated: {0}")]
    Unauthenticated(&'static str),

    /// Caller is not a party to the requested conversation.
    #[error("forbidden")]
    Forbidden,

    /// Durable channel did not accept the record. The caller must retry.
    #[error("durable channel unavailable: {0}")]
    PublishUnavailable(String),

    /// Message store unreachable or rejected a write/read.
    #[error("message store unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Presence store unreachable. Callers treat this as "assume offline".
    #[error("presence store unavailable: {0}")]
    PresenceUnavailable(String),

    /// Deferred-notification transport failed. Logged, never retried here.
    #[error("notification dispatch failed: {0}")]
    NotificationUnavailable(String),

    /// A record on the wire could not be decoded.
    #[error("malformed record: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DeliveryError {
    /// Whether the sender should resubmit (transient infrastructure fault).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PublishUnavailable(_)
                | Self::PersistenceUnavailable(_)
                | Self::PresenceUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(DeliveryError::PublishUnavailable("broker down".into()).is_retryable());
        assert!(!DeliveryError::Unauthenticated("expired").is_retryable());
        assert!(!DeliveryError::Forbidden.is_retryable());
    }
}
