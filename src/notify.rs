use async_trait::async_trait;

use crate::clog_info;
use crate::errors::DeliveryError;

/// Deferred out-of-band delivery for recipients without a live connection.
///
/// Best-effort by contract: the message is already durably persisted when a
/// notification is dispatched, so failures are logged by the caller and
/// never retried here. Content formatting (names, subject lines) is the
/// implementation's concern; the core hands over ids and raw content only.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<(), DeliveryError>;
}

/// Writes the notification to the log instead of an external transport.
///
/// Stands in for the mail relay in development and single-node deploys;
/// production wires a real transport behind the same trait.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipient_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<(), DeliveryError> {
        clog_info!(
            "deferred notification for user {}: new message from user {}: {:?}",
            recipient_id,
            sender_id,
            content
        );
        Ok(())
    }
}
