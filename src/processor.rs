use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::channel::KafkaEventSource;
use crate::envelope::MessageEnvelope;
use crate::errors::DeliveryError;
use crate::metrics::DeliveryMetrics;
use crate::notify::Notifier;
use crate::presence::PresenceStore;
use crate::registry::LivePush;
use crate::router::{route, Decision};
use crate::store::MessageStore;
use crate::{clog_debug, clog_error, clog_info, clog_warn};

const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);
const PERSIST_RETRY_DELAY: Duration = Duration::from_secs(1);
const PERSIST_RETRY_MAX: Duration = Duration::from_secs(30);

/// Terminal state of one envelope's processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The idempotency key was already persisted; the whole envelope is a
    /// no-op (so a redelivery cannot notify twice).
    Duplicate,
    /// Pushed over the receiver's live connection.
    DeliveredLive,
    /// Handed to the deferred-notification path.
    NotificationDispatched,
}

/// Consumes envelopes from the durable channel, persists each one
/// effectively-once, and routes delivery.
pub struct Processor {
    store: Arc<dyn MessageStore>,
    presence: Arc<dyn PresenceStore>,
    push: Arc<dyn LivePush>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<DeliveryMetrics>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        presence: Arc<dyn PresenceStore>,
        push: Arc<dyn LivePush>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        Self {
            store,
            presence,
            push,
            notifier,
            metrics,
        }
    }

    /// The frame a receiver sees for a forwarded message.
    pub fn render_forward(envelope: &MessageEnvelope) -> String {
        format!(
            "Message from user {}: {}",
            envelope.sender_id, envelope.content
        )
    }

    /// Process one envelope to a terminal state.
    ///
    /// Only a persistence failure returns an error; everything downstream of
    /// a successful persist (presence, push, notification) is absorbed here,
    /// because the persisted row is the recovery point and a redelivery
    /// would dedupe against it.
    pub async fn handle_envelope(
        &self,
        envelope: &MessageEnvelope,
    ) -> Result<Outcome, DeliveryError> {
        let inserted = self.store.insert_if_absent(envelope).await?;
        if !inserted {
            self.metrics.record_duplicate();
            clog_debug!(
                "duplicate envelope {} skipped",
                envelope.idempotency_key
            );
            return Ok(Outcome::Duplicate);
        }
        self.metrics.record_persisted();

        let receiver_online = match self.presence.is_online(envelope.receiver_id).await {
            Ok(online) => online,
            Err(err) => {
                // Fail toward the deferred path rather than dropping delivery
                clog_warn!(
                    "presence read failed for user {}: {} (assuming offline)",
                    envelope.receiver_id,
                    err
                );
                false
            }
        };

        if route(receiver_online) == Decision::LivePush {
            let frame = Self::render_forward(envelope);
            if self.push.push_if_connected(envelope.receiver_id, frame) {
                self.metrics.record_delivered_live();
                return Ok(Outcome::DeliveredLive);
            }
            // Presence said online but the socket dropped in the interim;
            // re-route as offline.
            clog_debug!(
                "live push missed user {}, falling back",
                envelope.receiver_id
            );
        }

        // route(false) is always Notify: offline receivers and missed
        // pushes share the deferred path.
        self.dispatch_notification(envelope).await;
        Ok(Outcome::NotificationDispatched)
    }

    async fn dispatch_notification(&self, envelope: &MessageEnvelope) {
        match self
            .notifier
            .notify(envelope.receiver_id, envelope.sender_id, &envelope.content)
            .await
        {
            Ok(()) => self.metrics.record_notified(),
            Err(err) => {
                // Best-effort: the message is durably persisted either way
                self.metrics.record_notify_failure();
                clog_warn!(
                    "notification for envelope {} failed: {}",
                    envelope.idempotency_key,
                    err
                );
            }
        }
    }

    /// Consume from the durable channel until shutdown.
    ///
    /// Offsets move only after an envelope reaches a terminal state, so a
    /// crash redelivers in-flight envelopes. A persistence failure retries
    /// the same envelope in place (the partition must not advance past a
    /// message that is not yet in the store), while undecodable records are
    /// logged and skipped.
    pub async fn run(&self, source: &KafkaEventSource, shutdown: CancellationToken) {
        clog_info!("processor consuming from durable channel");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = source.recv() => match received {
                    Ok(message) => message,
                    Err(err) => {
                        clog_error!("consumer receive failed: {}", err);
                        tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                        continue;
                    }
                },
            };

            let envelope = match KafkaEventSource::decode(&message) {
                Ok(envelope) => envelope,
                Err(err) => {
                    clog_warn!("skipping undecodable record: {}", err);
                    source.store(&message);
                    continue;
                }
            };

            let mut backoff = PERSIST_RETRY_DELAY;
            loop {
                match self.handle_envelope(&envelope).await {
                    Ok(outcome) => {
                        clog_debug!(
                            "envelope {} -> {:?}",
                            envelope.idempotency_key,
                            outcome
                        );
                        source.store(&message);
                        break;
                    }
                    Err(err) => {
                        clog_error!(
                            "processing failed for envelope {}: {} (retrying in {:?})",
                            envelope.idempotency_key,
                            err,
                            backoff
                        );
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                source.commit();
                                return;
                            }
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(PERSIST_RETRY_MAX);
                    }
                }
            }
        }
        source.commit();
        clog_info!("processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::MemoryPresenceStore;
    use crate::registry::ConnectionRegistry;
    use crate::testing::{FailingPresence, FailingStore, FailingNotifier, MemoryMessageStore, RecordingNotifier};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        store: Arc<MemoryMessageStore>,
        presence: Arc<MemoryPresenceStore>,
        registry: Arc<ConnectionRegistry>,
        notifier: Arc<RecordingNotifier>,
        processor: Processor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryMessageStore::new());
        let presence = Arc::new(MemoryPresenceStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let processor = Processor::new(
            store.clone(),
            presence.clone(),
            registry.clone(),
            notifier.clone(),
            Arc::new(DeliveryMetrics::new()),
        );
        Fixture {
            store,
            presence,
            registry,
            notifier,
            processor,
        }
    }

    fn envelope(from: i64, to: i64, text: &str) -> MessageEnvelope {
        MessageEnvelope::new(from, to, text.to_string())
    }

    #[tokio::test]
    async fn online_receiver_gets_a_live_push_and_no_notification() {
        let f = fixture();
        let (tx, mut rx) = mpsc::channel(8);
        f.registry.register(2, tx, CancellationToken::new());
        f.presence
            .set_online(2, Duration::from_secs(30))
            .await
            .unwrap();

        let outcome = f
            .processor
            .handle_envelope(&envelope(1, 2, "hi"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::DeliveredLive);
        assert_eq!(rx.recv().await.unwrap(), "Message from user 1: hi");
        assert_eq!(f.store.rows().len(), 1);
        assert!(f.notifier.calls().is_empty());
    }

    #[tokio::test]
    async fn offline_receiver_gets_exactly_one_notification() {
        let f = fixture();

        let outcome = f
            .processor
            .handle_envelope(&envelope(1, 2, "hi"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::NotificationDispatched);
        let calls = f.notifier.calls();
        assert_eq!(calls, vec![(2, 1, "hi".to_string())]);

        let rows = f.store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sender_id, 1);
        assert_eq!(rows[0].receiver_id, 2);
        assert_eq!(rows[0].content, "hi");
    }

    #[tokio::test]
    async fn redelivery_persists_once_and_notifies_once() {
        let f = fixture();
        let envelope = envelope(1, 2, "hi");

        let first = f.processor.handle_envelope(&envelope).await.unwrap();
        assert_eq!(first, Outcome::NotificationDispatched);

        for _ in 0..3 {
            let again = f.processor.handle_envelope(&envelope).await.unwrap();
            assert_eq!(again, Outcome::Duplicate);
        }

        assert_eq!(f.store.rows().len(), 1);
        assert_eq!(f.notifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn presence_online_but_socket_gone_falls_back_to_notification() {
        let f = fixture();
        // Presence says online, but no registry entry: the race where the
        // socket dropped between the presence read and the push.
        f.presence
            .set_online(2, Duration::from_secs(30))
            .await
            .unwrap();

        let outcome = f
            .processor
            .handle_envelope(&envelope(1, 2, "hi"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::NotificationDispatched);
        assert_eq!(f.notifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn presence_failure_is_treated_as_offline() {
        let store = Arc::new(MemoryMessageStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let processor = Processor::new(
            store.clone(),
            Arc::new(FailingPresence),
            Arc::new(ConnectionRegistry::new()),
            notifier.clone(),
            Arc::new(DeliveryMetrics::new()),
        );

        let outcome = processor
            .handle_envelope(&envelope(1, 2, "hi"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::NotificationDispatched);
        assert_eq!(store.rows().len(), 1);
        assert_eq!(notifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn notifier_failure_is_absorbed_after_persistence() {
        let store = Arc::new(MemoryMessageStore::new());
        let metrics = Arc::new(DeliveryMetrics::new());
        let processor = Processor::new(
            store.clone(),
            Arc::new(MemoryPresenceStore::new()),
            Arc::new(ConnectionRegistry::new()),
            Arc::new(FailingNotifier),
            metrics.clone(),
        );

        let outcome = processor
            .handle_envelope(&envelope(1, 2, "hi"))
            .await
            .unwrap();

        // Terminal state reached even though the dispatcher failed
        assert_eq!(outcome, Outcome::NotificationDispatched);
        assert_eq!(store.rows().len(), 1);
        assert_eq!(metrics.snapshot().notify_failures, 1);
    }

    #[tokio::test]
    async fn persistence_failure_propagates_for_redelivery() {
        let processor = Processor::new(
            Arc::new(FailingStore),
            Arc::new(MemoryPresenceStore::new()),
            Arc::new(ConnectionRegistry::new()),
            Arc::new(RecordingNotifier::new()),
            Arc::new(DeliveryMetrics::new()),
        );

        let err = processor
            .handle_envelope(&envelope(1, 2, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::PersistenceUnavailable(_)));
    }

    #[tokio::test]
    async fn conversation_order_is_preserved_under_sequential_processing() {
        let f = fixture();
        let (tx, mut rx) = mpsc::channel(16);
        f.registry.register(2, tx, CancellationToken::new());
        f.presence
            .set_online(2, Duration::from_secs(30))
            .await
            .unwrap();

        // One partition's records arrive in publish order; the processor
        // handles them strictly sequentially.
        for text in ["one", "two", "three"] {
            f.processor
                .handle_envelope(&envelope(1, 2, text))
                .await
                .unwrap();
        }

        assert_eq!(rx.recv().await.unwrap(), "Message from user 1: one");
        assert_eq!(rx.recv().await.unwrap(), "Message from user 1: two");
        assert_eq!(rx.recv().await.unwrap(), "Message from user 1: three");
    }
}
