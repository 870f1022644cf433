use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Frames queued for delivery over one live connection's writer task.
pub type OutboundSender = mpsc::Sender<String>;

/// A live, authenticated connection: the outbound frame queue plus the
/// cancellation token that bounds every task spawned for the connection
/// (reader, writer, heartbeat).
pub struct ConnectionHandle {
    pub conn_id: u64,
    pub user_id: i64,
    outbound: OutboundSender,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Cancel all tasks tied to this connection.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Push delivery over an already-open connection. The only surface the
/// delivery path sees of the gateway.
pub trait LivePush: Send + Sync {
    /// Queue a frame for the user's live connection. `false` when the user
    /// has no registered connection or its channel is closed/full; never an
    /// error, since the envelope is already durably persisted and the
    /// deferred path covers the miss.
    fn push_if_connected(&self, user_id: i64, frame: String) -> bool;
}

/// In-memory map from user id to their single live connection, scoped to
/// one gateway process.
///
/// At most one registration per user: a new connection supersedes the old
/// one, whose token is cancelled so its tasks (heartbeat included) stop as
/// one unit with its registration.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<i64, ConnectionHandle>,
    next_conn_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`, superseding (and cancelling) any
    /// previous one. Returns the id the caller must present on removal.
    pub fn register(
        &self,
        user_id: i64,
        outbound: OutboundSender,
        cancel: CancellationToken,
    ) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle {
            conn_id,
            user_id,
            outbound,
            cancel,
        };
        if let Some(old) = self.connections.insert(user_id, handle) {
            old.cancel();
        }
        conn_id
    }

    /// Remove the registration, but only if it is still the one identified
    /// by `conn_id`: a disconnect racing a superseding connect must not
    /// evict the newer registration. Returns whether an entry was removed.
    pub fn remove(&self, user_id: i64, conn_id: u64) -> bool {
        self.connections
            .remove_if(&user_id, |_, handle| handle.conn_id == conn_id)
            .is_some()
    }

    pub fn contains(&self, user_id: i64) -> bool {
        self.connections.contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl LivePush for ConnectionRegistry {
    fn push_if_connected(&self, user_id: i64, frame: String) -> bool {
        match self.connections.get(&user_id) {
            Some(handle) => handle.outbound.try_send(frame).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_parts() -> (OutboundSender, mpsc::Receiver<String>, CancellationToken) {
        let (tx, rx) = mpsc::channel(8);
        (tx, rx, CancellationToken::new())
    }

    #[tokio::test]
    async fn push_reaches_the_registered_connection() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx, cancel) = handle_parts();
        registry.register(2, tx, cancel);

        assert!(registry.push_if_connected(2, "Message from user 1: hi".into()));
        assert_eq!(rx.recv().await.unwrap(), "Message from user 1: hi");
    }

    #[tokio::test]
    async fn push_to_unknown_user_is_false_not_an_error() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.push_if_connected(99, "hello".into()));
    }

    #[tokio::test]
    async fn push_to_closed_channel_is_false() {
        let registry = ConnectionRegistry::new();
        let (tx, rx, cancel) = handle_parts();
        registry.register(2, tx, cancel);
        drop(rx);
        assert!(!registry.push_if_connected(2, "hello".into()));
    }

    #[tokio::test]
    async fn new_connection_supersedes_and_cancels_the_old() {
        let registry = ConnectionRegistry::new();
        let (old_tx, _old_rx, old_cancel) = handle_parts();
        let old_id = registry.register(2, old_tx, old_cancel.clone());

        let (new_tx, mut new_rx, new_cancel) = handle_parts();
        let new_id = registry.register(2, new_tx, new_cancel.clone());

        assert!(old_cancel.is_cancelled());
        assert!(!new_cancel.is_cancelled());
        assert_eq!(registry.len(), 1);

        // Late disconnect of the old connection must not evict the new one
        assert!(!registry.remove(2, old_id));
        assert!(registry.push_if_connected(2, "still here".into()));
        assert_eq!(new_rx.recv().await.unwrap(), "still here");

        assert!(registry.remove(2, new_id));
        assert!(registry.is_empty());
    }
}
