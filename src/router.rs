/// Where a freshly persisted envelope should go next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The receiver looks online: try the open connection.
    LivePush,
    /// No live connection expected: hand off for deferred notification.
    Notify,
}

/// Pure routing decision from the presence snapshot.
///
/// The processor consults this again after a failed live push (with
/// `receiver_online = false`), which is the only fallback in the routing
/// layer; a live push is never retried.
pub fn route(receiver_online: bool) -> Decision {
    if receiver_online {
        Decision::LivePush
    } else {
        Decision::Notify
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_routes_to_live_push() {
        assert_eq!(route(true), Decision::LivePush);
    }

    #[test]
    fn offline_routes_to_notification() {
        assert_eq!(route(false), Decision::Notify);
    }
}
