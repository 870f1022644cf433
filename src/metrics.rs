//! Zero-cost metrics collection using atomic operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Pipeline-wide counters using lock-free atomics.
pub struct DeliveryMetrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    persisted: AtomicU64,
    duplicates: AtomicU64,
    delivered_live: AtomicU64,
    notified: AtomicU64,
    notify_failures: AtomicU64,
    start_time: Instant,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            delivered_live: AtomicU64::new(0),
            notified: AtomicU64::new(0),
            notify_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivered_live(&self) {
        self.delivered_live.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notified(&self) {
        self.notified.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notify_failure(&self) {
        self.notify_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            delivered_live: self.delivered_live.load(Ordering::Relaxed),
            notified: self.notified.load(Ordering::Relaxed),
            notify_failures: self.notify_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for DeliveryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of pipeline metrics at a point in time
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub persisted: u64,
    pub duplicates: u64,
    pub delivered_live: u64,
    pub notified: u64,
    pub notify_failures: u64,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    /// Format as human-readable string
    pub fn to_string_pretty(&self) -> String {
        format!(
            "Connections: {} opened, {} closed\n\
             Published: {} ok, {} failed\n\
             Persisted: {} new, {} duplicates\n\
             Delivered: {} live, {} notified ({} notify failures)\n\
             Uptime: {}s",
            self.connections_opened,
            self.connections_closed,
            self.published,
            self.publish_failures,
            self.persisted,
            self.duplicates,
            self.delivered_live,
            self.notified,
            self.notify_failures,
            self.uptime_seconds,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_into_snapshot() {
        let metrics = DeliveryMetrics::new();
        metrics.record_published();
        metrics.record_published();
        metrics.record_persisted();
        metrics.record_duplicate();
        metrics.record_delivered_live();

        let snap = metrics.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.persisted, 1);
        assert_eq!(snap.duplicates, 1);
        assert_eq!(snap.delivered_live, 1);
        assert_eq!(snap.notified, 0);
        assert!(snap.to_string_pretty().contains("Persisted: 1 new, 1 duplicates"));
    }
}
