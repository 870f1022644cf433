use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use tokio::time::Instant;

use crate::errors::DeliveryError;

/// Expiring "online" markers, one per user.
///
/// Presence is a hint, not a correctness signal: a client can die between
/// heartbeats, so readers must tolerate stale answers. Absence (or expiry)
/// of a marker means offline.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Write or refresh the marker with the given lifetime.
    async fn set_online(&self, user_id: i64, ttl: Duration) -> Result<(), DeliveryError>;

    /// Point-in-time read. Reflects the last successful write older than the
    /// read, or expiry.
    async fn is_online(&self, user_id: i64) -> Result<bool, DeliveryError>;

    /// Remove the marker immediately (graceful disconnect).
    async fn clear(&self, user_id: i64) -> Result<(), DeliveryError>;
}

fn presence_key(user_id: i64) -> String {
    format!("user:{}:online", user_id)
}

// ---------------------------------------------------------------------------
// Redis-backed store
// ---------------------------------------------------------------------------

/// Presence markers in Redis, expiry delegated to the server-side TTL.
pub struct RedisPresenceStore {
    pool: deadpool_redis::Pool,
}

impl RedisPresenceStore {
    pub fn connect(url: &str) -> Result<Self, DeliveryError> {
        let config = deadpool_redis::Config::from_url(url);
        let pool = config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| DeliveryError::Config(format!("redis pool: {}", e)))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, DeliveryError> {
        self.pool
            .get()
            .await
            .map_err(|e| DeliveryError::PresenceUnavailable(e.to_string()))
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn set_online(&self, user_id: i64, ttl: Duration) -> Result<(), DeliveryError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(presence_key(user_id), "1", ttl.as_secs().max(1))
            .await
            .map_err(|e| DeliveryError::PresenceUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn is_online(&self, user_id: i64) -> Result<bool, DeliveryError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(presence_key(user_id))
            .await
            .map_err(|e| DeliveryError::PresenceUnavailable(e.to_string()))?;
        Ok(value.is_some())
    }

    async fn clear(&self, user_id: i64) -> Result<(), DeliveryError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(presence_key(user_id))
            .await
            .map_err(|e| DeliveryError::PresenceUnavailable(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Single-process presence map with lazy expiry on read.
///
/// Used by the test suite and as a fallback when no Redis is deployed.
/// Uses the tokio clock so time-controlled tests see TTLs expire.
#[derive(Default)]
pub struct MemoryPresenceStore {
    entries: DashMap<i64, Instant>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set_online(&self, user_id: i64, ttl: Duration) -> Result<(), DeliveryError> {
        self.entries.insert(user_id, Instant::now() + ttl);
        Ok(())
    }

    async fn is_online(&self, user_id: i64) -> Result<bool, DeliveryError> {
        if let Some(entry) = self.entries.get(&user_id) {
            if *entry.value() > Instant::now() {
                return Ok(true);
            }
            drop(entry);
            // Expired: evict so the map does not grow with dead users
            self.entries
                .remove_if(&user_id, |_, expiry| *expiry <= Instant::now());
        }
        Ok(false)
    }

    async fn clear(&self, user_id: i64) -> Result<(), DeliveryError> {
        self.entries.remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_means_offline() {
        let store = MemoryPresenceStore::new();
        assert!(!store.is_online(1).await.unwrap());
    }

    #[tokio::test]
    async fn set_then_clear() {
        let store = MemoryPresenceStore::new();
        store.set_online(1, Duration::from_secs(30)).await.unwrap();
        assert!(store.is_online(1).await.unwrap());
        store.clear(1).await.unwrap();
        assert!(!store.is_online(1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn marker_expires_without_refresh() {
        let store = MemoryPresenceStore::new();
        store.set_online(1, Duration::from_secs(30)).await.unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(store.is_online(1).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.is_online(1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_extends_the_ttl() {
        let store = MemoryPresenceStore::new();
        store.set_online(1, Duration::from_secs(30)).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        store.set_online(1, Duration::from_secs(30)).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(store.is_online(1).await.unwrap());
    }
}
