//! Short-lived read-through cache using [`moka`].
//!
//! Entries count as fresh for `ttl` after insertion. Older entries are kept
//! (bounded by capacity) so a failed backend read can still serve the last
//! value seen, unless the record itself has expired.

use std::time::{Duration, Instant};

use moka::future::Cache;
use tracing::debug;

use crate::record::{now_millis, Record, StoredEntry};

#[derive(Debug, Clone)]
struct Cached {
    value: Record,
    inserted: Instant,
    expires_at: Option<i64>,
}

impl Cached {
    fn record_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| now_millis() >= at)
    }
}

#[derive(Clone)]
pub struct ReadCache {
    inner: Cache<String, Cached>,
    ttl: Duration,
}

impl ReadCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self { inner: Cache::builder().max_capacity(capacity).build(), ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Value inserted less than `ttl` ago.
    pub async fn fresh(&self, key: &str) -> Option<Record> {
        let cached = self.live(key).await?;
        if cached.inserted.elapsed() < self.ttl {
            Some(cached.value)
        } else {
            None
        }
    }

    /// Last value seen for `key` regardless of cache age.
    pub async fn last_known(&self, key: &str) -> Option<Record> {
        self.live(key).await.map(|c| c.value)
    }

    async fn live(&self, key: &str) -> Option<Cached> {
        let cached = self.inner.get(key).await?;
        if cached.record_expired() {
            self.inner.invalidate(key).await;
            debug!(key, "cached record expired");
            return None;
        }
        Some(cached)
    }

    pub async fn put(&self, key: &str, entry: &StoredEntry) {
        let cached = Cached {
            value: entry.value.clone(),
            inserted: Instant::now(),
            expires_at: entry.expires_at(),
        };
        self.inner.insert(key.to_string(), cached).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fresh_then_stale_but_still_known() {
        let cache = ReadCache::new(100, Duration::from_millis(50));
        cache.put("profile:1", &StoredEntry::new(json!({"a": 1}), None)).await;
        assert_eq!(cache.fresh("profile:1").await, Some(json!({"a": 1})));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.fresh("profile:1").await, None);
        assert_eq!(cache.last_known("profile:1").await, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn expired_records_are_never_served() {
        let cache = ReadCache::new(100, Duration::from_secs(60));
        let old = StoredEntry { value: json!(1), inserted_at: now_millis() - 5_000, ttl_seconds: Some(1) };
        cache.put("goals:1", &old).await;
        assert_eq!(cache.fresh("goals:1").await, None);
        assert_eq!(cache.last_known("goals:1").await, None);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = ReadCache::new(100, Duration::from_secs(60));
        cache.put("k", &StoredEntry::new(json!(true), None)).await;
        cache.invalidate("k").await;
        assert_eq!(cache.last_known("k").await, None);
    }
}
