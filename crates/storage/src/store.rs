//! The store façade: one active backend, a read-through cache, and a single
//! degrade path shared by every backend.
//!
//! No operation returns an error. Reads fall back to the last cached value or
//! `None`; writes that cannot reach the backend are kept in the in-memory
//! overlay, logged, counted, and replayed by [`KvStore::flush`].
//!
//! Same-key operations from one instance are applied in call order. There is
//! no coordination between processes: two instances doing
//! [`KvStore::merge_update`] on one key race, and the last write wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use configs::{BackendKind, StoreConfig};
use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::backend::{self, KvBackend};
use crate::cache::ReadCache;
use crate::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::errors::{StoreError, StoreResult};
use crate::key::TtlPolicy;
use crate::observability::{
    BACKEND_ERRORS_TOTAL, BACKEND_LATENCY, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, DEGRADED_WRITES_TOTAL,
    EXPIRED_RECORDS_TOTAL, MALFORMED_RECORDS_TOTAL, STORE_OPERATIONS_TOTAL,
};
use crate::overlay::{DegradedOverlay, PendingOp};
use crate::record::{empty_record, now_millis, shallow_merge, Record, StoredEntry};

/// Outcome of one maintenance pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Pending operations that reached the backend.
    pub replayed: usize,
    /// Pending writes dropped because their TTL had already passed.
    pub dropped: usize,
    /// Expired entries purged by the backend.
    pub purged: usize,
    /// Operations still waiting after this pass.
    pub pending: usize,
}

/// Result of reading one key through overlay, cache and backend.
enum Lookup {
    Found(Record),
    Missing,
    /// Backend unreachable; carries the last cached value if any.
    Unreachable(Option<Record>),
}

/// Held for the duration of one operation on a key.
struct KeyGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // the map and this guard hold the only references: nobody is waiting
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

pub struct KvStore {
    config: StoreConfig,
    policy: TtlPolicy,
    backend: OnceCell<Arc<dyn KvBackend>>,
    cache: ReadCache,
    overlay: DegradedOverlay,
    breaker: CircuitBreaker,
    timeout: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KvStore {
    /// Build a store; the backend is chosen on [`KvStore::initialize`] or first use.
    pub fn new(config: StoreConfig) -> Self {
        Self::build(config, OnceCell::new())
    }

    /// Build a store around an already constructed backend.
    pub fn with_backend(config: StoreConfig, backend: Arc<dyn KvBackend>) -> Self {
        Self::build(config, OnceCell::new_with(Some(backend)))
    }

    fn build(config: StoreConfig, backend: OnceCell<Arc<dyn KvBackend>>) -> Self {
        Self {
            policy: TtlPolicy::from_config(&config),
            cache: ReadCache::new(config.cache_capacity, config.cache_ttl()),
            breaker: CircuitBreaker::from_config(&config),
            timeout: config.backend_timeout(),
            overlay: DegradedOverlay::new(),
            locks: DashMap::new(),
            backend,
            config,
        }
    }

    /// Select and validate the backend. Always ends with some backend ready,
    /// falling back to memory; repeated calls are no-ops.
    pub async fn initialize(&self) -> bool {
        let backend = self.active_backend().await;
        debug!(backend = %backend.kind(), "store initialized");
        true
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn backend_kind(&self) -> BackendKind {
        self.active_backend().await.kind()
    }

    pub async fn breaker_state(&self) -> BreakerState {
        self.breaker.state().await
    }

    /// Number of degraded operations not yet replayed.
    pub fn pending_writes(&self) -> usize {
        self.overlay.len()
    }

    async fn active_backend(&self) -> &Arc<dyn KvBackend> {
        self.backend
            .get_or_init(|| async { backend::connect(&self.config).await })
            .await
    }

    /// Run one backend call under the breaker and the timeout.
    async fn call<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        if !self.breaker.can_execute().await {
            BACKEND_ERRORS_TOTAL.with_label_values(&[op]).inc();
            return Err(StoreError::unavailable("circuit open"));
        }

        let timer = BACKEND_LATENCY.with_label_values(&[op]).start_timer();
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::unavailable(format!("{op} timed out after {:?}", self.timeout))),
        };
        timer.observe_duration();

        match &result {
            Err(e) if e.is_backend_failure() => {
                BACKEND_ERRORS_TOTAL.with_label_values(&[op]).inc();
                self.breaker.record_failure().await;
            }
            _ => self.breaker.record_success().await,
        }
        result
    }

    /// Serialize operations on one key; the entry is dropped once unused.
    async fn lock_key(&self, key: &str) -> KeyGuard<'_> {
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard { locks: &self.locks, key: key.to_string(), _guard: guard }
    }

    /// Read a record. `None` when missing, expired, malformed or unreachable
    /// with nothing cached.
    pub async fn get(&self, key: &str) -> Option<Record> {
        STORE_OPERATIONS_TOTAL.with_label_values(&["get"]).inc();
        let _key = self.lock_key(key).await;
        match self.load(key).await {
            Lookup::Found(value) => Some(value),
            Lookup::Missing => None,
            Lookup::Unreachable(stale) => stale,
        }
    }

    async fn load(&self, key: &str) -> Lookup {
        let backend = self.active_backend().await;

        if let Some(op) = self.overlay.lookup(key) {
            return match op.visible() {
                Some(entry) if !entry.is_expired() => Lookup::Found(entry.value.clone()),
                _ => Lookup::Missing,
            };
        }

        if let Some(value) = self.cache.fresh(key).await {
            CACHE_HITS_TOTAL.inc();
            debug!(key, "cache hit");
            return Lookup::Found(value);
        }
        CACHE_MISSES_TOTAL.inc();
        debug!(key, "cache miss");

        match self.call("get", backend.get(key)).await {
            Ok(Some(entry)) if entry.is_expired() => {
                self.expire(&**backend, key).await;
                Lookup::Missing
            }
            Ok(Some(entry)) => {
                self.cache.put(key, &entry).await;
                Lookup::Found(entry.value)
            }
            Ok(None) => {
                self.cache.invalidate(key).await;
                Lookup::Missing
            }
            Err(e @ StoreError::MalformedRecord { .. }) => {
                MALFORMED_RECORDS_TOTAL.inc();
                warn!(key, error = %e, "treating malformed record as missing");
                self.cache.invalidate(key).await;
                Lookup::Missing
            }
            Err(e) => {
                let fallback = self.cache.last_known(key).await;
                warn!(key, error = %e, served_stale = fallback.is_some(), "backend read failed");
                Lookup::Unreachable(fallback)
            }
        }
    }

    /// Write a whole record. `ttl_seconds` overrides the namespace default;
    /// `Some(0)` stores without expiry.
    pub async fn set(&self, key: &str, value: Record, ttl_seconds: Option<u64>) {
        STORE_OPERATIONS_TOTAL.with_label_values(&["set"]).inc();
        let _key = self.lock_key(key).await;
        self.store_entry(key, StoredEntry::new(value, self.policy.resolve(key, ttl_seconds))).await;
    }

    async fn store_entry(&self, key: &str, entry: StoredEntry) {
        let backend = self.active_backend().await;
        match self.call("set", backend.set(key, &entry)).await {
            Ok(()) => self.overlay.clear_key(key),
            Err(e) => {
                DEGRADED_WRITES_TOTAL.inc();
                warn!(key, error = %e, "backend write failed; value kept in memory until the next flush");
                self.overlay.record_write(key, entry.clone());
            }
        }
        self.cache.put(key, &entry).await;
    }

    /// Remove a record. Deleting a missing key is fine.
    pub async fn delete(&self, key: &str) {
        STORE_OPERATIONS_TOTAL.with_label_values(&["delete"]).inc();
        let _key = self.lock_key(key).await;
        let backend = self.active_backend().await;

        match self.call("delete", backend.delete(key)).await {
            Ok(()) => self.overlay.clear_key(key),
            Err(e) => {
                DEGRADED_WRITES_TOTAL.inc();
                warn!(key, error = %e, "backend delete failed; hiding key in memory until the next flush");
                self.overlay.record_delete(key);
            }
        }
        self.cache.invalidate(key).await;
    }

    /// Every live record whose key starts with `prefix`, in no particular order.
    ///
    /// File and memory backends scan every key, so this is O(total keys).
    pub async fn list_by_prefix(&self, prefix: &str) -> Vec<(String, Record)> {
        STORE_OPERATIONS_TOTAL.with_label_values(&["list"]).inc();
        let backend = self.active_backend().await;

        let mut rows: HashMap<String, StoredEntry> = match self.call("scan", backend.scan_prefix(prefix)).await {
            Ok(rows) => rows.into_iter().collect(),
            Err(e) => {
                warn!(prefix, error = %e, "backend scan failed; listing pending writes only");
                HashMap::new()
            }
        };
        self.overlay.apply_to(prefix, &mut rows);

        let now = now_millis();
        let mut live = Vec::with_capacity(rows.len());
        let mut expired = Vec::new();
        for (key, entry) in rows {
            if entry.is_expired_at(now) {
                expired.push(key);
            } else {
                live.push((key, entry.value));
            }
        }
        for key in expired {
            self.expire(&**backend, &key).await;
        }
        live
    }

    /// Read (or start from `{}`), shallow-merge `patch`, write back, return the result.
    /// Not atomic across processes.
    ///
    /// When the stored record cannot be read, only the patch is queued and it
    /// is merged into the backend's copy on the next flush; the returned value
    /// is merged over the last cached copy (or `{}`).
    pub async fn merge_update(&self, key: &str, patch: Record, ttl_seconds: Option<u64>) -> Record {
        STORE_OPERATIONS_TOTAL.with_label_values(&["merge"]).inc();
        let _key = self.lock_key(key).await;
        let ttl = self.policy.resolve(key, ttl_seconds);

        let pending_merge = matches!(self.overlay.lookup(key), Some(PendingOp::Merge { .. }));
        let (base, known) = match self.load(key).await {
            Lookup::Found(value) => (value, !pending_merge),
            Lookup::Missing => (empty_record(), !pending_merge),
            Lookup::Unreachable(stale) => (stale.unwrap_or_else(empty_record), false),
        };
        let merged = shallow_merge(base, patch.clone());

        if known {
            self.store_entry(key, StoredEntry::new(merged.clone(), ttl)).await;
        } else {
            DEGRADED_WRITES_TOTAL.inc();
            warn!(key, "stored record unreadable; merge kept in memory until the next flush");
            let view = StoredEntry::new(merged.clone(), ttl);
            self.cache.put(key, &view).await;
            self.overlay.record_merge(key, patch, view);
        }
        merged
    }

    /// Replay degraded operations, then let the backend purge expired entries
    /// and persist. Stops replaying at the first failure.
    pub async fn flush(&self) -> FlushReport {
        let backend = self.active_backend().await;
        let mut report = FlushReport::default();

        for (key, op) in self.overlay.snapshot() {
            let _key = self.lock_key(&key).await;
            if op.visible().is_some_and(StoredEntry::is_expired) {
                if self.overlay.settle(&key, &op) {
                    report.dropped += 1;
                }
                continue;
            }
            let result = match &op {
                PendingOp::Write(entry) => self.call("set", backend.set(&key, entry)).await,
                PendingOp::Delete { .. } => self.call("delete", backend.delete(&key)).await,
                PendingOp::Merge { patch, view } => self.replay_merge(&**backend, &key, patch, view).await,
            };
            match result {
                Ok(()) => {
                    if self.overlay.settle(&key, &op) {
                        report.replayed += 1;
                    }
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "replay failed; will retry on next flush");
                    break;
                }
            }
        }

        match self.call("flush", backend.flush()).await {
            Ok(purged) => {
                report.purged = purged;
                EXPIRED_RECORDS_TOTAL.inc_by(purged as u64);
            }
            Err(e) => warn!(backend = %backend.kind(), error = %e, "backend flush failed"),
        }

        report.pending = self.overlay.len();
        if report.replayed > 0 || report.dropped > 0 || report.pending > 0 {
            info!(
                replayed = report.replayed,
                dropped = report.dropped,
                purged = report.purged,
                pending = report.pending,
                "store flush"
            );
        }
        report
    }

    /// Apply a queued patch to the record the backend holds now.
    async fn replay_merge(
        &self,
        backend: &dyn KvBackend,
        key: &str,
        patch: &Record,
        view: &StoredEntry,
    ) -> StoreResult<()> {
        let base = match self.call("get", backend.get(key)).await {
            Ok(Some(entry)) if !entry.is_expired() => entry.value,
            Ok(_) => empty_record(),
            Err(e @ StoreError::MalformedRecord { .. }) => {
                MALFORMED_RECORDS_TOTAL.inc();
                warn!(key, error = %e, "replacing malformed record during merge replay");
                empty_record()
            }
            Err(e) => return Err(e),
        };
        let entry = StoredEntry::new(shallow_merge(base, patch.clone()), view.ttl_seconds);
        self.call("set", backend.set(key, &entry)).await?;
        self.cache.put(key, &entry).await;
        Ok(())
    }

    /// Clear the cache, the overlay and any process-local backend state.
    pub async fn reset(&self) {
        self.cache.invalidate_all();
        self.overlay.clear();
        if let Some(backend) = self.backend.get() {
            if let Err(e) = backend.reset_volatile().await {
                warn!(error = %e, "backend reset failed");
            }
        }
    }

    async fn expire(&self, backend: &dyn KvBackend, key: &str) {
        EXPIRED_RECORDS_TOTAL.inc();
        self.cache.invalidate(key).await;
        if backend.native_ttl() {
            return;
        }
        if let Err(e) = self.call("delete", backend.delete(key)).await {
            debug!(key, error = %e, "lazy expiry delete failed");
        }
    }
}
