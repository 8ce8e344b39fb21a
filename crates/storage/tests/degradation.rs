mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use storage::circuit_breaker::BreakerState;
use storage::observability::DEGRADED_WRITES_TOTAL;
use storage::{KvBackend, KvStore, StoreConfig};
use support::FlakyBackend;

fn store_over(backend: &FlakyBackend, config: StoreConfig) -> KvStore {
    KvStore::with_backend(config, Arc::new(backend.clone()))
}

#[tokio::test]
async fn failed_set_is_still_readable_in_process() {
    let backend = FlakyBackend::new();
    let store = store_over(&backend, StoreConfig::default());
    let before = DEGRADED_WRITES_TOTAL.get();

    backend.fail(true);
    store.set("profile:1", json!({"dailyGoal": "read"}), None).await;
    assert_eq!(store.get("profile:1").await, Some(json!({"dailyGoal": "read"})));
    assert_eq!(store.pending_writes(), 1);
    assert!(DEGRADED_WRITES_TOTAL.get() > before);

    // nothing reached the durable side
    assert!(backend.inner.is_empty());
}

#[tokio::test]
async fn failed_read_serves_last_cached_value() {
    let backend = FlakyBackend::new();
    let config = StoreConfig { cache_ttl_seconds: 0, ..StoreConfig::default() };
    let store = store_over(&backend, config);

    store.set("profile:2", json!({"name": "Grace"}), None).await;
    backend.fail(true);
    assert_eq!(store.get("profile:2").await, Some(json!({"name": "Grace"})));
    assert_eq!(store.get("profile:never-seen").await, None);
}

#[tokio::test]
async fn failed_delete_hides_key_until_replayed() {
    let backend = FlakyBackend::new();
    let store = store_over(&backend, StoreConfig::default());
    store.set("goals:1:2024-05-01", json!({"completed": false}), None).await;

    backend.fail(true);
    store.delete("goals:1:2024-05-01").await;
    assert_eq!(store.get("goals:1:2024-05-01").await, None);
    assert!(store.list_by_prefix("goals:").await.is_empty());

    backend.fail(false);
    let report = store.flush().await;
    assert_eq!(report.replayed, 1);
    assert_eq!(report.pending, 0);
    assert!(backend.inner.get("goals:1:2024-05-01").await.ok().flatten().is_none());
}

#[tokio::test]
async fn flush_replays_degraded_writes_after_recovery() {
    let backend = FlakyBackend::new();
    let store = store_over(&backend, StoreConfig::default());

    backend.fail(true);
    store.set("profile:3", json!({"a": 1}), None).await;
    store.merge_update("profile:3", json!({"b": 2}), None).await;

    let report = store.flush().await;
    assert_eq!(report.replayed, 0);
    assert_eq!(report.pending, 1);

    backend.fail(false);
    let report = store.flush().await;
    assert_eq!(report.replayed, 1);
    assert_eq!(store.pending_writes(), 0);

    let stored = backend.inner.get("profile:3").await.ok().flatten().map(|e| e.value);
    assert_eq!(stored, Some(json!({"a": 1, "b": 2})));
}

#[tokio::test]
async fn slow_backend_times_out_into_degrade_path() {
    let backend = FlakyBackend::new();
    let config = StoreConfig { backend_timeout_ms: 50, ..StoreConfig::default() };
    let store = store_over(&backend, config);

    backend.stall(true);
    let started = std::time::Instant::now();
    store.set("profile:4", json!({"x": true}), None).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(store.get("profile:4").await, Some(json!({"x": true})));
    assert_eq!(store.pending_writes(), 1);
}

#[tokio::test]
async fn breaker_opens_and_skips_backend() {
    let backend = FlakyBackend::new();
    let mut config = StoreConfig::default();
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.recovery_timeout_secs = 60;
    let store = store_over(&backend, config);

    backend.fail(true);
    store.set("profile:5", json!(1), None).await;
    store.set("profile:6", json!(2), None).await;
    assert_eq!(store.breaker_state().await, BreakerState::Open);

    let calls = backend.calls.load(Ordering::SeqCst);
    store.set("profile:7", json!(3), None).await;
    assert_eq!(store.get("profile:8").await, None);
    assert_eq!(backend.calls.load(Ordering::SeqCst), calls);
    assert_eq!(store.get("profile:7").await, Some(json!(3)));
}

#[tokio::test]
async fn list_falls_back_to_pending_writes() {
    let backend = FlakyBackend::new();
    let store = store_over(&backend, StoreConfig::default());

    backend.fail(true);
    store.set("goals:1:2024-05-01", json!({"goal": "a"}), None).await;
    store.set("profile:1", json!({}), None).await;
    let rows = store.list_by_prefix("goals:").await;
    assert_eq!(rows, vec![("goals:1:2024-05-01".to_string(), json!({"goal": "a"}))]);
}

#[tokio::test]
async fn initialize_never_fails() {
    let backend = FlakyBackend::new();
    backend.fail(true);
    let store = store_over(&backend, StoreConfig::default());
    assert!(store.initialize().await);
    assert!(store.initialize().await);
}

#[tokio::test]
async fn cancelled_half_open_call_does_not_wedge_breaker() {
    let backend = FlakyBackend::new();
    let mut config = StoreConfig::default();
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.recovery_timeout_secs = 1;
    let store = store_over(&backend, config);

    backend.fail(true);
    store.set("profile:1", json!(1), None).await;
    assert_eq!(store.breaker_state().await, BreakerState::Open);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    backend.stall(true);
    let abandoned = tokio::time::timeout(Duration::from_millis(50), store.set("profile:1", json!(2), None)).await;
    assert!(abandoned.is_err());
    backend.stall(false);
    backend.fail(false);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    store.set("profile:2", json!(3), None).await;
    assert_eq!(store.breaker_state().await, BreakerState::Closed);
    let durable = backend.inner.get("profile:2").await.ok().flatten().map(|e| e.value);
    assert_eq!(durable, Some(json!(3)));
}

#[tokio::test]
async fn degraded_merge_is_reapplied_to_durable_record() {
    let backend = FlakyBackend::new();
    let seeded = store_over(&backend, StoreConfig::default());
    seeded
        .set("profile:7", json!({"dailyGoal": "essay", "brainliftCompleted": false}), None)
        .await;

    // fresh instance: nothing cached, backend down
    let store = store_over(&backend, StoreConfig::default());
    backend.fail(true);
    let merged = store.merge_update("profile:7", json!({"brainliftCompleted": true}), None).await;
    assert_eq!(merged, json!({"brainliftCompleted": true}));
    store.merge_update("profile:7", json!({"streak": 3}), None).await;
    assert_eq!(store.get("profile:7").await, Some(json!({"brainliftCompleted": true, "streak": 3})));
    assert_eq!(store.pending_writes(), 1);

    backend.fail(false);
    let report = store.flush().await;
    assert_eq!(report.replayed, 1);
    assert_eq!(report.pending, 0);

    let expected = json!({"dailyGoal": "essay", "brainliftCompleted": true, "streak": 3});
    let durable = backend.inner.get("profile:7").await.ok().flatten().map(|e| e.value);
    assert_eq!(durable, Some(expected.clone()));
    assert_eq!(store.get("profile:7").await, Some(expected));
}

#[tokio::test]
async fn merge_over_known_record_survives_failed_write() {
    let backend = FlakyBackend::new();
    let store = store_over(&backend, StoreConfig::default());
    store.set("profile:8", json!({"dailyGoal": "run", "brainliftCompleted": false}), None).await;

    // base comes from the fresh cache, only the write fails
    backend.fail(true);
    store.merge_update("profile:8", json!({"brainliftCompleted": true}), None).await;

    backend.fail(false);
    store.flush().await;
    let durable = backend.inner.get("profile:8").await.ok().flatten().map(|e| e.value);
    assert_eq!(durable, Some(json!({"dailyGoal": "run", "brainliftCompleted": true})));
}
