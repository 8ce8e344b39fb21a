use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use storage::{BackendKind, KvBackend, KvStore, MemoryBackend, StoreConfig, StoreResult, StoredEntry};

/// Memory backend that takes a while to write one particular value.
#[derive(Clone)]
struct SlowWrites {
    inner: MemoryBackend,
    slow_value: Value,
}

#[async_trait]
impl KvBackend for SlowWrites {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, entry: &StoredEntry) -> StoreResult<()> {
        if entry.value == self.slow_value {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        self.inner.set(key, entry).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, StoredEntry)>> {
        self.inner.scan_prefix(prefix).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_key_writes_apply_in_call_order() -> anyhow::Result<()> {
    let backend = SlowWrites { inner: MemoryBackend::new(), slow_value: json!("first") };
    let store = Arc::new(KvStore::with_backend(StoreConfig::default(), Arc::new(backend.clone())));

    let first = tokio::spawn({
        let store = Arc::clone(&store);
        async move { store.set("profile:1", json!("first"), None).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = tokio::spawn({
        let store = Arc::clone(&store);
        async move { store.set("profile:1", json!("second"), None).await }
    });
    first.await?;
    second.await?;

    assert_eq!(store.get("profile:1").await, Some(json!("second")));
    let durable = backend.inner.get("profile:1").await?.map(|e| e.value);
    assert_eq!(durable, Some(json!("second")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_merges_keep_every_field() -> anyhow::Result<()> {
    let store = Arc::new(KvStore::with_backend(StoreConfig::default(), Arc::new(MemoryBackend::new())));
    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        let mut patch = serde_json::Map::new();
        patch.insert(format!("f{i}"), json!(i));
        tasks.push(tokio::spawn(async move {
            store.merge_update("profile:2", Value::Object(patch), None).await
        }));
    }
    for task in tasks {
        task.await?;
    }

    let record = store.get("profile:2").await.unwrap_or_default();
    assert_eq!(record.as_object().map(|o| o.len()), Some(16));
    Ok(())
}
