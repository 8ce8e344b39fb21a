use std::sync::Arc;

use async_trait::async_trait;
use configs::BackendKind;
use dashmap::DashMap;

use super::KvBackend;
use crate::errors::StoreResult;
use crate::record::{now_millis, StoredEntry};

/// Process-local map. Used when nothing durable is configured or reachable.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<DashMap<String, StoredEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &str, entry: &StoredEntry) -> StoreResult<()> {
        self.entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    // O(n) over every key.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, StoredEntry)>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    async fn flush(&self) -> StoreResult<usize> {
        let now = now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn reset_volatile(&self) -> StoreResult<()> {
        self.entries.clear();
        Ok(())
    }
}
