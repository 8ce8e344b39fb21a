#![cfg(test)]
use std::sync::Arc;

use configs::StoreConfig;
use storage::{KvStore, MemoryBackend};

pub fn memory_store() -> KvStore {
    KvStore::with_backend(StoreConfig::default(), Arc::new(MemoryBackend::new()))
}
