//! Backend drivers behind the [`KvBackend`] trait, and startup selection.

use std::sync::Arc;

use async_trait::async_trait;
use configs::{BackendKind, StoreConfig};
use tracing::{error, info, warn};

use crate::errors::{StoreError, StoreResult};
use crate::record::StoredEntry;

pub mod file;
pub mod memory;
pub mod remote;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use remote::RemoteKvBackend;

/// Storage medium abstraction.
/// Implementations can be file-backed, process-local, or a remote KV service.
#[async_trait]
pub trait KvBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether the backend expires keys on its own.
    fn native_ttl(&self) -> bool {
        false
    }

    async fn ping(&self) -> StoreResult<()>;
    async fn get(&self, key: &str) -> StoreResult<Option<StoredEntry>>;
    async fn set(&self, key: &str, entry: &StoredEntry) -> StoreResult<()>;
    /// Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
    /// All entries whose key starts with `prefix`, in no particular order.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, StoredEntry)>>;

    /// Purge logically expired entries and persist; returns how many were purged.
    async fn flush(&self) -> StoreResult<usize> {
        Ok(0)
    }

    /// Drop process-local state. Durable backends keep their data.
    async fn reset_volatile(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Pick and validate a backend once. Never fails: any problem is logged and
/// the in-memory map is used instead.
pub async fn connect(config: &StoreConfig) -> Arc<dyn KvBackend> {
    let kind = resolve_kind(config).await;
    match try_connect(kind, config).await {
        Ok(backend) => {
            info!(backend = %kind, "storage backend ready");
            backend
        }
        Err(e) => {
            if matches!(e, StoreError::Configuration(_)) {
                error!(backend = %kind, error = %e, "storage backend misconfigured");
            }
            warn!(
                backend = %kind,
                error = %e,
                "storage backend unavailable; using in-memory map, data will not survive restart"
            );
            Arc::new(MemoryBackend::new())
        }
    }
}

/// `Auto` becomes kv when credentials are present, else file when the
/// storage directory is writable, else memory.
pub async fn resolve_kind(config: &StoreConfig) -> BackendKind {
    match config.backend_kind {
        BackendKind::Auto if config.has_remote_credentials() => BackendKind::Kv,
        BackendKind::Auto if common::env::is_writable_dir(&config.storage_dir).await => BackendKind::File,
        BackendKind::Auto => BackendKind::Memory,
        explicit => explicit,
    }
}

async fn try_connect(kind: BackendKind, config: &StoreConfig) -> StoreResult<Arc<dyn KvBackend>> {
    match kind {
        BackendKind::Kv => {
            let (Some(url), Some(token)) = (&config.backend_url, &config.backend_token) else {
                return Err(StoreError::Configuration(
                    "kv backend needs BACKEND_URL and BACKEND_TOKEN".into(),
                ));
            };
            let backend = RemoteKvBackend::new(url, token, config.backend_timeout())?;
            tokio::time::timeout(config.backend_timeout(), backend.ping())
                .await
                .map_err(|_| StoreError::unavailable("ping timed out"))??;
            Ok(Arc::new(backend))
        }
        BackendKind::File => {
            common::env::ensure_writable_dir(&config.storage_dir)
                .await
                .map_err(|e| StoreError::Configuration(e.to_string()))?;
            Ok(Arc::new(FileBackend::open(config.store_file()).await?))
        }
        BackendKind::Memory | BackendKind::Auto => Ok(Arc::new(MemoryBackend::new())),
    }
}
