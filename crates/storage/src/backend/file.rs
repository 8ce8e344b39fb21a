use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use configs::BackendKind;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::KvBackend;
use crate::errors::StoreResult;
use crate::record::{now_millis, StoredEntry};

/// JSON file-backed key-value store.
///
/// Keeps `key -> {value, insertedAt, ttlSeconds}` in memory and rewrites the
/// whole document on every mutation. Prefix scans walk every key.
#[derive(Clone)]
pub struct FileBackend {
    inner: Arc<RwLock<HashMap<String, StoredEntry>>>,
    // serializes rewrites so an older snapshot never lands after a newer one
    save_lock: Arc<Mutex<()>>,
    file_path: PathBuf,
}

impl FileBackend {
    /// Open the document at `path`. A missing file starts empty and is created;
    /// a corrupt one is moved aside and the store starts empty.
    pub async fn open<P: Into<PathBuf>>(path: P) -> StoreResult<Self> {
        let file_path = path.into();
        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let (map, needs_write) = match fs::read(&file_path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, StoredEntry>>(&bytes) {
                Ok(map) => (map, false),
                Err(e) => {
                    let backup = corrupt_backup_path(&file_path);
                    warn!(
                        path = %file_path.display(),
                        backup = %backup.display(),
                        error = %e,
                        "store file is not valid JSON; starting empty"
                    );
                    if let Err(e) = fs::rename(&file_path, &backup).await {
                        warn!(error = %e, "could not move corrupt store file aside");
                    }
                    (HashMap::new(), true)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => (HashMap::new(), true),
            Err(e) => return Err(e.into()),
        };

        let backend = Self {
            inner: Arc::new(RwLock::new(map)),
            save_lock: Arc::new(Mutex::new(())),
            file_path,
        };
        if needs_write {
            backend.save().await?;
        }
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    async fn save(&self) -> StoreResult<()> {
        let _guard = self.save_lock.lock().await;
        let data = {
            let map = self.inner.read().await;
            serde_json::to_vec(&*map)?
        };
        let tmp = self.file_path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.file_path).await?;
        debug!(path = %self.file_path.display(), "store file rewritten");
        Ok(())
    }
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".corrupt-{}", now_millis()));
    path.with_file_name(name)
}

#[async_trait]
impl KvBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn ping(&self) -> StoreResult<()> {
        fs::metadata(&self.file_path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        let map = self.inner.read().await;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, entry: &StoredEntry) -> StoreResult<()> {
        let mut map = self.inner.write().await;
        map.insert(key.to_string(), entry.clone());
        drop(map);
        self.save().await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut map = self.inner.write().await;
        let existed = map.remove(key).is_some();
        drop(map);
        if existed {
            self.save().await?;
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, StoredEntry)>> {
        let map = self.inner.read().await;
        Ok(map
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn flush(&self) -> StoreResult<usize> {
        let now = now_millis();
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired_at(now));
        let purged = before - map.len();
        drop(map);
        self.save().await?;
        Ok(purged)
    }
}
