//! Environment/runtime helpers
//!
//! Startup probes used to decide which storage backend is usable.

use std::path::Path;

use tracing::{debug, warn};

/// Ensure `dir` exists and accepts writes by creating and removing a probe file.
pub async fn ensure_writable_dir(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", dir.display()))?;

    let probe = dir.join(format!(".write-probe-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("{} is not writable: {e}", dir.display()))?;
    if let Err(e) = tokio::fs::remove_file(&probe).await {
        warn!(probe = %probe.display(), error = %e, "failed to remove write probe");
    }
    debug!(dir = %dir.display(), "storage directory is writable");
    Ok(())
}

/// Like [`ensure_writable_dir`] but reports the outcome as a flag.
pub async fn is_writable_dir(dir: &Path) -> bool {
    match ensure_writable_dir(dir).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "storage directory unusable");
            false
        }
    }
}
