//! Periodic flush task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::store::KvStore;

/// Running maintenance loop; aborted when dropped.
pub struct MaintenanceHandle {
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn stop(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Call [`KvStore::flush`] every `every`, starting one interval from now.
pub fn spawn_maintenance(store: Arc<KvStore>, every: Duration) -> MaintenanceHandle {
    info!(interval = ?every, "store maintenance started");
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = store.flush().await;
            debug!(?report, "maintenance pass");
        }
    });
    MaintenanceHandle { task }
}
