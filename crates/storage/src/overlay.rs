//! Writes and deletes that could not reach the backend.
//!
//! Pending operations shadow the backend for reads in this process until a
//! flush replays them. A merge made while the stored record was unreadable is
//! kept as its patch and re-applied to the backend's copy on replay.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::observability::PENDING_WRITES;
use crate::record::{now_millis, shallow_merge, Record, StoredEntry};

#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    /// Whole record to store.
    Write(StoredEntry),
    Delete { at: i64 },
    /// Patch over an unknown base. `view` is what this process reads meanwhile.
    Merge { patch: Record, view: StoredEntry },
}

impl PendingOp {
    /// The record readers in this process see, if any.
    pub fn visible(&self) -> Option<&StoredEntry> {
        match self {
            PendingOp::Write(entry) | PendingOp::Merge { view: entry, .. } => Some(entry),
            PendingOp::Delete { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct DegradedOverlay {
    ops: DashMap<String, PendingOp>,
}

impl DegradedOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, key: &str, entry: StoredEntry) {
        self.ops.insert(key.to_string(), PendingOp::Write(entry));
        self.publish();
    }

    /// Stack `patch` on any pending merge for `key`; `view` is the merged record.
    pub fn record_merge(&self, key: &str, patch: Record, view: StoredEntry) {
        let patch = match self.ops.get(key).map(|op| op.value().clone()) {
            Some(PendingOp::Merge { patch: earlier, .. }) => shallow_merge(earlier, patch),
            _ => patch,
        };
        self.ops.insert(key.to_string(), PendingOp::Merge { patch, view });
        self.publish();
    }

    pub fn record_delete(&self, key: &str) {
        self.ops.insert(key.to_string(), PendingOp::Delete { at: now_millis() });
        self.publish();
    }

    /// A later successful backend write supersedes anything pending.
    pub fn clear_key(&self, key: &str) {
        if self.ops.remove(key).is_some() {
            self.publish();
        }
    }

    pub fn lookup(&self, key: &str) -> Option<PendingOp> {
        self.ops.get(key).map(|op| op.value().clone())
    }

    pub fn snapshot(&self) -> Vec<(String, PendingOp)> {
        self.ops.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    /// Remove `key` only if it still holds `replayed`; a newer pending op stays.
    pub fn settle(&self, key: &str, replayed: &PendingOp) -> bool {
        let removed = self.ops.remove_if(key, |_, current| current == replayed).is_some();
        if removed {
            self.publish();
        }
        removed
    }

    /// Apply pending ops under `prefix` on top of backend scan results.
    pub fn apply_to(&self, prefix: &str, rows: &mut HashMap<String, StoredEntry>) {
        for op in self.ops.iter().filter(|e| e.key().starts_with(prefix)) {
            match op.value().visible() {
                Some(entry) => {
                    rows.insert(op.key().clone(), entry.clone());
                }
                None => {
                    rows.remove(op.key());
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&self) {
        self.ops.clear();
        self.publish();
    }

    fn publish(&self) {
        PENDING_WRITES.set(self.ops.len() as i64);
    }
}
