//! Key-value record store for the tracker.
//!
//! One [`KvStore`] fronts exactly one backend (remote Redis-compatible REST,
//! a JSON file, or a process-local map), chosen once from [`configs::StoreConfig`].
//! Reads go through a short-lived cache; backend failures never reach callers.
//!
//! ```text
//! KvStore ── overlay (degraded writes) ── ReadCache (moka)
//!    │
//!    └── CircuitBreaker + timeout ── dyn KvBackend
//!                                      ├── RemoteKvBackend (reqwest)
//!                                      ├── FileBackend (store.json)
//!                                      └── MemoryBackend (dashmap)
//! ```

pub mod backend;
pub mod cache;
pub mod circuit_breaker;
pub mod errors;
pub mod key;
pub mod maintenance;
pub mod observability;
pub mod overlay;
pub mod record;
pub mod store;

pub use backend::{FileBackend, KvBackend, MemoryBackend, RemoteKvBackend};
pub use configs::{BackendKind, StoreConfig};
pub use errors::{StoreError, StoreResult};
pub use key::{namespace_of, RecordKey, TtlPolicy};
pub use maintenance::{spawn_maintenance, MaintenanceHandle};
pub use record::{Record, StoredEntry};
pub use store::{FlushReport, KvStore};
