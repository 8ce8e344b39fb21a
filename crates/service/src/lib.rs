//! Tracker record services built on [`storage::KvStore`].
//! - Profiles, daily goal status and history entries, each under its own namespace.
//! - Reads never fail: missing or unreadable data comes back as defaults.
//! - Updates are read-modify-write through `KvStore::merge_update`; concurrent
//!   writers in other processes can overwrite each other (last write wins).

pub mod errors;
pub mod goal_service;
pub mod history_service;
pub mod profile_service;
pub mod student;
#[cfg(test)]
pub mod test_support;

pub use errors::ServiceError;
pub use student::StudentId;
