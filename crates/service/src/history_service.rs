use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use storage::{KvStore, RecordKey};
use tracing::warn;

use crate::errors::ServiceError;
use crate::goal_service;
use crate::profile_service;
use crate::student::StudentId;

/// Per-day history keys: `history:{studentId}:{YYYY-MM-DD}`, expiring by namespace policy.
pub const NAMESPACE: &str = "history";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub date: NaiveDate,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub brainlift_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

pub fn history_key(student: &StudentId, date: NaiveDate) -> String {
    RecordKey::new(NAMESPACE, student.as_str()).on(date).to_string()
}

/// Store (or replace) the entry for `entry.date`.
pub async fn record_history(store: &KvStore, student: &StudentId, entry: &HistoryEntry) -> Result<(), ServiceError> {
    store.set(&history_key(student, entry.date), serde_json::to_value(entry)?, None).await;
    Ok(())
}

/// Build the day's entry from the current profile and goal status, then record it.
pub async fn snapshot_day(store: &KvStore, student: &StudentId, date: NaiveDate) -> Result<HistoryEntry, ServiceError> {
    let profile = profile_service::get_profile(store, student).await;
    let goal = goal_service::get_goal_status(store, student, date).await.unwrap_or_default();
    let entry = HistoryEntry {
        date,
        goal: if goal.goal.is_empty() { profile.daily_goal } else { goal.goal },
        completed: goal.completed,
        brainlift_completed: profile.brainlift_completed,
        notes: None,
    };
    record_history(store, student, &entry).await?;
    Ok(entry)
}

/// A student's history, newest first.
pub async fn list_history(store: &KvStore, student: &StudentId) -> Vec<HistoryEntry> {
    let mut entries: Vec<HistoryEntry> = store
        .list_by_prefix(&RecordKey::entity_prefix(NAMESPACE, student.as_str()))
        .await
        .into_iter()
        .filter_map(|(key, record)| match serde_json::from_value(record) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "history record unreadable; skipping");
                None
            }
        })
        .collect();
    entries.sort_by(|a, b| b.date.cmp(&a.date));
    entries
}
