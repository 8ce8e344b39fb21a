use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use storage::{KvStore, Record, RecordKey};
use tracing::warn;

use crate::errors::ServiceError;
use crate::student::StudentId;

/// Daily goal keys: `goals:{studentId}:{YYYY-MM-DD}`, expiring by namespace policy.
pub const NAMESPACE: &str = "goals";
const MAX_GOAL_LEN: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalStatus {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn goal_key(student: &StudentId, date: NaiveDate) -> String {
    RecordKey::new(NAMESPACE, student.as_str()).on(date).to_string()
}

fn decode(key: &str, record: Record) -> Option<GoalStatus> {
    match serde_json::from_value(record) {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(key, error = %e, "goal record unreadable; ignoring");
            None
        }
    }
}

/// Replace the goal status for one student and day.
pub async fn save_goal_status(
    store: &KvStore,
    student: &StudentId,
    date: NaiveDate,
    goal: &str,
    completed: bool,
) -> Result<GoalStatus, ServiceError> {
    if goal.chars().count() > MAX_GOAL_LEN {
        return Err(ServiceError::invalid(format!("goal must be at most {MAX_GOAL_LEN} characters")));
    }
    let status = GoalStatus { goal: goal.trim().to_string(), completed, updated_at: Some(Utc::now()) };
    store.set(&goal_key(student, date), serde_json::to_value(&status)?, None).await;
    Ok(status)
}

pub async fn get_goal_status(store: &KvStore, student: &StudentId, date: NaiveDate) -> Option<GoalStatus> {
    let key = goal_key(student, date);
    let record = store.get(&key).await?;
    decode(&key, record)
}

/// Toggle completion, keeping whatever goal text is stored.
pub async fn set_goal_completed(
    store: &KvStore,
    student: &StudentId,
    date: NaiveDate,
    completed: bool,
) -> Result<GoalStatus, ServiceError> {
    let key = goal_key(student, date);
    let patch = json!({ "completed": completed, "updatedAt": Utc::now() });
    let merged = store.merge_update(&key, patch, None).await;
    Ok(serde_json::from_value(merged)?)
}

/// All students' statuses for `date`, ordered by student id.
///
/// Scans the whole `goals:` namespace; keys carry the date last.
pub async fn list_goal_statuses_for_date(store: &KvStore, date: NaiveDate) -> Vec<(StudentId, GoalStatus)> {
    let mut rows: Vec<(StudentId, GoalStatus)> = store
        .list_by_prefix(&RecordKey::namespace_prefix(NAMESPACE))
        .await
        .into_iter()
        .filter_map(|(key, record)| {
            let parsed = RecordKey::parse(&key)?;
            if parsed.date() != Some(date) {
                return None;
            }
            let student = StudentId::parse(parsed.entity_id()).ok()?;
            Some((student, decode(&key, record)?))
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows
}

/// One student's statuses, oldest day first.
pub async fn list_goal_statuses_for_student(store: &KvStore, student: &StudentId) -> Vec<(NaiveDate, GoalStatus)> {
    let mut rows: Vec<(NaiveDate, GoalStatus)> = store
        .list_by_prefix(&RecordKey::entity_prefix(NAMESPACE, student.as_str()))
        .await
        .into_iter()
        .filter_map(|(key, record)| {
            let date = RecordKey::parse(&key)?.date()?;
            Some((date, decode(&key, record)?))
        })
        .collect();
    rows.sort_by_key(|(date, _)| *date);
    rows
}
