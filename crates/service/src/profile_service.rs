use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use storage::{KvStore, Record, RecordKey};
use tracing::warn;

use crate::errors::ServiceError;
use crate::student::StudentId;

pub const NAMESPACE: &str = "profile";

/// Student profile as stored under `profile:{studentId}`.
/// Fields this type does not know about are kept in `extra` and written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub daily_goal: String,
    #[serde(default)]
    pub brainlift_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Partial profile update; only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brainlift_completed: Option<bool>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.daily_goal.is_none() && self.brainlift_completed.is_none()
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.is_empty() {
            return Err(ServiceError::invalid("profile update has no fields"));
        }
        if let Some(email) = &self.email {
            if !email.is_empty() && !email.contains('@') {
                return Err(ServiceError::invalid("email must contain '@'"));
            }
        }
        Ok(())
    }
}

pub fn profile_key(student: &StudentId) -> String {
    RecordKey::new(NAMESPACE, student.as_str()).to_string()
}

pub(crate) fn decode_profile(key: &str, record: Record) -> Profile {
    serde_json::from_value(record).unwrap_or_else(|e| {
        warn!(key, error = %e, "profile record unreadable; using defaults");
        Profile::default()
    })
}

/// Profile for a student; defaults when nothing usable is stored.
pub async fn get_profile(store: &KvStore, student: &StudentId) -> Profile {
    let key = profile_key(student);
    match store.get(&key).await {
        Some(record) => decode_profile(&key, record),
        None => Profile::default(),
    }
}

/// Merge the provided fields into the stored profile and stamp `lastUpdated`.
pub async fn update_profile(
    store: &KvStore,
    student: &StudentId,
    update: &ProfileUpdate,
) -> Result<Profile, ServiceError> {
    update.validate()?;
    let mut patch = serde_json::to_value(update)?;
    if let Value::Object(fields) = &mut patch {
        fields.insert("lastUpdated".into(), serde_json::to_value(Utc::now())?);
    }
    let key = profile_key(student);
    let merged = store.merge_update(&key, patch, None).await;
    Ok(decode_profile(&key, merged))
}

/// Mark the day's brainlift as done or not done.
pub async fn set_brainlift_completed(
    store: &KvStore,
    student: &StudentId,
    completed: bool,
) -> Result<Profile, ServiceError> {
    let update = ProfileUpdate { brainlift_completed: Some(completed), ..ProfileUpdate::default() };
    update_profile(store, student, &update).await
}

/// Every stored profile, ordered by student id. Keys with invalid ids are skipped.
pub async fn list_profiles(store: &KvStore) -> Vec<(StudentId, Profile)> {
    let prefix = RecordKey::namespace_prefix(NAMESPACE);
    let mut profiles: Vec<(StudentId, Profile)> = store
        .list_by_prefix(&prefix)
        .await
        .into_iter()
        .filter_map(|(key, record)| {
            let id = StudentId::parse(key.strip_prefix(&prefix)?).ok()?;
            Some((id, decode_profile(&key, record)))
        })
        .collect();
    profiles.sort_by(|a, b| a.0.cmp(&b.0));
    profiles
}
