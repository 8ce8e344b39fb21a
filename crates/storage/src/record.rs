//! Record and stored-entry types shared by every backend.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An opaque JSON record; callers own its shape.
pub type Record = Value;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn empty_record() -> Record {
    Value::Object(Map::new())
}

/// A record plus the metadata needed for lazy expiry.
///
/// This is also the on-disk shape of each entry in the file backend:
/// `{"value": ..., "insertedAt": <epoch ms>, "ttlSeconds": <n|null>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    pub value: Record,
    pub inserted_at: i64,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl StoredEntry {
    pub fn new(value: Record, ttl_seconds: Option<u64>) -> Self {
        Self { value, inserted_at: now_millis(), ttl_seconds }
    }

    /// Entry read from a backend that enforces expiry itself.
    pub fn untracked(value: Record) -> Self {
        Self { value, inserted_at: now_millis(), ttl_seconds: None }
    }

    /// Entry whose backend reports `remaining_ms` left; `expires_at` lands exactly there.
    pub fn expiring_in(value: Record, remaining_ms: u64) -> Self {
        let ttl_seconds = remaining_ms.div_ceil(1000).max(1);
        let remaining = i64::try_from(remaining_ms).unwrap_or(i64::MAX);
        let span = i64::try_from(ttl_seconds).unwrap_or(i64::MAX).saturating_mul(1000);
        let inserted_at = now_millis().saturating_add(remaining).saturating_sub(span);
        Self { value, inserted_at, ttl_seconds: Some(ttl_seconds) }
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.ttl_seconds.map(|secs| {
            let ms = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
            self.inserted_at.saturating_add(ms)
        })
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at().is_some_and(|at| now_ms >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Whole seconds left before expiry, rounded up. `Some(0)` means already expired.
    pub fn remaining_ttl_at(&self, now_ms: i64) -> Option<u64> {
        self.expires_at().map(|at| {
            let left = at.saturating_sub(now_ms);
            if left <= 0 {
                0
            } else {
                (left as u64).div_ceil(1000)
            }
        })
    }
}

/// Shallow merge: top-level fields of `patch` overwrite those of `base`.
///
/// A non-object `base` is replaced by the patch; a non-object `patch`
/// replaces the whole record.
pub fn shallow_merge(base: Record, patch: Record) -> Record {
    match (base, patch) {
        (Value::Object(mut current), Value::Object(fields)) => {
            for (name, value) in fields {
                current.insert(name, value);
            }
            Value::Object(current)
        }
        (_, patch) => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_top_level_fields_only() {
        let base = json!({"dailyGoal": "", "brainliftCompleted": false, "meta": {"a": 1}});
        let merged = shallow_merge(base, json!({"brainliftCompleted": true, "meta": {"b": 2}}));
        assert_eq!(merged, json!({"dailyGoal": "", "brainliftCompleted": true, "meta": {"b": 2}}));
    }

    #[test]
    fn merge_into_non_object_takes_patch() {
        assert_eq!(shallow_merge(json!(3), json!({"a": 1})), json!({"a": 1}));
        assert_eq!(shallow_merge(json!({"a": 1}), json!("x")), json!("x"));
    }

    #[test]
    fn expiry_is_computed_from_insertion_time() {
        let entry = StoredEntry { value: json!({}), inserted_at: 10_000, ttl_seconds: Some(2) };
        assert_eq!(entry.expires_at(), Some(12_000));
        assert!(!entry.is_expired_at(11_999));
        assert!(entry.is_expired_at(12_000));
        assert_eq!(entry.remaining_ttl_at(10_500), Some(2));
        assert_eq!(entry.remaining_ttl_at(11_001), Some(1));
        assert_eq!(entry.remaining_ttl_at(13_000), Some(0));
    }

    #[test]
    fn remote_remaining_ttl_maps_to_expiry() {
        let before = now_millis();
        let entry = StoredEntry::expiring_in(json!(1), 1_500);
        let at = entry.expires_at().unwrap_or_default();
        assert!(at >= before + 1_500 && at <= now_millis() + 1_500);
        assert_eq!(entry.ttl_seconds, Some(2));
        assert!(StoredEntry::expiring_in(json!(1), 0).is_expired());
    }

    #[test]
    fn entries_without_ttl_never_expire() {
        let entry = StoredEntry { value: json!(1), inserted_at: 0, ttl_seconds: None };
        assert!(!entry.is_expired_at(i64::MAX));
        assert_eq!(entry.remaining_ttl_at(5), None);
    }

    #[test]
    fn file_shape_uses_camel_case() -> Result<(), serde_json::Error> {
        let entry = StoredEntry { value: json!({"a": 1}), inserted_at: 5, ttl_seconds: Some(60) };
        let encoded = serde_json::to_value(&entry)?;
        assert_eq!(encoded, json!({"value": {"a": 1}, "insertedAt": 5, "ttlSeconds": 60}));
        let legacy: StoredEntry = serde_json::from_value(json!({"value": 1, "insertedAt": 7}))?;
        assert_eq!(legacy.ttl_seconds, None);
        Ok(())
    }
}
