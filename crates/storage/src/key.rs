//! Key layout `{namespace}:{entityId}[:{date}]` and per-namespace expiry.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use configs::StoreConfig;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Portion of the key before the first colon.
pub fn namespace_of(key: &str) -> &str {
    key.split_once(':').map_or(key, |(ns, _)| ns)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    namespace: String,
    entity_id: String,
    date: Option<NaiveDate>,
}

impl RecordKey {
    pub fn new(namespace: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), entity_id: entity_id.into(), date: None }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    /// `"{namespace}:"`, matching every key in the namespace.
    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{namespace}:")
    }

    /// `"{namespace}:{entity_id}:"`, matching every dated key of one entity.
    pub fn entity_prefix(namespace: &str, entity_id: &str) -> String {
        format!("{namespace}:{entity_id}:")
    }

    /// Parse `ns:id` or `ns:id:YYYY-MM-DD`. Anything else yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, ':');
        let namespace = parts.next().filter(|s| !s.is_empty())?;
        let entity_id = parts.next().filter(|s| !s.is_empty())?;
        let date = match parts.next() {
            Some(d) => Some(NaiveDate::parse_from_str(d, DATE_FORMAT).ok()?),
            None => None,
        };
        Some(Self { namespace: namespace.to_string(), entity_id: entity_id.to_string(), date })
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.entity_id)?;
        if let Some(date) = self.date {
            write!(f, ":{}", date.format(DATE_FORMAT))?;
        }
        Ok(())
    }
}

/// Default TTL per namespace.
#[derive(Debug, Clone, Default)]
pub struct TtlPolicy {
    defaults: HashMap<String, u64>,
}

impl TtlPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self { defaults: config.namespace_ttl.clone() }
    }

    pub fn ttl_for(&self, key: &str) -> Option<u64> {
        self.defaults.get(namespace_of(key)).copied().filter(|secs| *secs > 0)
    }

    /// An explicit TTL wins over the namespace default; `Some(0)` means "never expires".
    pub fn resolve(&self, key: &str, explicit: Option<u64>) -> Option<u64> {
        match explicit {
            Some(0) => None,
            Some(secs) => Some(secs),
            None => self.ttl_for(key),
        }
    }
}
