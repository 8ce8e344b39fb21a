//! Redis-compatible REST backend (Upstash style).
//!
//! Each command is `POST {url}` with a JSON array body such as
//! `["SET", "profile:1", "{...}", "EX", 60]` and a bearer token. Replies are
//! `{"result": ...}` or `{"error": "..."}`. Values are stored as JSON text so
//! other readers of the same database see plain JSON.
//!
//! `get` follows `GET` with `PTTL` so the entry (and anything cached from it)
//! carries the key's real expiry. Prefix listings are not cached and skip it.

use std::time::Duration;

use async_trait::async_trait;
use configs::BackendKind;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::KvBackend;
use crate::errors::{StoreError, StoreResult};
use crate::observability;
use crate::record::{now_millis, StoredEntry};

#[derive(Clone)]
pub struct RemoteKvBackend {
    client: reqwest::Client,
    url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RemoteKvBackend {
    pub fn new(url: &str, token: &str, timeout: Duration) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn command(&self, args: Vec<Value>) -> StoreResult<Value> {
        let name = args.first().and_then(Value::as_str).unwrap_or("?").to_string();
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::unavailable(format!("{name} returned {status}: {body}")));
        }
        let reply: RestReply = resp
            .json()
            .await
            .map_err(|e| StoreError::unavailable(format!("{name} reply unreadable: {e}")))?;
        if let Some(error) = reply.error {
            return Err(StoreError::unavailable(format!("{name} failed: {error}")));
        }
        debug!(command = %name, "kv command ok");
        Ok(reply.result.unwrap_or(Value::Null))
    }

    fn decode(key: &str, raw: Value) -> StoreResult<Option<StoredEntry>> {
        match raw {
            Value::Null => Ok(None),
            Value::String(text) => serde_json::from_str(&text)
                .map(|value| Some(StoredEntry::untracked(value)))
                .map_err(|e| StoreError::malformed(key, e)),
            other => Err(StoreError::malformed(key, format!("unexpected reply type: {other}"))),
        }
    }
}

/// `KEYS` pattern matching everything that starts with `prefix`.
pub fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl KvBackend for RemoteKvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kv
    }

    fn native_ttl(&self) -> bool {
        true
    }

    async fn ping(&self) -> StoreResult<()> {
        match self.command(vec![json!("PING")]).await? {
            Value::String(s) if s.eq_ignore_ascii_case("pong") => Ok(()),
            other => Err(StoreError::unavailable(format!("unexpected PING reply: {other}"))),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        let raw = self.command(vec![json!("GET"), json!(key)]).await?;
        let Some(entry) = Self::decode(key, raw)? else {
            return Ok(None);
        };
        // -2: gone since GET, -1: no expiry
        match self.command(vec![json!("PTTL"), json!(key)]).await?.as_i64() {
            Some(-2) => Ok(None),
            Some(ms) if ms >= 0 => Ok(Some(StoredEntry::expiring_in(entry.value, ms as u64))),
            _ => Ok(Some(entry)),
        }
    }

    async fn set(&self, key: &str, entry: &StoredEntry) -> StoreResult<()> {
        let mut args = vec![json!("SET"), json!(key), json!(serde_json::to_string(&entry.value)?)];
        match entry.remaining_ttl_at(now_millis()) {
            Some(0) => return self.delete(key).await,
            Some(secs) => {
                args.push(json!("EX"));
                args.push(json!(secs));
            }
            None => {}
        }
        self.command(args).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.command(vec![json!("DEL"), json!(key)]).await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, StoredEntry)>> {
        let keys: Vec<String> = match self.command(vec![json!("KEYS"), json!(prefix_pattern(prefix))]).await? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Value::Null => Vec::new(),
            other => return Err(StoreError::unavailable(format!("unexpected KEYS reply: {other}"))),
        };
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec![json!("MGET")];
        args.extend(keys.iter().map(|k| json!(k)));
        let values = match self.command(args).await? {
            Value::Array(values) => values,
            other => return Err(StoreError::unavailable(format!("unexpected MGET reply: {other}"))),
        };

        let mut rows = Vec::with_capacity(keys.len());
        // keys can vanish between KEYS and MGET; those come back null
        for (key, raw) in keys.into_iter().zip(values) {
            match Self::decode(&key, raw) {
                Ok(Some(entry)) => rows.push((key, entry)),
                Ok(None) => {}
                Err(e) => {
                    observability::MALFORMED_RECORDS_TOTAL.inc();
                    warn!(key = %key, error = %e, "skipping malformed record in prefix scan");
                }
            }
        }
        Ok(rows)
    }
}
