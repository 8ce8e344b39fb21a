#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use storage::{BackendKind, KvBackend, MemoryBackend, StoreError, StoreResult, StoredEntry};
use tokio::net::TcpListener;

/// Memory backend whose calls can be made to fail or stall on demand.
#[derive(Clone, Default)]
pub struct FlakyBackend {
    pub inner: MemoryBackend,
    failing: Arc<AtomicBool>,
    stall: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub fn stall(&self, on: bool) {
        self.stall.store(on, Ordering::SeqCst);
    }

    async fn guard(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("injected network error"));
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kv
    }

    async fn ping(&self) -> StoreResult<()> {
        self.guard().await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        self.guard().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, entry: &StoredEntry) -> StoreResult<()> {
        self.guard().await?;
        self.inner.set(key, entry).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.guard().await?;
        self.inner.delete(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, StoredEntry)>> {
        self.guard().await?;
        self.inner.scan_prefix(prefix).await
    }

    async fn flush(&self) -> StoreResult<usize> {
        self.guard().await?;
        self.inner.flush().await
    }
}

/// In-process stand-in for a Redis REST endpoint.
#[derive(Clone)]
pub struct FakeKv {
    pub data: Arc<Mutex<HashMap<String, (String, Option<Instant>)>>>,
    pub failing: Arc<AtomicBool>,
    token: String,
}

pub struct FakeKvServer {
    pub url: String,
    pub token: String,
    pub kv: FakeKv,
}

impl FakeKvServer {
    pub async fn start() -> anyhow::Result<Self> {
        let token = format!("token-{}", uuid::Uuid::new_v4());
        let kv = FakeKv {
            data: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(AtomicBool::new(false)),
            token: token.clone(),
        };
        let app = Router::new().route("/", post(handle)).with_state(kv.clone());
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
        let addr: SocketAddr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("fake kv server error: {e}");
            }
        });
        Ok(Self { url: format!("http://{addr}"), token, kv })
    }

    pub fn fail(&self, on: bool) {
        self.kv.failing.store(on, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        let data = self.kv.data.lock().expect("fake kv lock");
        data.get(key).map(|(v, _)| v.clone())
    }

    pub fn put_raw(&self, key: &str, value: &str) {
        let mut data = self.kv.data.lock().expect("fake kv lock");
        data.insert(key.to_string(), (value.to_string(), None));
    }
}

fn arg(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn live(entry: &(String, Option<Instant>)) -> bool {
    entry.1.map_or(true, |at| Instant::now() < at)
}

async fn handle(
    State(kv): State<FakeKv>,
    headers: HeaderMap,
    Json(cmd): Json<Vec<Value>>,
) -> (StatusCode, Json<Value>) {
    if kv.failing.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "unavailable"})));
    }
    let expected = format!("Bearer {}", kv.token);
    if headers.get("authorization").and_then(|h| h.to_str().ok()) != Some(expected.as_str()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"})));
    }

    let args: Vec<String> = cmd.iter().map(arg).collect();
    let mut data = kv.data.lock().expect("fake kv lock");
    let result = match args.first().map(|s| s.to_ascii_uppercase()).as_deref() {
        Some("PING") => json!("PONG"),
        Some("GET") => data
            .get(&args[1])
            .filter(|e| live(e))
            .map_or(Value::Null, |(v, _)| json!(v)),
        Some("SET") => {
            let expires = match args.get(3).map(|s| s.to_ascii_uppercase()).as_deref() {
                Some("EX") => args
                    .get(4)
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(|secs| Instant::now() + Duration::from_secs(secs)),
                _ => None,
            };
            data.insert(args[1].clone(), (args[2].clone(), expires));
            json!("OK")
        }
        Some("PTTL") => match data.get(&args[1]).filter(|e| live(e)) {
            None => json!(-2),
            Some((_, None)) => json!(-1),
            Some((_, Some(at))) => json!(at.saturating_duration_since(Instant::now()).as_millis() as i64),
        },
        Some("DEL") => json!(i64::from(data.remove(&args[1]).is_some())),
        Some("KEYS") => {
            let prefix = args[1].trim_end_matches('*').replace('\\', "");
            let keys: Vec<&String> = data
                .iter()
                .filter(|(k, e)| k.starts_with(&prefix) && live(e))
                .map(|(k, _)| k)
                .collect();
            json!(keys)
        }
        Some("MGET") => {
            let values: Vec<Value> = args[1..]
                .iter()
                .map(|k| data.get(k).filter(|e| live(e)).map_or(Value::Null, |(v, _)| json!(v)))
                .collect();
            json!(values)
        }
        _ => return (StatusCode::BAD_REQUEST, Json(json!({"error": "ERR unknown command"}))),
    };
    (StatusCode::OK, Json(json!({ "result": result })))
}
