use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use anyhow::Result;
use serde::{Deserialize, Deserializer};
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Which backend driver the store should activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Decide at initialize: remote KV if credentials exist, else file, else memory.
    #[default]
    Auto,
    Kv,
    File,
    Memory,
}

impl BackendKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "kv" | "redis" | "upstash" => Ok(Self::Kv),
            "file" | "json" => Ok(Self::File),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(anyhow!("unknown BACKEND_KIND `{other}`; expected kv|file|memory")),
        }
    }

    /// Unknown names fall back to `Auto` with a warning.
    pub fn parse_lenient(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|e| {
            warn!(error = %e, "ignoring backend kind, selecting automatically");
            Self::Auto
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Kv => "kv",
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn lenient_backend_kind<'de, D>(deserializer: D) -> std::result::Result<BackendKind, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(BackendKind::parse_lenient(&raw))
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default, deserialize_with = "lenient_backend_kind")]
    pub backend_kind: BackendKind,
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub backend_token: Option<String>,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_ms: u64,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    /// Namespace -> TTL seconds. Namespaces not listed never expire.
    #[serde(default = "default_namespace_ttl")]
    pub namespace_ttl: HashMap<String, u64>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend_kind: BackendKind::Auto,
            backend_url: None,
            backend_token: None,
            cache_ttl_seconds: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
            storage_dir: default_storage_dir(),
            backend_timeout_ms: default_backend_timeout(),
            flush_interval_secs: default_flush_interval(),
            namespace_ttl: default_namespace_ttl(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_addr")]
    pub addr: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { addr: default_admin_addr() }
    }
}

fn default_cache_ttl() -> u64 { 5 }
fn default_cache_capacity() -> u64 { 10_000 }
fn default_storage_dir() -> PathBuf { PathBuf::from("data") }
fn default_backend_timeout() -> u64 { 5_000 }
fn default_flush_interval() -> u64 { 30 }
fn default_true() -> bool { true }
fn default_failure_threshold() -> u64 { 5 }
fn default_recovery_timeout() -> u64 { 30 }
fn default_half_open_max_calls() -> u64 { 1 }
fn default_admin_addr() -> String { "127.0.0.1:9188".into() }

pub const DAY_SECS: u64 = 24 * 60 * 60;

fn default_namespace_ttl() -> HashMap<String, u64> {
    HashMap::from([
        ("goals".to_string(), 7 * DAY_SECS),
        ("history".to_string(), 30 * DAY_SECS),
    ])
}

/// Load `CONFIG_PATH` (default `config.toml`); a missing file yields defaults.
pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    match std::fs::metadata(&path) {
        Ok(_) => load_from_file(&path),
        Err(_) => Ok(AppConfig::default()),
    }
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let cfg: AppConfig = toml::from_str(&content)?;
    Ok(cfg)
}

impl AppConfig {
    /// File (if any) + process environment, normalized and validated.
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = load_default()?;
        cfg.apply_env(|name| std::env::var(name).ok())?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    /// Overlay environment-style settings. `lookup` abstracts the environment for tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.store.apply_env(&lookup)?;
        if let Some(addr) = lookup("ADMIN_ADDR") {
            self.admin.addr = addr;
        }
        Ok(())
    }

    /// Store settings never fail here: a backend that cannot be used is
    /// downgraded with a warning and the store falls back at initialize.
    /// Only the admin listener address is a hard error.
    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.store.normalize();
        if self.admin.addr.trim().is_empty() {
            self.admin.addr = default_admin_addr();
        }
        self.admin
            .addr
            .trim()
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow!("admin.addr `{}` is not a socket address: {e}", self.admin.addr))?;
        Ok(())
    }
}

impl StoreConfig {
    fn apply_env<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("BACKEND_KIND") {
            self.backend_kind = BackendKind::parse_lenient(&kind);
        }
        if let Some(url) = lookup("BACKEND_URL") {
            self.backend_url = Some(url);
        }
        if let Some(token) = lookup("BACKEND_TOKEN") {
            self.backend_token = Some(token);
        }
        if let Some(ttl) = lookup("CACHE_TTL_SECONDS") {
            match ttl.trim().parse() {
                Ok(secs) => self.cache_ttl_seconds = secs,
                Err(_) => warn!(value = %ttl, "CACHE_TTL_SECONDS is not a non-negative integer; keeping {}", self.cache_ttl_seconds),
            }
        }
        if let Some(dir) = lookup("STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    fn normalize(&mut self) {
        // 空字符串视为未配置
        for slot in [&mut self.backend_url, &mut self.backend_token] {
            if slot.as_deref().map(str::trim).is_some_and(str::is_empty) {
                *slot = None;
            }
        }
        if let Some(url) = self.backend_url.as_mut() {
            *url = url.trim().trim_end_matches('/').to_string();
        }
        if self.storage_dir.as_os_str().is_empty() {
            self.storage_dir = default_storage_dir();
        }
        if self.backend_timeout_ms == 0 {
            self.backend_timeout_ms = default_backend_timeout();
        }
        if self.flush_interval_secs == 0 {
            self.flush_interval_secs = default_flush_interval();
        }
        if self.cache_capacity == 0 {
            warn!("store.cache_capacity must be >= 1; using default");
            self.cache_capacity = default_cache_capacity();
        }
        let cb = &mut self.circuit_breaker;
        cb.failure_threshold = cb.failure_threshold.max(1);
        cb.half_open_max_calls = cb.half_open_max_calls.max(1);

        // 远程配置不可用时降级，而不是拒绝启动
        if let Some(url) = &self.backend_url {
            let lower = url.to_lowercase();
            if !(lower.starts_with("http://") || lower.starts_with("https://")) {
                warn!(url = %url, "BACKEND_URL must start with http:// or https://; ignoring it");
                self.backend_url = None;
            }
        }
        if self.backend_kind == BackendKind::Kv && !self.has_remote_credentials() {
            warn!("BACKEND_KIND=kv requires both BACKEND_URL and BACKEND_TOKEN; using the in-memory backend");
            self.backend_kind = BackendKind::Memory;
        }
    }

    pub fn has_remote_credentials(&self) -> bool {
        self.backend_url.is_some() && self.backend_token.is_some()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker.recovery_timeout_secs)
    }

    /// Path of the JSON document used by the file backend.
    pub fn store_file(&self) -> PathBuf {
        self.storage_dir.join("store.json")
    }
}
