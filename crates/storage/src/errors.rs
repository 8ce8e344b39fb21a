use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures raised by backends. [`crate::KvStore`] absorbs all of them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection, timeout, non-2xx or open circuit.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// A stored value could not be parsed as JSON.
    #[error("malformed record under `{key}`: {reason}")]
    MalformedRecord { key: String, reason: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn malformed(key: &str, reason: impl ToString) -> Self {
        Self::MalformedRecord { key: key.to_string(), reason: reason.to_string() }
    }

    /// Whether the error says something about backend health.
    pub fn is_backend_failure(&self) -> bool {
        !matches!(self, Self::MalformedRecord { .. })
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::BackendUnavailable(err.to_string())
    }
}
