use std::io;
use tracing_subscriber::{fmt, EnvFilter};

/// Store events worth seeing by default: degraded writes, breaker transitions
/// and backend selection are `warn`/`info` under `storage`; the tracker
/// services log unreadable records under `service`. Cache hits and misses are
/// `debug` and stay hidden unless `RUST_LOG=storage=debug` asks for them.
const DEFAULT_FILTER: &str = "info,storage=info,service=info,reqwest=warn,hyper=warn";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Compact human-readable output on stdout, for CLI commands run by hand.
/// Targets are shown so `storage::store` warnings can be told apart from
/// `storage::backend` selection messages.
pub fn init_logging_default() {
    let _ = fmt()
        .with_env_filter(filter())
        .with_target(true)
        .compact()
        .with_writer(io::stdout)
        .try_init();
}

/// One JSON object per event, for `store serve` under a log collector.
pub fn init_logging_json() {
    // 结构化字段（key、backend、pending 等）原样输出，便于按 key 检索降级写入
    let _ = fmt()
        .with_env_filter(filter())
        .with_target(true)
        .json()
        .with_current_span(false)
        .with_writer(io::stdout)
        .try_init();
}
