//! Fail-fast guard around backend calls.
//!
//! After `failure_threshold` consecutive backend failures the breaker opens and
//! calls skip the backend (and its timeout) entirely, going straight to the
//! degrade path. After `recovery_timeout` one probe is let through; success
//! closes the breaker again. A probe that never reports back (its caller was
//! cancelled) frees its slot once it is older than `recovery_timeout`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use configs::StoreConfig;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u64,
    probes_in_flight: u64,
    probe_successes: u64,
    opened_at: Option<Instant>,
    last_probe_at: Option<Instant>,
    failure_threshold: u64,
    recovery_timeout: Duration,
    half_open_max_calls: u64,
}

impl BreakerInner {
    fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => match self.opened_at {
                Some(at) if at.elapsed() >= self.recovery_timeout => {
                    info!("storage backend breaker half-open, probing");
                    self.state = BreakerState::HalfOpen;
                    self.probes_in_flight = 1;
                    self.probe_successes = 0;
                    self.last_probe_at = Some(Instant::now());
                    true
                }
                _ => false,
            },
            BreakerState::HalfOpen => {
                if self.probes_in_flight < self.half_open_max_calls {
                    self.probes_in_flight += 1;
                    self.last_probe_at = Some(Instant::now());
                    true
                } else if self.last_probe_at.map_or(true, |at| at.elapsed() >= self.recovery_timeout) {
                    debug!(stale = self.probes_in_flight, "half-open probes never reported, reclaiming slots");
                    self.probes_in_flight = 1;
                    self.probe_successes = 0;
                    self.last_probe_at = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&mut self) {
        match self.state {
            BreakerState::Closed => self.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                self.probe_successes += 1;
                if self.probe_successes >= self.half_open_max_calls {
                    info!("storage backend recovered, breaker closed");
                    self.close();
                }
            }
            // a call admitted before the breaker opened finished late
            BreakerState::Open => {}
        }
    }

    fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        match self.state {
            BreakerState::Closed if self.consecutive_failures >= self.failure_threshold => {
                warn!(failures = self.consecutive_failures, "storage backend breaker opened");
                self.open();
            }
            BreakerState::HalfOpen => {
                warn!("storage backend probe failed, breaker re-opened");
                self.open();
            }
            _ => {}
        }
        debug!(state = ?self.state, failures = self.consecutive_failures, "backend failure recorded");
    }

    fn open(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.probes_in_flight = 0;
        self.probe_successes = 0;
        self.last_probe_at = None;
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.probes_in_flight = 0;
        self.probe_successes = 0;
        self.opened_at = None;
        self.last_probe_at = None;
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerInner>>,
    enabled: bool,
}

impl CircuitBreaker {
    pub fn new(
        failure_threshold: u64,
        recovery_timeout: Duration,
        half_open_max_calls: u64,
        enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                probes_in_flight: 0,
                probe_successes: 0,
                opened_at: None,
                last_probe_at: None,
                failure_threshold: failure_threshold.max(1),
                recovery_timeout,
                half_open_max_calls: half_open_max_calls.max(1),
            })),
            enabled,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        let cb = &config.circuit_breaker;
        Self::new(cb.failure_threshold, config.recovery_timeout(), cb.half_open_max_calls, cb.enabled)
    }

    pub async fn can_execute(&self) -> bool {
        if !self.enabled {
            return true;
        }
        self.inner.lock().await.allow()
    }

    pub async fn record_success(&self) {
        if self.enabled {
            self.inner.lock().await.on_success();
        }
    }

    pub async fn record_failure(&self) {
        if self.enabled {
            self.inner.lock().await.on_failure();
        }
    }

    pub async fn state(&self) -> BreakerState {
        if !self.enabled {
            return BreakerState::Closed;
        }
        self.inner.lock().await.state
    }
}
