//! Circuit breaker guarding each HTTP-backed provider client.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Circuit breaker tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before the circuit opens.
    pub max_failures: u32,
    /// Cooldown before an Open circuit admits a probe call.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-client resilience state machine.
///
/// `call` is the only entry point that mutates state; all transitions happen
/// under one mutex so a decision never mixes stale and fresh fields. One
/// logical `call` counts as one outcome, however many HTTP attempts the
/// wrapped future makes internally.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
    }

    /// Run `f` through the breaker.
    ///
    /// Rejected immediately with [`GatewayError::CircuitOpen`] while the
    /// circuit is Open (or a HalfOpen probe is already in flight).
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.preflight()?;
        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    fn preflight(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let since = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                if since >= self.config.reset_timeout() {
                    debug!(since_ms = since.as_millis() as u64, "circuit half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(GatewayError::CircuitOpen {
                        since_last_failure: since,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    let since = inner
                        .last_failure
                        .map(|at| at.elapsed())
                        .unwrap_or_default();
                    Err(GatewayError::CircuitOpen {
                        since_last_failure: since,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                debug!("circuit closed after successful probe");
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.last_failure = None;
                inner.probe_in_flight = false;
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("circuit re-opened: probe failed");
                inner.state = CircuitState::Open;
                inner.last_failure = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            CircuitState::Closed => {
                inner.failures += 1;
                inner.last_failure = Some(Instant::now());
                if inner.failures >= self.config.max_failures {
                    warn!(failures = inner.failures, "circuit opened");
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::Open => inner.last_failure = Some(Instant::now()),
        }
    }
}
