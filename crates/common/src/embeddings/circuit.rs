//! Circuit breaker guarding the embedding provider
//!
//! - Closed: calls pass through; consecutive failures are counted.
//! - Open: calls fail fast with [`AppError::CircuitOpen`] until the recovery
//!   timeout has elapsed since the last failure.
//! - Half-open: trial calls pass; enough successes close the circuit, any
//!   failure reopens it.

use crate::config::CircuitBreakerConfig;
use crate::errors::{AppError, Result};
use crate::metrics::{record_circuit_failure, record_circuit_state};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    /// Failures since the circuit last closed
    pub failure_count: u32,
    pub success_count: u64,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    half_open_successes: u32,
    successes: u64,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_calls: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout(),
            half_open_max_calls: config.half_open_max_calls.max(1),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                half_open_successes: 0,
                successes: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.lock();
        CircuitStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failures,
            success_count: inner.successes,
        }
    }

    /// Force the circuit closed
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.half_open_successes = 0;
        record_circuit_state(&self.name, inner.state);
        info!(circuit = %self.name, "Circuit reset");
    }

    /// Run `operation` unless the circuit is open, recording its outcome
    pub async fn call<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.acquire()?;
        match operation.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure(&e);
                Err(e)
            }
        }
    }

    fn acquire(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let recovered = inner
            .last_failure
            .is_some_and(|at| at.elapsed() >= self.recovery_timeout);
        if recovered {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            record_circuit_state(&self.name, inner.state);
            info!(
                circuit = %self.name,
                recovery_secs = self.recovery_timeout.as_secs_f64(),
                "Circuit half-open"
            );
            return Ok(());
        }

        debug!(circuit = %self.name, "Call rejected by open circuit");
        Err(AppError::CircuitOpen {
            name: self.name.clone(),
        })
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.successes += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.half_open_max_calls {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    record_circuit_state(&self.name, inner.state);
                    info!(circuit = %self.name, successes = inner.half_open_successes, "Circuit closed");
                }
            }
            CircuitState::Closed => inner.failures = 0,
            // A call admitted before another caller tripped the circuit
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, err: &AppError) {
        let mut inner = self.lock();
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());
        record_circuit_failure(&self.name);
        warn!(
            circuit = %self.name,
            failure_count = inner.failures,
            threshold = self.failure_threshold,
            error = %err,
            "Circuit recorded failure"
        );

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                record_circuit_state(&self.name, inner.state);
                warn!(circuit = %self.name, "Circuit reopened");
            }
            CircuitState::Closed if inner.failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                record_circuit_state(&self.name, inner.state);
                error!(circuit = %self.name, failure_count = inner.failures, "Circuit opened");
            }
            _ => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never panic midway, so a poisoned state is still coherent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery_secs: u64, half_open: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "embedding",
            &CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout_secs: recovery_secs,
                half_open_max_calls: half_open,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<()> {
        cb.call(async { Err::<(), _>(AppError::provider("ollama", "refused")) })
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u8> {
        cb.call(async { Ok(7) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let cb = breaker(3, 30, 1);
        for _ in 0..2 {
            assert!(fail(&cb).await.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(fail(&cb).await.is_err());
        assert!(cb.is_open());

        let mut ran = false;
        let err = cb
            .call(async {
                ran = true;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CircuitOpen { ref name } if name == "embedding"));
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(2, 30, 1);
        assert!(fail(&cb).await.is_err());
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert!(fail(&cb).await.is_err());

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_successes() {
        let cb = breaker(1, 30, 2);
        assert!(fail(&cb).await.is_err());
        assert!(cb.is_open());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(succeed(&cb).await.is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 10, 3);
        assert!(fail(&cb).await.is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(fail(&cb).await.is_err());
        assert!(cb.is_open());

        // The recovery window restarts from the latest failure
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(matches!(succeed(&cb).await, Err(AppError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_reset_closes() {
        let cb = breaker(1, 3600, 1);
        assert!(fail(&cb).await.is_err());
        assert!(cb.is_open());

        cb.reset();
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.stats().success_count, 1);
    }
}
