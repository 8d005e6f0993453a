//! Per-agent circuit breaker.
//!
//! Stops calling an agent whose external dependency keeps failing:
//! - Closed: attempts pass through; consecutive transient failures are counted
//! - Open: attempts are refused until `reset_timeout` has elapsed
//! - HalfOpen: trial attempts pass; `success_threshold` successes close the
//!   circuit, any failure opens it again

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Half-open successes that close it again.
    pub success_threshold: u32,
    /// Time an open circuit waits before letting a trial attempt through.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, moving an expired open circuit to half-open.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    /// `Ok` if an attempt may run now, otherwise the time left until the
    /// circuit lets a trial attempt through.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();
                Err(self.config.reset_timeout.saturating_sub(elapsed))
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                debug!(
                    name = %self.name,
                    successes = inner.successes,
                    threshold = self.config.success_threshold,
                    "circuit trial succeeded"
                );
                if inner.successes >= self.config.success_threshold {
                    info!(name = %self.name, "circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                debug!(
                    name = %self.name,
                    failures = inner.failures,
                    threshold = self.config.failure_threshold,
                    "circuit failure recorded"
                );
                if inner.failures >= self.config.failure_threshold {
                    warn!(name = %self.name, failures = inner.failures, "circuit opened");
                    self.open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(name = %self.name, "circuit trial failed, reopening");
                self.open(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.opened_at = None;
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.successes = 0;
        inner.opened_at = Some(now);
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let expired = inner
            .opened_at
            .map_or(true, |at| now.duration_since(at) >= self.config.reset_timeout);
        if expired {
            info!(name = %self.name, "circuit half-open");
            inner.state = CircuitState::HalfOpen;
            inner.failures = 0;
            inner.successes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "workspace",
            CircuitBreakerConfig {
                failure_threshold: failures,
                success_threshold: 1,
                reset_timeout: Duration::from_millis(reset_ms),
            },
        )
    }

    #[test]
    fn starts_closed() {
        let cb = breaker(3, 1_000);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = breaker(3, 60_000);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        let wait = cb.try_acquire().unwrap_err();
        assert!(wait > Duration::from_secs(50));
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = breaker(3, 1_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_timeout_then_closes_on_success() {
        let cb = breaker(1, 20);
        cb.record_failure();
        assert!(cb.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().is_ok());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = breaker(1, 20);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn reset_closes_an_open_circuit() {
        let cb = breaker(1, 60_000);
        cb.record_failure();
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }
}
