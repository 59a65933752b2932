//! Circuit breaker for AI provider protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: provider assumed down, calls are rejected without being invoked
//! - Half-Open: exactly one trial call is in flight
//!
//! # Transitions
//! ```text
//! Closed    -> Open:   failure_threshold consecutive failures
//! Open      -> Half:   first call after the cooldown becomes the trial
//! Half-Open -> Closed: trial succeeds
//! Half-Open -> Open:   trial fails (or is dropped); cooldown restarts
//! ```
//!
//! State lives behind a mutex that is never held across an `.await`, so breakers can be shared
//! between tasks of a multi-threaded runtime.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::constants::{DEFAULT_BREAKER_COOLDOWN_MS, DEFAULT_BREAKER_FAILURE_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            cooldown: Duration::from_millis(DEFAULT_BREAKER_COOLDOWN_MS),
        }
    }
}

/// Snapshot of a breaker's counters.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStats {
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_requests: u64,
    pub consecutive_failures: u32,
    pub state: CircuitState,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Result of a call made through [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("circuit '{name}' is open")]
    Open { name: String },
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    rejected_requests: u64,
    last_failure_at: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn fresh() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            rejected_requests: 0,
            last_failure_at: None,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.trial_in_flight = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Per-dependency circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::fresh()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` through the breaker.
    ///
    /// While the circuit is open `f` is never invoked and [`CircuitError::Open`] is returned;
    /// the rejected call still counts towards `total_requests`.
    pub async fn execute<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit().ok_or_else(|| CircuitError::Open {
            name: self.name.clone(),
        })?;

        let mut guard = CallGuard {
            breaker: self,
            admission,
            settled: false,
        };

        let result = f().await;
        guard.settled = true;
        match result {
            Ok(value) => {
                self.on_success(admission);
                Ok(value)
            }
            Err(err) => {
                self.on_failure(admission);
                Err(CircuitError::Inner(err))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock();
        CircuitStats {
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_requests: inner.rejected_requests,
            consecutive_failures: inner.consecutive_failures,
            state: inner.state,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Return to a fresh closed breaker, clearing all counters.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::fresh();
        tracing::info!(circuit = %self.name, "circuit breaker reset");
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;

        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled && !inner.trial_in_flight {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::debug!(circuit = %self.name, "circuit half-open, admitting trial call");
                    Some(Admission::Trial)
                } else {
                    inner.rejected_requests += 1;
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected_requests += 1;
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                }
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;

        match admission {
            Admission::Trial => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                tracing::info!(circuit = %self.name, "trial call succeeded, circuit closed");
            }
            Admission::Normal => {
                if inner.state == CircuitState::Closed {
                    inner.consecutive_failures = 0;
                }
            }
        }
    }

    fn on_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(Utc::now());

        match admission {
            Admission::Trial => {
                inner.open();
                tracing::warn!(circuit = %self.name, "trial call failed, circuit reopened");
            }
            Admission::Normal => {
                if inner.state == CircuitState::Closed
                    && inner.consecutive_failures >= self.config.failure_threshold
                {
                    inner.open();
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        cooldown_ms = self.config.cooldown.as_millis() as u64,
                        "circuit opened"
                    );
                }
            }
        }
    }

    fn abandon(&self, admission: Admission) {
        if admission == Admission::Trial {
            let mut inner = self.inner.lock();
            inner.open();
            tracing::debug!(circuit = %self.name, "trial call cancelled, circuit reopened");
        }
    }
}

/// Releases a half-open trial slot if the call future is dropped before it settles.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon(self.admission);
        }
    }
}

/// Breakers keyed by provider name.
///
/// Owned by the orchestrating service and shared by reference, so every call site for a
/// provider sees the same breaker while different providers stay isolated.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for `name`, created on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config)))
            .clone()
    }

    /// Stats for every known breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, CircuitStats)> {
        let breakers = self.breakers.lock();
        let mut stats: Vec<_> = breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().values() {
            breaker.reset();
        }
    }
}
