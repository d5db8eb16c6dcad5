use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout: Duration::from_secs(60) }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CircuitBreakerError<E> {
    /// Rejected without invoking the wrapped operation.
    #[error("circuit breaker `{0}` is open")]
    Open(String),
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
    // Bumped on every state transition; outcomes from an older generation
    // are ignored.
    generation: u64,
}

/// Three-state failure isolation around a fallible async operation.
///
/// While open, calls fail fast until `recovery_timeout` has passed since the
/// last failure. The first call after that runs as a single half-open trial:
/// success closes the circuit, failure reopens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.lock();
        CircuitSnapshot {
            state: state.state,
            failure_count: state.failure_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
        }
    }

    /// Time left before an open circuit admits a trial.
    pub fn remaining_open_time(&self) -> Option<Duration> {
        let state = self.lock();
        match (state.state, state.last_failure) {
            (CircuitState::Open, Some(last_failure)) => {
                Some(self.config.recovery_timeout.saturating_sub(last_failure.elapsed()))
            }
            _ => None,
        }
    }

    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let generation = self.admit()?;
        let mut attempt = Attempt { breaker: self, settled: false };

        let result = operation().await;
        attempt.settled = true;
        match result {
            Ok(value) => {
                self.on_success(generation);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(generation);
                Err(CircuitBreakerError::Operation(error))
            }
        }
    }

    fn admit<E>(&self) -> Result<u64, CircuitBreakerError<E>> {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => Ok(state.generation),
            CircuitState::Open => {
                let recovered = state
                    .last_failure
                    .map(|last_failure| last_failure.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if !recovered {
                    return Err(CircuitBreakerError::Open(self.name.clone()));
                }

                state.state = CircuitState::HalfOpen;
                state.trial_in_flight = true;
                state.generation += 1;
                info!(
                    event_name = "resilience.circuit.half_open",
                    breaker = %self.name,
                    "circuit breaker admitting trial call"
                );
                Ok(state.generation)
            }
            CircuitState::HalfOpen if state.trial_in_flight => {
                Err(CircuitBreakerError::Open(self.name.clone()))
            }
            CircuitState::HalfOpen => {
                state.trial_in_flight = true;
                Ok(state.generation)
            }
        }
    }

    fn is_stale(&self, state: &BreakerState, generation: u64) -> bool {
        let stale = state.generation != generation;
        if stale {
            debug!(
                event_name = "resilience.circuit.stale_outcome",
                breaker = %self.name,
                state = state.state.as_str(),
                "ignoring outcome of a call admitted before the last transition"
            );
        }
        stale
    }

    fn on_success(&self, generation: u64) {
        let mut state = self.lock();
        if self.is_stale(&state, generation) {
            return;
        }
        let previous = state.state;
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.trial_in_flight = false;

        if previous != CircuitState::Closed {
            state.generation += 1;
            info!(
                event_name = "resilience.circuit.closed",
                breaker = %self.name,
                "circuit breaker closed after successful trial"
            );
        }
    }

    fn on_failure(&self, generation: u64) {
        let mut state = self.lock();
        if self.is_stale(&state, generation) {
            return;
        }
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure = Some(Instant::now());
        state.trial_in_flight = false;

        let trips = state.state == CircuitState::HalfOpen
            || state.failure_count >= self.config.failure_threshold;
        if trips && state.state != CircuitState::Open {
            state.state = CircuitState::Open;
            state.generation += 1;
            warn!(
                event_name = "resilience.circuit.opened",
                breaker = %self.name,
                failure_count = state.failure_count,
                failure_threshold = self.config.failure_threshold,
                "circuit breaker opened"
            );
        }
    }

    fn abandon_trial(&self) {
        self.lock().trial_in_flight = false;
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Releases the half-open trial slot if the caller drops the call future
// before the operation settles.
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon_trial();
        }
    }
}
