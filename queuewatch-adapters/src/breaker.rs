//! Consecutive-failure circuit breaker.
//!
//! The breaker has two states, closed and open. It opens once the number of
//! consecutive failures reaches the threshold and closes again on the first
//! [`CircuitBreaker::allow_request`] call after the cool-down has elapsed.
//! There is no timer: the reset happens lazily as a side effect of that call.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Configuration for [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit (default: 5).
    pub failure_threshold: u32,
    /// How long the circuit stays open after the last failure (default: 60s).
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of the breaker, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitStatus {
    /// Whether calls are currently being short-circuited.
    pub open: bool,
    /// Consecutive failures since the last success or reset.
    pub failure_count: u32,
    /// When the most recent failure was recorded.
    pub last_failure: Option<Instant>,
    /// Failures recorded over the breaker's lifetime. Never decreases.
    pub total_failures: u64,
}

#[derive(Debug, Default)]
struct CircuitState {
    failure_count: u32,
    last_failure: Option<Instant>,
    open: bool,
    total_failures: u64,
}

/// Guards an upstream dependency against repeated failing calls.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CircuitState::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call may go ahead.
    ///
    /// Returns `false` only while the circuit is open and the cool-down has
    /// not yet elapsed. Once it has, the circuit is closed and the failure
    /// count reset before returning `true`.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock();
        if !state.open {
            return true;
        }

        if self.cooling_down(&state, Instant::now()) {
            return false;
        }

        state.open = false;
        state.failure_count = 0;
        true
    }

    /// Record a successful call: closes the circuit and clears the count.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.failure_count = 0;
        state.open = false;
    }

    /// Record a failed call, opening the circuit at the threshold.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        state.total_failures += 1;
        state.last_failure = Some(Instant::now());

        if state.failure_count >= self.config.failure_threshold {
            state.open = true;
        }
    }

    /// Current state, without triggering the lazy reset.
    ///
    /// An open circuit whose cool-down has elapsed is reported as closed,
    /// since the next call will be allowed through.
    pub fn status(&self) -> CircuitStatus {
        let state = self.state.lock();
        CircuitStatus {
            open: state.open && self.cooling_down(&state, Instant::now()),
            failure_count: state.failure_count,
            last_failure: state.last_failure,
            total_failures: state.total_failures,
        }
    }

    fn cooling_down(&self, state: &CircuitState, now: Instant) -> bool {
        state
            .last_failure
            .is_some_and(|last| now.saturating_duration_since(last) < self.config.cool_down)
    }
}
