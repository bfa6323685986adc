//! Per-endpoint circuit breaker. Once an endpoint has failed often enough
//! the breaker rejects calls outright, so the poller rotates to the next
//! endpoint instead of waiting on timeouts.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    half_open_in_flight: usize,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_in_flight: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("RPC circuit breaker is open")]
    CircuitOpen,
}

/// Closed/Open/Half-Open breaker guarding one endpoint.
#[derive(Debug, Clone)]
pub struct RpcCircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
    endpoint: Arc<str>,
    failure_threshold: usize,
    cooldown: Duration,
    half_open_sample: usize,
}

impl Default for RpcCircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30), 1)
    }
}

impl RpcCircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration, half_open_sample: usize) -> Self {
        let cooldown = if cooldown.is_zero() {
            Duration::from_secs(1)
        } else {
            cooldown
        };

        Self {
            state: Arc::new(Mutex::new(BreakerState::closed())),
            endpoint: Arc::from(""),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            half_open_sample: half_open_sample.max(1),
        }
    }

    /// Labels state-change logs with the guarded endpoint.
    pub fn for_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Arc::from(endpoint);
        self
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let guard = self.state.lock().expect("circuit breaker mutex poisoned");
        CircuitBreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            opened_at: guard.opened_at,
        }
    }

    /// Checks whether a call may go out, reserving a Half-Open probe slot
    /// when the cooldown has elapsed.
    pub fn before_request(&self) -> Result<CircuitState, CircuitBreakerError> {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");

        if state.state == CircuitState::Open {
            match state.opened_at {
                Some(opened_at) if opened_at.elapsed() >= self.cooldown => {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.half_open_in_flight = 0;
                }
                _ => return Err(CircuitBreakerError::CircuitOpen),
            }
        }

        if state.state == CircuitState::HalfOpen {
            if state.half_open_in_flight >= self.half_open_sample {
                return Err(CircuitBreakerError::CircuitOpen);
            }
            state.half_open_in_flight += 1;
        }

        Ok(state.state)
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        self.release_half_open_slot(&mut state);
        state.consecutive_failures = 0;

        if state.state == CircuitState::HalfOpen {
            state.opened_at = None;
            self.transition(&mut state, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        self.release_half_open_slot(&mut state);
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let trips = state.state == CircuitState::HalfOpen
            || (state.state == CircuitState::Closed
                && state.consecutive_failures >= self.failure_threshold);
        if trips {
            state.opened_at = Some(Instant::now());
            state.half_open_in_flight = 0;
            self.transition(&mut state, CircuitState::Open);
        }
    }

    fn release_half_open_slot(&self, state: &mut BreakerState) {
        if state.state == CircuitState::HalfOpen && state.half_open_in_flight > 0 {
            state.half_open_in_flight -= 1;
        }
    }

    fn transition(&self, state: &mut BreakerState, next: CircuitState) {
        if state.state != next {
            tracing::warn!(
                endpoint = %self.endpoint,
                previous = ?state.state,
                next = ?next,
                consecutive_failures = state.consecutive_failures,
                "rpc circuit breaker state changed"
            );
            state.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn opens_after_threshold_and_recovers() {
        let breaker = RpcCircuitBreaker::new(2, Duration::from_millis(5), 1).for_endpoint("http://a");

        breaker.before_request().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);

        breaker.before_request().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.snapshot().state, CircuitState::Open);
        assert!(breaker.before_request().is_err());

        thread::sleep(Duration::from_millis(6));
        assert_eq!(breaker.before_request().unwrap(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = RpcCircuitBreaker::new(1, Duration::from_millis(5), 1);

        breaker.before_request().unwrap();
        breaker.record_failure();

        thread::sleep(Duration::from_millis(6));
        breaker.before_request().unwrap();
        assert!(breaker.before_request().is_err());
        breaker.record_failure();
        assert_eq!(breaker.snapshot().state, CircuitState::Open);
    }
}
