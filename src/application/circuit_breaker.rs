//! Circuit breaker guarding calls to the key-value store.
//!
//! When the store fails repeatedly, hammering it with every request only adds
//! latency. The breaker opens after a run of consecutive failures; while open,
//! the gateway computes values without touching the store and the limiter
//! applies its failure policy directly. After the recovery timeout a single
//! trial call is let through to test whether the store is back.

use crate::application::ports::Clock;
use crate::infrastructure::clock::SystemClock;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Store calls proceed normally
    Closed = 0,
    /// Store calls are skipped
    Open = 1,
    /// One trial call is in flight
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive store failures before opening circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call is allowed
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Store health guard shared by the gateway and the limiter.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    /// Nanos since `epoch` of the last transition into Open or HalfOpen
    last_transition_nanos: AtomicU64,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a circuit breaker with default configuration.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a circuit breaker that reads time from `clock`.
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            last_transition_nanos: AtomicU64::new(0),
            config,
            clock,
            epoch,
        }
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check whether the store may be called now.
    ///
    /// Returns `false` while the circuit is open. Once the recovery timeout
    /// has elapsed exactly one caller wins the transition to half-open and
    /// gets `true`; the others keep getting `false` until the trial call reports.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                self.recovery_elapsed() && self.try_transition(CircuitState::Open)
            }
            // A trial call that never reported back (cancelled caller) must not
            // wedge the breaker: after another timeout, let a new trial call in.
            CircuitState::HalfOpen => {
                self.recovery_elapsed() && self.try_transition(CircuitState::HalfOpen)
            }
        }
    }

    fn try_transition(&self, from: CircuitState) -> bool {
        let won = self
            .state
            .compare_exchange(
                from as u8,
                CircuitState::HalfOpen as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.mark_transition();
        }
        won
    }

    /// Record a successful store call.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self.state() == CircuitState::HalfOpen {
            self.state
                .store(CircuitState::Closed as u8, Ordering::Release);
        }
    }

    /// Record a failed store call.
    pub fn record_failure(&self) {
        let failures = self
            .consecutive_failures
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);

        match self.state() {
            CircuitState::HalfOpen => {
                self.state
                    .store(CircuitState::Open as u8, Ordering::Release);
                self.mark_transition();
            }
            CircuitState::Closed => {
                if failures >= u64::from(self.config.failure_threshold) {
                    self.state
                        .store(CircuitState::Open as u8, Ordering::Release);
                    self.mark_transition();
                    tracing::warn!(
                        failures,
                        recovery_timeout = ?self.config.recovery_timeout,
                        "Store circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Get the number of consecutive failures.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    fn mark_transition(&self) {
        let nanos = self
            .clock
            .now()
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX);
        self.last_transition_nanos.store(nanos, Ordering::Release);
    }

    fn recovery_elapsed(&self) -> bool {
        let nanos = self.last_transition_nanos.load(Ordering::Acquire);
        let since = self.epoch + Duration::from_nanos(nanos);
        self.clock.now().saturating_duration_since(since) >= self.config.recovery_timeout
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use std::thread;

    fn breaker(threshold: u32, recovery_secs: u64) -> (CircuitBreaker, MockClock) {
        let clock = MockClock::new(Instant::now());
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(recovery_secs),
        };
        (
            CircuitBreaker::with_clock(config, Arc::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn test_initial_state() {
        let cb = CircuitBreaker::new();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_failure_threshold() {
        let (cb, _clock) = breaker(3, 10);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 2);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (cb, _clock) = breaker(3, 10);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_single_trial_call_after_recovery_timeout() {
        let (cb, clock) = breaker(1, 10);
        cb.record_failure();
        assert!(!cb.allow_request());

        clock.advance(Duration::from_secs(10));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Other callers wait for the trial call
        assert!(!cb.allow_request());
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_trial_call_success_closes_circuit() {
        let (cb, clock) = breaker(1, 10);
        cb.record_failure();
        clock.advance(Duration::from_secs(11));
        assert!(cb.allow_request());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_trial_call_failure_reopens_circuit() {
        let (cb, clock) = breaker(1, 10);
        cb.record_failure();
        clock.advance(Duration::from_secs(11));
        assert!(cb.allow_request());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());

        // A full recovery timeout is required again
        clock.advance(Duration::from_secs(5));
        assert!(!cb.allow_request());
        clock.advance(Duration::from_secs(5));
        assert!(cb.allow_request());
    }

    #[test]
    fn test_abandoned_trial_call_is_replaced() {
        let (cb, clock) = breaker(1, 10);
        cb.record_failure();
        clock.advance(Duration::from_secs(10));
        assert!(cb.allow_request());

        // The trial call never reports; after another timeout a new one goes out
        clock.advance(Duration::from_secs(10));
        assert!(cb.allow_request());
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_reset() {
        let (cb, _clock) = breaker(1, 10);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_concurrent_trial_call_has_single_winner() {
        let (cb, clock) = breaker(1, 10);
        cb.record_failure();
        clock.advance(Duration::from_secs(10));

        let cb = Arc::new(cb);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || cb.allow_request())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_concurrent_failures() {
        let (cb, _clock) = breaker(100, 10);
        let cb = Arc::new(cb);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || {
                    for _ in 0..10 {
                        cb.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cb.consecutive_failures(), 100);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_invalid_state_value_reads_as_closed() {
        assert_eq!(CircuitState::from(7), CircuitState::Closed);
    }
}
