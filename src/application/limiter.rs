//! Fixed-window rate limiter.
//!
//! Each identity gets one counter per window in the shared store. The first
//! request of a window creates the counter and arms its expiry; every later
//! request in that window only increments it. Once the counter exceeds the
//! limit, requests are rejected until the store expires the counter.
//!
//! The expiry is armed exactly once per window. It is never pushed back by
//! later increments, so a window ends exactly `window` seconds after its
//! first request.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::metrics::Metrics;
use crate::application::ports::{KeyTtl, KeyValueStore, StoreError};
use crate::domain::key::{KeyError, RateKey, DEFAULT_RATE_PREFIX};
use crate::domain::policy::{FailurePolicy, RateDecision, WindowPolicy};
use std::sync::Arc;

/// Coordinates admission decisions against the shared store.
#[derive(Debug, Clone)]
pub struct WindowRateLimiter<S> {
    store: S,
    failure_policy: FailurePolicy,
    key_prefix: String,
    metrics: Metrics,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

/// Builder for [`WindowRateLimiter`].
#[derive(Debug)]
pub struct WindowRateLimiterBuilder<S> {
    store: S,
    failure_policy: FailurePolicy,
    key_prefix: String,
    metrics: Option<Metrics>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl<S> WindowRateLimiterBuilder<S>
where
    S: KeyValueStore,
{
    /// Decide what happens when the store cannot be consulted.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Prefix of counter keys (default `"rate:"`).
    ///
    /// Must not overlap the gateway's entry prefix when both share a store.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Apply the failure policy without calling the store while `breaker`
    /// reports it unhealthy.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn build(self) -> WindowRateLimiter<S> {
        WindowRateLimiter {
            store: self.store,
            failure_policy: self.failure_policy,
            key_prefix: self.key_prefix,
            metrics: self.metrics.unwrap_or_default(),
            circuit_breaker: self.circuit_breaker,
        }
    }
}

impl<S> WindowRateLimiter<S>
where
    S: KeyValueStore,
{
    /// Create a limiter that fails open.
    pub fn new(store: S) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: S) -> WindowRateLimiterBuilder<S> {
        WindowRateLimiterBuilder {
            store,
            failure_policy: FailurePolicy::default(),
            key_prefix: DEFAULT_RATE_PREFIX.to_string(),
            metrics: None,
            circuit_breaker: None,
        }
    }

    /// Count a request from `identity` and decide whether to admit it.
    ///
    /// The first `max_requests` calls of a window are admitted, later ones are
    /// rejected with the time left in the window as retry hint.
    ///
    /// # Errors
    /// Returns [`KeyError::EmptyIdentity`] if `identity` is empty. Store
    /// failures are never returned; they resolve through the failure policy.
    pub async fn allow(
        &self,
        identity: &str,
        policy: &WindowPolicy,
    ) -> Result<RateDecision, KeyError> {
        let key = RateKey::new(&self.key_prefix, identity, policy.window_secs())?;

        if !self.store_allowed() {
            return Ok(self.apply_failure_policy(&key, None));
        }

        let count = match self.increment(&key, policy).await {
            Ok(count) => count,
            Err(e) => return Ok(self.apply_failure_policy(&key, Some(&e))),
        };

        let decision = if count <= policy.max_requests() {
            RateDecision::Admitted
        } else {
            let remaining = self.remaining_window(&key, policy).await;
            policy.decide(count, remaining)
        };

        match decision {
            RateDecision::Admitted => self.metrics.record_admitted(),
            RateDecision::Rejected { retry_after } => {
                self.metrics.record_rejected();
                tracing::debug!(
                    key = %key,
                    count,
                    max_requests = policy.max_requests(),
                    retry_after = ?retry_after,
                    "Request rejected"
                );
            }
        }

        Ok(decision)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Increment the window counter, arming its expiry on creation.
    async fn increment(&self, key: &RateKey, policy: &WindowPolicy) -> Result<u64, StoreError> {
        let window = policy.window();

        match self.store.increment_with_expiry(key.as_str(), window).await {
            Ok(Some(count)) => {
                self.record_store_success();
                return Ok(count);
            }
            Ok(None) => {}
            Err(e) => {
                self.record_store_failure();
                return Err(e);
            }
        }

        let count = match self.store.increment_and_get(key.as_str()).await {
            Ok(count) => {
                self.record_store_success();
                count
            }
            Err(e) => {
                self.record_store_failure();
                return Err(e);
            }
        };

        if count == 1 {
            self.arm_expiry(key, policy).await;
        }

        Ok(count)
    }

    /// Arm the window expiry on a freshly created counter, retrying once.
    ///
    /// A counter left without expiry is picked up later by reconciliation, so
    /// failure here never fails the request.
    async fn arm_expiry(&self, key: &RateKey, policy: &WindowPolicy) {
        for attempt in 1..=2u8 {
            match self
                .store
                .set_expiry_if_none_set(key.as_str(), policy.window())
                .await
            {
                Ok(_) => {
                    self.record_store_success();
                    return;
                }
                Err(e) => {
                    self.record_store_failure();
                    tracing::warn!(key = %key, attempt, error = %e, "Failed to arm rate window expiry");
                }
            }
        }
        self.metrics.record_expiry_failure();
    }

    /// Time left in the current window, re-arming the expiry of a counter that
    /// lost it.
    async fn remaining_window(
        &self,
        key: &RateKey,
        policy: &WindowPolicy,
    ) -> Option<std::time::Duration> {
        match self.store.time_to_live(key.as_str()).await {
            Ok(KeyTtl::Expires(remaining)) => {
                self.record_store_success();
                Some(remaining)
            }
            Ok(KeyTtl::Persistent) => {
                self.record_store_success();
                self.reconcile(key, policy).await;
                None
            }
            // Expired between the increment and this query
            Ok(KeyTtl::Missing) => {
                self.record_store_success();
                Some(std::time::Duration::ZERO)
            }
            Err(e) => {
                self.record_store_failure();
                tracing::debug!(key = %key, error = %e, "Failed to read rate window ttl");
                None
            }
        }
    }

    async fn reconcile(&self, key: &RateKey, policy: &WindowPolicy) {
        match self
            .store
            .set_expiry_if_none_set(key.as_str(), policy.window())
            .await
        {
            Ok(armed) => {
                self.record_store_success();
                if armed {
                    self.metrics.record_reconciliation();
                    tracing::warn!(key = %key, window = %policy.window(), "Re-armed expiry of leaked rate counter");
                }
            }
            Err(e) => {
                self.record_store_failure();
                tracing::warn!(key = %key, error = %e, "Failed to re-arm leaked rate counter");
            }
        }
    }

    fn apply_failure_policy(&self, key: &RateKey, error: Option<&StoreError>) -> RateDecision {
        let decision = self.failure_policy.decision();
        match decision {
            RateDecision::Admitted => {
                self.metrics.record_admitted();
                self.metrics.record_fail_open();
            }
            RateDecision::Rejected { .. } => {
                self.metrics.record_rejected();
                self.metrics.record_fail_closed();
            }
        }

        match error {
            Some(e) => tracing::warn!(
                key = %key,
                error = %e,
                policy = ?self.failure_policy,
                "Rate limit store unavailable, applying failure policy"
            ),
            None => tracing::debug!(
                key = %key,
                policy = ?self.failure_policy,
                "Store circuit open, applying failure policy"
            ),
        }

        decision
    }

    fn store_allowed(&self) -> bool {
        self.circuit_breaker
            .as_ref()
            .map_or(true, |cb| cb.allow_request())
    }

    fn record_store_success(&self) {
        if let Some(cb) = &self.circuit_breaker {
            cb.record_success();
        }
    }

    fn record_store_failure(&self) {
        self.metrics.record_store_error();
        if let Some(cb) = &self.circuit_breaker {
            cb.record_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::infrastructure::memory_store::MemoryStore;
    use crate::infrastructure::mocks::{FaultyStore, MockClock, StoreOp};
    use std::time::{Duration, Instant};

    fn clocked_store() -> (Arc<MemoryStore>, MockClock) {
        let clock = MockClock::new(Instant::now());
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        (store, clock)
    }

    #[tokio::test]
    async fn test_admits_exactly_max_requests() {
        let limiter = WindowRateLimiter::new(MemoryStore::new());
        let policy = WindowPolicy::new(60, 10).unwrap();

        for _ in 0..10 {
            let decision = limiter.allow("ip:1.2.3.4", &policy).await.unwrap();
            assert!(decision.is_admitted());
        }

        let decision = limiter.allow("ip:1.2.3.4", &policy).await.unwrap();
        assert!(decision.is_rejected());
        let retry = decision.retry_after_secs().unwrap();
        assert!(retry <= 60);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let limiter = WindowRateLimiter::new(MemoryStore::new());
        let policy = WindowPolicy::new(60, 1).unwrap();

        assert!(limiter.allow("alice", &policy).await.unwrap().is_admitted());
        assert!(limiter.allow("bob", &policy).await.unwrap().is_admitted());
        assert!(limiter.allow("alice", &policy).await.unwrap().is_rejected());
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let (store, clock) = clocked_store();
        let limiter = WindowRateLimiter::new(store);
        let policy = WindowPolicy::new(60, 2).unwrap();

        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        assert!(limiter.allow("id", &policy).await.unwrap().is_rejected());

        clock.advance(Duration::from_secs(61));
        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        assert!(limiter.allow("id", &policy).await.unwrap().is_rejected());
    }

    #[tokio::test]
    async fn test_expiry_not_extended_by_later_requests() {
        let (store, clock) = clocked_store();
        let limiter = WindowRateLimiter::new(store);
        let policy = WindowPolicy::new(60, 1).unwrap();

        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        clock.advance(Duration::from_secs(40));

        let decision = limiter.allow("id", &policy).await.unwrap();
        assert_eq!(decision.retry_after_secs(), Some(20));

        clock.advance(Duration::from_secs(20));
        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn test_boundary_allows_double_burst() {
        let (store, clock) = clocked_store();
        let limiter = WindowRateLimiter::new(store);
        let policy = WindowPolicy::new(10, 3).unwrap();

        // First request opens the window, the rest of the burst lands at its end
        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        clock.advance(Duration::from_secs(9));
        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());

        clock.advance(Duration::from_secs(1));
        for _ in 0..3 {
            assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        }
    }

    #[tokio::test]
    async fn test_empty_identity_rejected() {
        let limiter = WindowRateLimiter::new(MemoryStore::new());
        let policy = WindowPolicy::new(60, 1).unwrap();
        assert_eq!(
            limiter.allow("", &policy).await,
            Err(KeyError::EmptyIdentity)
        );
    }

    #[tokio::test]
    async fn test_fail_open_by_default() {
        let store = FaultyStore::new(MemoryStore::new());
        store.fail_all(true);
        let limiter = WindowRateLimiter::new(store);
        let policy = WindowPolicy::new(60, 1).unwrap();

        for _ in 0..5 {
            assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        }
        let snapshot = limiter.metrics().snapshot();
        assert_eq!(snapshot.fail_open_admissions, 5);
        assert_eq!(snapshot.requests_admitted, 5);
    }

    #[tokio::test]
    async fn test_fail_closed_when_configured() {
        let store = FaultyStore::new(MemoryStore::new());
        store.fail_all(true);
        let limiter = WindowRateLimiter::builder(store)
            .with_failure_policy(FailurePolicy::FailClosed {
                retry_after: Duration::from_secs(5),
            })
            .build();
        let policy = WindowPolicy::new(60, 100).unwrap();

        let decision = limiter.allow("id", &policy).await.unwrap();
        assert_eq!(
            decision,
            RateDecision::Rejected {
                retry_after: Duration::from_secs(5)
            }
        );
        assert_eq!(limiter.metrics().snapshot().fail_closed_rejections, 1);
    }

    #[tokio::test]
    async fn test_unreadable_ttl_retries_after_full_window() {
        let store = FaultyStore::new(MemoryStore::new());
        let limiter = WindowRateLimiter::new(store.clone());
        let policy = WindowPolicy::new(30, 1).unwrap();

        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());

        // Counting still works; only the ttl lookup fails
        store.fail_reads(true);
        let decision = limiter.allow("id", &policy).await.unwrap();

        assert!(decision.is_rejected());
        assert_eq!(decision.retry_after_secs(), Some(30));
        assert_eq!(store.calls(StoreOp::TimeToLive), 1);
        let snapshot = limiter.metrics().snapshot();
        assert_eq!(snapshot.store_errors, 1);
        assert_eq!(snapshot.requests_rejected, 1);
        assert_eq!(snapshot.fail_closed_rejections, 0);
    }

    #[tokio::test]
    async fn test_fallback_path_arms_expiry_once() {
        let (inner, clock) = clocked_store();
        let store = FaultyStore::new(inner);
        store.disable_atomic_increment();
        let limiter = WindowRateLimiter::new(store.clone());
        let policy = WindowPolicy::new(30, 5).unwrap();

        for _ in 0..4 {
            limiter.allow("id", &policy).await.unwrap();
        }
        assert_eq!(store.calls(StoreOp::IncrementAndGet), 4);
        assert_eq!(store.calls(StoreOp::SetExpiryIfNoneSet), 1);

        clock.advance(Duration::from_secs(30));
        assert_eq!(
            store.inner().time_to_live("rate:id:30").await.unwrap(),
            KeyTtl::Missing
        );
    }

    #[tokio::test]
    async fn test_failed_expiry_is_retried_then_reconciled() {
        let (inner, clock) = clocked_store();
        let store = FaultyStore::new(inner);
        store.disable_atomic_increment();
        store.fail_expiry(true);
        let limiter = WindowRateLimiter::new(store.clone());
        let policy = WindowPolicy::new(60, 1).unwrap();

        // The increment succeeds; both expiry attempts fail
        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        assert_eq!(store.calls(StoreOp::SetExpiryIfNoneSet), 2);
        assert_eq!(limiter.metrics().snapshot().expiry_failures, 1);
        assert_eq!(
            store.inner().time_to_live("rate:id:60").await.unwrap(),
            KeyTtl::Persistent
        );

        // The next rejection notices the leaked counter and re-arms it
        store.fail_expiry(false);
        let decision = limiter.allow("id", &policy).await.unwrap();
        assert_eq!(decision.retry_after_secs(), Some(60));
        assert_eq!(limiter.metrics().snapshot().reconciliations, 1);

        clock.advance(Duration::from_secs(60));
        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn test_open_circuit_skips_store() {
        let store = FaultyStore::new(MemoryStore::new());
        store.fail_all(true);
        let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        }));
        let limiter = WindowRateLimiter::builder(store.clone())
            .with_circuit_breaker(Arc::clone(&breaker))
            .build();
        let policy = WindowPolicy::new(60, 1).unwrap();

        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        assert_eq!(breaker.state(), CircuitState::Open);
        let calls = store.calls(StoreOp::IncrementWithExpiry);

        assert!(limiter.allow("id", &policy).await.unwrap().is_admitted());
        assert_eq!(store.calls(StoreOp::IncrementWithExpiry), calls);
        assert_eq!(limiter.metrics().snapshot().fail_open_admissions, 2);
    }

    #[tokio::test]
    async fn test_custom_key_prefix() {
        let store = Arc::new(MemoryStore::new());
        let limiter = WindowRateLimiter::builder(Arc::clone(&store))
            .with_key_prefix("throttle:")
            .build();
        let policy = WindowPolicy::new(60, 1).unwrap();

        limiter.allow("id", &policy).await.unwrap();
        assert!(store.contains("throttle:id:60"));
    }
}
