//! Request path wiring: rate limiter first, then the cache.
//!
//! A [`RequestShield`] is what an HTTP handler talks to. Reads go through
//! [`RequestShield::serve`], which rejects over-limit callers before any cache
//! or source-of-truth work happens. Writes go through
//! [`RequestShield::on_write`], which invalidates affected keys only after the
//! write has committed.

use crate::application::gateway::CacheAsideGateway;
use crate::application::limiter::WindowRateLimiter;
use crate::application::ports::KeyValueStore;
use crate::domain::codec::{BincodeCodec, Codec};
use crate::domain::key::{CacheKey, KeyError};
use crate::domain::policy::{RateDecision, Ttl, WindowPolicy};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Why a shielded read did not produce a value.
#[derive(Debug, Error)]
pub enum ShieldError<E> {
    /// The caller exceeded its window; the surrounding layer should answer
    /// with a rate-limit response carrying this retry hint
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Time until the caller's window closes
        retry_after: Duration,
    },
    /// The identity could not be turned into a counter key
    #[error(transparent)]
    InvalidIdentity(#[from] KeyError),
    /// The compute function failed
    #[error("compute failed: {0}")]
    Compute(E),
}

/// Limiter and gateway sharing one store and one window policy.
#[derive(Debug, Clone)]
pub struct RequestShield<S, C = BincodeCodec> {
    limiter: WindowRateLimiter<S>,
    gateway: CacheAsideGateway<S, C>,
    window: WindowPolicy,
}

impl<S, C> RequestShield<S, C>
where
    S: KeyValueStore,
    C: Codec,
{
    pub fn new(
        limiter: WindowRateLimiter<S>,
        gateway: CacheAsideGateway<S, C>,
        window: WindowPolicy,
    ) -> Self {
        Self {
            limiter,
            gateway,
            window,
        }
    }

    /// Admit `identity`, then serve `key` from the cache or from `compute`.
    ///
    /// # Errors
    /// [`ShieldError::RateLimited`] if the caller is over its limit (the
    /// compute function is not invoked), [`ShieldError::Compute`] if the
    /// compute function fails.
    pub async fn serve<T, E, F, Fut>(
        &self,
        identity: &str,
        key: &CacheKey,
        ttl: Ttl,
        compute: F,
    ) -> Result<T, ShieldError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let RateDecision::Rejected { retry_after } =
            self.limiter.allow(identity, &self.window).await?
        {
            return Err(ShieldError::RateLimited { retry_after });
        }

        self.gateway
            .get_or_compute(key, ttl, compute)
            .await
            .map_err(ShieldError::Compute)
    }

    /// Run a source-of-truth write, then invalidate `keys`.
    ///
    /// # Errors
    /// Returns the error of `write`; nothing is invalidated in that case.
    pub async fn on_write<R, E, W>(&self, keys: &[CacheKey], write: W) -> Result<R, E>
    where
        W: Future<Output = Result<R, E>>,
    {
        self.gateway.commit_then_invalidate(keys, write).await
    }

    pub fn limiter(&self) -> &WindowRateLimiter<S> {
        &self.limiter
    }

    pub fn gateway(&self) -> &CacheAsideGateway<S, C> {
        &self.gateway
    }

    pub fn window(&self) -> &WindowPolicy {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::metrics::Metrics;
    use crate::infrastructure::memory_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn shield(max_requests: u64) -> RequestShield<Arc<MemoryStore>> {
        let store = Arc::new(MemoryStore::new());
        let metrics = Metrics::new();
        let limiter = WindowRateLimiter::builder(Arc::clone(&store))
            .with_metrics(metrics.clone())
            .build();
        let gateway = CacheAsideGateway::builder(store)
            .with_metrics(metrics)
            .build();
        RequestShield::new(
            limiter,
            gateway,
            WindowPolicy::new(60, max_requests).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_rejected_caller_never_computes() {
        let shield = shield(1);
        let key = CacheKey::new("product", 1).unwrap();
        let ttl = Ttl::from_secs(60).unwrap();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let first: Result<u64, ShieldError<String>> = shield
            .serve("ip:1.2.3.4", &key, ttl, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;
        assert_eq!(first.unwrap(), 1);

        let second: Result<u64, ShieldError<String>> = shield
            .serve("ip:1.2.3.4", &key, ttl, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await;
        match second {
            Err(ShieldError::RateLimited { retry_after }) => {
                assert!(retry_after <= Duration::from_secs(60));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compute_error_is_wrapped() {
        let shield = shield(10);
        let key = CacheKey::new("product", 1).unwrap();
        let ttl = Ttl::from_secs(60).unwrap();

        let result: Result<u64, ShieldError<&str>> = shield
            .serve("id", &key, ttl, || async { Err("db down") })
            .await;
        assert!(matches!(result, Err(ShieldError::Compute("db down"))));
    }

    #[tokio::test]
    async fn test_invalid_identity() {
        let shield = shield(10);
        let key = CacheKey::new("product", 1).unwrap();
        let ttl = Ttl::from_secs(60).unwrap();

        let result: Result<u64, ShieldError<String>> =
            shield.serve("", &key, ttl, || async { Ok(1) }).await;
        assert!(matches!(
            result,
            Err(ShieldError::InvalidIdentity(KeyError::EmptyIdentity))
        ));
    }

    #[tokio::test]
    async fn test_write_path_invalidates_after_commit() {
        let shield = shield(10);
        let key = CacheKey::new("product", 1).unwrap();
        let ttl = Ttl::from_secs(60).unwrap();

        let _: Result<String, ShieldError<String>> = shield
            .serve("id", &key, ttl, || async { Ok("old".to_string()) })
            .await;
        shield
            .on_write(&[key.clone()], async { Ok::<_, String>(()) })
            .await
            .unwrap();

        let fresh: Result<String, ShieldError<String>> = shield
            .serve("id", &key, ttl, || async { Ok("new".to_string()) })
            .await;
        assert_eq!(fresh.unwrap(), "new");

        let snapshot = shield.gateway().metrics().snapshot();
        assert_eq!(snapshot.cache_misses, 2);
        assert_eq!(snapshot.requests_admitted, 2);
    }
}
