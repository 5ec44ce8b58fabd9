//! Cache-aside read-through gateway.
//!
//! The gateway sits in front of a slow source of truth. A lookup first asks
//! the store; on a hit the stored value is decoded and returned, on a miss the
//! caller's compute function runs and its result is written back with a TTL.
//!
//! ## Failure handling
//!
//! - A store failure on read is treated like a miss: the value is computed.
//!   A store outage costs latency, never correctness.
//! - A stored payload that does not decode is treated like a miss and gets
//!   overwritten by the fresh value.
//! - A store failure on write-back or invalidation is logged and counted;
//!   the caller still receives the value it asked for.
//! - A failing compute function is returned to the caller unchanged and
//!   nothing is written.
//!
//! ## Concurrent misses
//!
//! Concurrent lookups that all miss the same key each run the compute
//! function and each write the result back (last writer wins). There is no
//! single-flight coalescing, so a hot key expiring under load sends a burst
//! of identical computations to the source of truth.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::metrics::Metrics;
use crate::application::ports::{KeyValueStore, PrefixDeletion};
use crate::domain::codec::{BincodeCodec, Codec};
use crate::domain::key::{CacheKey, Namespace, DEFAULT_CACHE_PREFIX};
use crate::domain::policy::Ttl;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Where a looked-up value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Decoded from the store
    Hit,
    /// Computed after the store had nothing usable
    Miss,
    /// Computed without consulting the store (circuit open)
    Bypassed,
}

/// A value together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup<T> {
    pub value: T,
    pub source: CacheSource,
}

/// Outcome of a bulk invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixInvalidation {
    /// This many entries were removed immediately
    Deleted(u64),
    /// Nothing was removed; stale entries live until their TTL runs out
    TtlBounded,
}

/// Read-through cache over a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct CacheAsideGateway<S, C = BincodeCodec> {
    store: S,
    codec: C,
    key_prefix: String,
    metrics: Metrics,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

/// Builder for [`CacheAsideGateway`].
#[derive(Debug)]
pub struct CacheAsideGatewayBuilder<S, C = BincodeCodec> {
    store: S,
    codec: C,
    key_prefix: String,
    metrics: Option<Metrics>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl<S> CacheAsideGateway<S, BincodeCodec>
where
    S: KeyValueStore,
{
    /// Create a gateway with the default codec and no circuit breaker.
    pub fn new(store: S) -> Self {
        Self::builder(store).build()
    }

    /// Start configuring a gateway.
    pub fn builder(store: S) -> CacheAsideGatewayBuilder<S, BincodeCodec> {
        CacheAsideGatewayBuilder {
            store,
            codec: BincodeCodec,
            key_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            metrics: None,
            circuit_breaker: None,
        }
    }
}

impl<S, C> CacheAsideGatewayBuilder<S, C>
where
    S: KeyValueStore,
    C: Codec,
{
    /// Replace the payload codec.
    pub fn with_codec<C2: Codec>(self, codec: C2) -> CacheAsideGatewayBuilder<S, C2> {
        CacheAsideGatewayBuilder {
            store: self.store,
            codec,
            key_prefix: self.key_prefix,
            metrics: self.metrics,
            circuit_breaker: self.circuit_breaker,
        }
    }

    /// Store prefix of cache entries (default `"cache:"`).
    ///
    /// Must not overlap the limiter's counter prefix when both share a store.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Record into an existing metrics handle (e.g. one shared with a limiter).
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Skip the store while `breaker` reports it unhealthy.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn build(self) -> CacheAsideGateway<S, C> {
        CacheAsideGateway {
            store: self.store,
            codec: self.codec,
            key_prefix: self.key_prefix,
            metrics: self.metrics.unwrap_or_default(),
            circuit_breaker: self.circuit_breaker,
        }
    }
}

impl<S, C> CacheAsideGateway<S, C>
where
    S: KeyValueStore,
    C: Codec,
{
    /// Return the cached value for `key`, computing and caching it on a miss.
    ///
    /// # Errors
    /// Returns the compute function's error unchanged. Store and decoding
    /// failures are never returned.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Ttl,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.lookup(key, ttl, compute).await.map(|l| l.value)
    }

    /// Like [`CacheAsideGateway::get_or_compute`], also reporting whether the
    /// value was a hit, a miss or a bypass.
    ///
    /// # Errors
    /// Returns the compute function's error unchanged.
    pub async fn lookup<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Ttl,
        compute: F,
    ) -> Result<Lookup<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let use_store = self.store_allowed();

        if use_store {
            if let Some(value) = self.read_cached(key).await {
                self.metrics.record_hit();
                tracing::debug!(key = %key, "Cache hit");
                return Ok(Lookup {
                    value,
                    source: CacheSource::Hit,
                });
            }
        }

        let value = match compute().await {
            Ok(value) => value,
            Err(e) => {
                self.metrics.record_compute_failure();
                tracing::debug!(key = %key, "Compute failed, nothing cached");
                return Err(e);
            }
        };

        let source = if use_store {
            self.metrics.record_miss();
            if self.circuit_open() {
                tracing::debug!(key = %key, "Store circuit opened during lookup, skipping write-back");
            } else {
                self.populate(key, ttl, &value).await;
            }
            CacheSource::Miss
        } else {
            self.metrics.record_bypass();
            tracing::debug!(key = %key, "Store circuit open, computed without cache");
            CacheSource::Bypassed
        };

        Ok(Lookup { value, source })
    }

    /// Remove `key` from the cache.
    ///
    /// Call this after the write to the source of truth has committed, never
    /// before: deleting first leaves a window in which a concurrent reader
    /// repopulates the cache with the pre-write value.
    ///
    /// Removing a key that is not cached is a no-op. A store failure is logged
    /// and counted, and the stale entry then lives until its TTL expires. The
    /// store is asked even while the circuit is open.
    pub async fn invalidate(&self, key: &CacheKey) {
        match self.store.delete(&self.store_key(key)).await {
            Ok(()) => {
                self.record_store_success();
                self.metrics.record_invalidation();
                tracing::debug!(key = %key, "Cache entry invalidated");
            }
            Err(e) => {
                self.record_store_failure();
                self.metrics.record_invalidation_failure();
                tracing::warn!(
                    key = %key,
                    error = %e,
                    store = self.store.name(),
                    "Failed to invalidate cache entry, stale until ttl"
                );
            }
        }
    }

    /// Remove every entry of `namespace`, as far as the store allows.
    ///
    /// Best effort: a store that cannot enumerate keys, or that fails, leaves
    /// the entries to expire on their own. Callers must tolerate stale reads
    /// for up to the TTL those entries were written with.
    pub async fn invalidate_prefix(&self, namespace: &Namespace) -> PrefixInvalidation {
        let prefix = format!("{}{}", self.key_prefix, namespace.prefix());
        match self.store.delete_prefix(&prefix).await {
            Ok(PrefixDeletion::Deleted(count)) => {
                self.record_store_success();
                self.metrics.record_invalidation();
                tracing::debug!(namespace = %namespace, count, "Cache namespace invalidated");
                PrefixInvalidation::Deleted(count)
            }
            Ok(PrefixDeletion::Unsupported) => {
                tracing::debug!(
                    namespace = %namespace,
                    store = self.store.name(),
                    "Store cannot delete by prefix, relying on ttl expiry"
                );
                PrefixInvalidation::TtlBounded
            }
            Err(e) => {
                self.record_store_failure();
                self.metrics.record_invalidation_failure();
                tracing::warn!(
                    namespace = %namespace,
                    error = %e,
                    "Failed to invalidate cache namespace, stale until ttl"
                );
                PrefixInvalidation::TtlBounded
            }
        }
    }

    /// Run a write against the source of truth, then invalidate `keys`.
    ///
    /// Keys are invalidated only once `write` has completed successfully. A
    /// failed write invalidates nothing and its error is returned unchanged.
    ///
    /// # Errors
    /// Returns the error of `write`.
    pub async fn commit_then_invalidate<R, E, W>(&self, keys: &[CacheKey], write: W) -> Result<R, E>
    where
        W: Future<Output = Result<R, E>>,
    {
        let committed = write.await?;
        for key in keys {
            self.invalidate(key).await;
        }
        Ok(committed)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn read_cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let bytes = match self.store.get(&self.store_key(key)).await {
            Ok(Some(bytes)) => {
                self.record_store_success();
                bytes
            }
            Ok(None) => {
                self.record_store_success();
                return None;
            }
            Err(e) => {
                self.record_store_failure();
                tracing::warn!(
                    key = %key,
                    error = %e,
                    store = self.store.name(),
                    "Cache read failed, computing from source"
                );
                return None;
            }
        };

        match self.codec.decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.metrics.record_decode_failure();
                tracing::warn!(
                    key = %key,
                    error = %e,
                    codec = self.codec.name(),
                    "Undecodable cache entry, treating as miss"
                );
                None
            }
        }
    }

    async fn populate<T: Serialize>(&self, key: &CacheKey, ttl: Ttl, value: &T) {
        let bytes = match self.codec.encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics.record_populate_failure();
                tracing::warn!(key = %key, error = %e, "Failed to encode value for cache");
                return;
            }
        };

        match self
            .store
            .set_with_expiry(&self.store_key(key), &bytes, ttl)
            .await
        {
            Ok(()) => {
                self.record_store_success();
                tracing::debug!(key = %key, ttl = %ttl, "Cache populated");
            }
            Err(e) => {
                self.record_store_failure();
                self.metrics.record_populate_failure();
                tracing::warn!(
                    key = %key,
                    error = %e,
                    store = self.store.name(),
                    "Failed to populate cache"
                );
            }
        }
    }

    /// Where `key` lives in the store.
    fn store_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn store_allowed(&self) -> bool {
        self.circuit_breaker
            .as_ref()
            .map_or(true, |cb| cb.allow_request())
    }

    fn circuit_open(&self) -> bool {
        self.circuit_breaker.as_ref().is_some_and(|cb| {
            cb.state() == crate::application::circuit_breaker::CircuitState::Open
        })
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
