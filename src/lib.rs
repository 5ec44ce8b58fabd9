//! # cache-throttle
//!
//! Cache-aside reads and fixed-window rate limiting over a shared key-value
//! store.
//!
//! Two components sit between request handlers and a slow source of truth:
//!
//! - [`CacheAsideGateway`] serves reads from the store and, on a miss, runs
//!   the caller's compute function and writes the result back with a TTL.
//!   Writes to the source of truth are followed by explicit invalidation.
//! - [`WindowRateLimiter`] counts requests per caller identity in fixed time
//!   windows and rejects callers that exceed their limit, with a retry hint.
//!
//! Both talk to storage only through the [`KeyValueStore`] port, so the same
//! code runs against the in-process [`MemoryStore`] or, with the `redis-store`
//! feature, a Redis server shared by several instances.
//!
//! ## Quick Start
//!
//! ```rust
//! use cache_throttle::{
//!     CacheAsideGateway, CacheKey, MemoryStore, RateDecision, Ttl, WindowPolicy,
//!     WindowRateLimiter,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//! let gateway = CacheAsideGateway::new(Arc::clone(&store));
//! let limiter = WindowRateLimiter::new(store);
//!
//! // 10 requests per 60 second window
//! let window = WindowPolicy::new(60, 10).unwrap();
//!
//! match limiter.allow("ip:1.2.3.4", &window).await.unwrap() {
//!     RateDecision::Admitted => {
//!         let key = CacheKey::new("product", 42).unwrap();
//!         let ttl = Ttl::from_secs(300).unwrap();
//!         let name: String = gateway
//!             .get_or_compute(&key, ttl, || async { Ok::<_, String>("Widget".to_string()) })
//!             .await
//!             .unwrap();
//!         assert_eq!(name, "Widget");
//!     }
//!     RateDecision::Rejected { retry_after } => {
//!         println!("retry in {:?}", retry_after);
//!     }
//! }
//! # }
//! ```
//!
//! ## Request Shield
//!
//! [`RequestShield`] wires a limiter and a gateway into the usual request
//! path: reject over-limit callers first, then serve from cache; invalidate
//! only after a write has committed.
//!
//! ## Store Failures
//!
//! | Path | Store unreachable |
//! |------|-------------------|
//! | Cache read | Treated as a miss, value is computed |
//! | Cache write-back | Logged and counted, value still returned |
//! | Invalidation | Logged and counted, entry stale until its TTL |
//! | Rate limiting | Decided by [`FailurePolicy`]: admit (default) or reject |
//!
//! The failure policy is always explicit on a built limiter:
//!
//! ```rust
//! use cache_throttle::{FailurePolicy, MemoryStore, WindowPolicy, WindowRateLimiter};
//!
//! let window = WindowPolicy::new(60, 100).unwrap();
//! let limiter = WindowRateLimiter::builder(MemoryStore::new())
//!     .with_failure_policy(FailurePolicy::fail_closed_for(&window))
//!     .build();
//! assert!(matches!(limiter.failure_policy(), FailurePolicy::FailClosed { .. }));
//! ```
//!
//! An optional [`CircuitBreaker`] stops both components from calling a store
//! that keeps failing; a single trial call is let through after the recovery
//! timeout.
//!
//! ## Observability
//!
//! Every component records into a shared [`Metrics`] handle:
//!
//! ```rust
//! use cache_throttle::{CacheAsideGateway, MemoryStore, Metrics, WindowRateLimiter};
//! use std::sync::Arc;
//!
//! let metrics = Metrics::new();
//! let store = Arc::new(MemoryStore::new());
//! let gateway = CacheAsideGateway::builder(Arc::clone(&store))
//!     .with_metrics(metrics.clone())
//!     .build();
//! let limiter = WindowRateLimiter::builder(store)
//!     .with_metrics(metrics.clone())
//!     .build();
//!
//! let snapshot = metrics.snapshot();
//! println!("hit rate: {:.2}", snapshot.hit_rate());
//! println!("rejection rate: {:.2}", snapshot.rejection_rate());
//! ```
//!
//! Degraded paths (store errors, fail-open or fail-closed decisions, counters
//! left without expiry) are also logged through `tracing` at `warn` level.
//!
//! ## Known Limits
//!
//! - Fixed windows admit up to twice the limit across a window boundary.
//! - Concurrent misses on the same key all compute; there is no request
//!   coalescing.
//! - Prefix invalidation is best effort; entries a store cannot enumerate
//!   expire on their TTL.
//! - Cache entries live under `cache:` and counters under `rate:`; custom
//!   prefixes must not overlap when both components share a store.

// Domain layer - keys, policies and codecs
pub mod domain;

// Application layer - gateway, limiter and ports
pub mod application;

// Infrastructure layer - store and clock adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    codec::{BincodeCodec, Codec, CodecError, JsonCodec},
    key::{CacheKey, KeyError, Namespace, RateKey, DEFAULT_CACHE_PREFIX, DEFAULT_RATE_PREFIX},
    policy::{FailurePolicy, PolicyError, RateDecision, Ttl, WindowPolicy},
};

pub use application::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    gateway::{CacheAsideGateway, CacheAsideGatewayBuilder, CacheSource, Lookup, PrefixInvalidation},
    limiter::{WindowRateLimiter, WindowRateLimiterBuilder},
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, KeyTtl, KeyValueStore, PrefixDeletion, StoreError},
    shield::{RequestShield, ShieldError},
};

pub use infrastructure::{
    clock::SystemClock,
    memory_store::{MemoryStore, MemoryStoreConfig},
};

#[cfg(feature = "redis-store")]
pub use infrastructure::redis_store::{RedisStore, RedisStoreConfig};
