//! Application layer - orchestration of domain logic against the store.
//!
//! - Cache-aside gateway (read-through and invalidation)
//! - Fixed-window rate limiter
//! - Request shield combining both
//! - Store circuit breaker and metrics
//!
//! ## Ports
//!
//! [`ports::KeyValueStore`] and [`ports::Clock`] are the only ways this layer
//! reaches the outside world. Adapters live in `infrastructure`.

pub mod circuit_breaker;
pub mod gateway;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod shield;
