//! Infrastructure layer - adapters for the application ports.
//!
//! - Clock (system time)
//! - In-process store (sharded map with lazy expiry)
//! - Redis store (behind the `redis-store` feature)

pub mod clock;
pub mod memory_store;

#[cfg(feature = "redis-store")]
pub mod redis_store;

/// Test doubles for the store and clock ports.
///
/// Available during test builds or with the `test-helpers` feature:
/// ```toml
/// [dev-dependencies]
/// cache-throttle = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
