//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::policy::Ttl;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failure of a key-value store operation.
///
/// Every variant belongs to the "store unavailable" class: the caller learned
/// nothing about the key and may fall back or retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connection refused, dropped or otherwise unusable
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Adapter-specific description
        reason: String,
    },
    /// The operation did not finish in time
    #[error("store operation timed out after {after:?}")]
    Timeout {
        /// The timeout that elapsed
        after: Duration,
    },
    /// The store answered with something the adapter did not expect
    #[error("unexpected store reply: {reason}")]
    UnexpectedReply {
        /// Adapter-specific description
        reason: String,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Remaining lifetime of a key as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist
    Missing,
    /// The key exists but carries no expiry
    Persistent,
    /// The key expires after this duration
    Expires(Duration),
}

impl KeyTtl {
    /// The remaining lifetime, if the key exists and expires.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) => Some(*d),
            KeyTtl::Missing | KeyTtl::Persistent => None,
        }
    }
}

/// Result of a bulk deletion by key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixDeletion {
    /// This many keys were deleted
    Deleted(u64),
    /// The store cannot enumerate keys by prefix
    Unsupported,
}

/// Port for the shared key-value store.
///
/// The six required primitives are the only way the cache and the limiter
/// touch shared state. All of them may fail transiently; none of them may
/// block forever. Callers impose timeouts at the adapter level.
///
/// Two optional capabilities have defaults that report "not available":
/// [`KeyValueStore::increment_with_expiry`] and
/// [`KeyValueStore::delete_prefix`].
#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    /// Fetch the bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically increment the integer under `key`, creating it at 0 first
    /// if absent, and return the new value.
    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError>;

    /// Arm an expiry on `key` only if it has none.
    ///
    /// Returns `true` if the expiry was set by this call.
    async fn set_expiry_if_none_set(&self, key: &str, ttl: Ttl) -> Result<bool, StoreError>;

    /// Query the remaining lifetime of `key`.
    async fn time_to_live(&self, key: &str) -> Result<KeyTtl, StoreError>;

    /// Increment `key` and arm `ttl` on creation as one atomic step.
    ///
    /// Returns `Ok(None)` if the store has no such primitive, in which case
    /// callers fall back to [`KeyValueStore::increment_and_get`] followed by
    /// [`KeyValueStore::set_expiry_if_none_set`].
    async fn increment_with_expiry(&self, _key: &str, _ttl: Ttl) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }

    /// Delete every key starting with `prefix`.
    async fn delete_prefix(&self, _prefix: &str) -> Result<PrefixDeletion, StoreError> {
        Ok(PrefixDeletion::Unsupported)
    }

    /// A short adapter name for logs.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T> KeyValueStore for Arc<T>
where
    T: KeyValueStore + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), StoreError> {
        (**self).set_with_expiry(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError> {
        (**self).increment_and_get(key).await
    }

    async fn set_expiry_if_none_set(&self, key: &str, ttl: Ttl) -> Result<bool, StoreError> {
        (**self).set_expiry_if_none_set(key, ttl).await
    }

    async fn time_to_live(&self, key: &str) -> Result<KeyTtl, StoreError> {
        (**self).time_to_live(key).await
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Ttl) -> Result<Option<u64>, StoreError> {
        (**self).increment_with_expiry(key, ttl).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<PrefixDeletion, StoreError> {
        (**self).delete_prefix(prefix).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Port for obtaining current time.
///
/// This abstraction allows expiry and breaker timing to be driven by a mock
/// clock in tests. Infrastructure provides concrete implementations
/// (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

impl<T> Clock for Arc<T>
where
    T: Clock + ?Sized,
{
    fn now(&self) -> Instant {
        (**self).now()
    }
}
