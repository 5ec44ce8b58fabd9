//! Helpers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use cache_throttle::{Clock, KeyTtl, KeyValueStore, StoreError, Ttl};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Manually advanced clock.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

/// A store that is never reachable.
#[derive(Debug, Default)]
pub struct DownStore {
    pub calls: AtomicU64,
}

impl DownStore {
    fn fail<T>(&self) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Timeout {
            after: Duration::from_millis(50),
        })
    }
}

#[async_trait]
impl KeyValueStore for DownStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.fail()
    }

    async fn set_with_expiry(&self, _key: &str, _value: &[u8], _ttl: Ttl) -> Result<(), StoreError> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        self.fail()
    }

    async fn increment_and_get(&self, _key: &str) -> Result<u64, StoreError> {
        self.fail()
    }

    async fn set_expiry_if_none_set(&self, _key: &str, _ttl: Ttl) -> Result<bool, StoreError> {
        self.fail()
    }

    async fn time_to_live(&self, _key: &str) -> Result<KeyTtl, StoreError> {
        self.fail()
    }

    fn name(&self) -> &'static str {
        "down"
    }
}
