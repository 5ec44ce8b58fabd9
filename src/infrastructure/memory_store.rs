//! In-process key-value store.
//!
//! `MemoryStore` implements the [`KeyValueStore`] port on a sharded concurrent
//! map. It is the store for single-instance deployments and the test double
//! for everything else. Expiry is lazy: an expired entry is dropped when it is
//! next touched, or by [`MemoryStore::purge_expired`].

use crate::application::ports::{Clock, KeyTtl, KeyValueStore, PrefixDeletion, StoreError};
use crate::domain::policy::Ttl;
use crate::infrastructure::clock::SystemClock;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;

/// Configuration for [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreConfig {
    /// Maximum number of live entries, `None` for unbounded.
    ///
    /// Once full, every insert of a new key scans all entries to pick the one
    /// closest to expiry, so inserts cost O(n). Keep the bound small or leave
    /// it unset for large working sets.
    pub max_entries: Option<usize>,
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Thread-safe sharded store backed by DashMap.
#[derive(Debug)]
pub struct MemoryStore {
    map: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
    config: MemoryStoreConfig,
}

impl MemoryStore {
    /// Create an unbounded store on the system clock.
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default(), Arc::new(SystemClock::new()))
    }

    /// Create an unbounded store that reads time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(MemoryStoreConfig::default(), clock)
    }

    pub fn with_config(config: MemoryStoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            map: DashMap::new(),
            clock,
            config,
        }
    }

    /// Check if a live entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.map.get(key).is_some_and(|v| !v.is_expired(now))
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.map.len();
        self.map.retain(|_, v| !v.is_expired(now));
        before.saturating_sub(self.map.len())
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.map.clear();
    }

    /// Make room for one more entry if the store is bounded and full.
    ///
    /// Expired entries go first; if that is not enough, the entry closest to
    /// expiry is evicted. Entries without expiry are evicted last.
    fn make_room(&self, incoming: &str) {
        let Some(max) = self.config.max_entries else {
            return;
        };
        if self.map.len() < max || self.map.contains_key(incoming) {
            return;
        }

        self.purge_expired();
        while self.map.len() >= max {
            let victim = self
                .map
                .iter()
                .min_by_key(|e| (e.value().expires_at.is_none(), e.value().expires_at))
                .map(|e| e.key().clone());
            match victim {
                Some(key) => {
                    self.map.remove(&key);
                    tracing::debug!(key = %key, "Evicted entry from full memory store");
                }
                None => break,
            }
        }
    }

    fn parse_counter(bytes: &[u8]) -> Result<u64, StoreError> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| StoreError::UnexpectedReply {
                reason: "value is not an integer".to_string(),
            })
    }

    /// Shared increment for the plain and the expiring variant.
    fn increment(&self, key: &str, ttl: Option<Ttl>) -> Result<u64, StoreError> {
        let now = self.clock.now();
        self.make_room(key);

        match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let value = occupied.get_mut();
                let count = Self::parse_counter(&value.bytes)?.saturating_add(1);
                value.bytes = count.to_string().into_bytes();
                Ok(count)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(Self::new_counter(now, ttl));
                Ok(1)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Self::new_counter(now, ttl));
                Ok(1)
            }
        }
    }

    fn new_counter(now: Instant, ttl: Option<Ttl>) -> StoredValue {
        StoredValue {
            bytes: b"1".to_vec(),
            expires_at: ttl.map(|t| now + t.as_duration()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now();
        let expired = match self.map.get(key) {
            Some(v) if !v.is_expired(now) => return Ok(Some(v.bytes.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.map.remove_if(key, |_, v| v.is_expired(now));
        }
        Ok(None)
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), StoreError> {
        self.make_room(key);
        let expires_at = self.clock.now() + ttl.as_duration();
        self.map.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.map.remove(key);
        Ok(())
    }

    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError> {
        self.increment(key, None)
    }

    async fn set_expiry_if_none_set(&self, key: &str, ttl: Ttl) -> Result<bool, StoreError> {
        let now = self.clock.now();
        match self.map.get_mut(key) {
            Some(mut v) if !v.is_expired(now) && v.expires_at.is_none() => {
                v.expires_at = Some(now + ttl.as_duration());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn time_to_live(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let now = self.clock.now();
        Ok(match self.map.get(key) {
            Some(v) if v.is_expired(now) => KeyTtl::Missing,
            Some(v) => match v.expires_at {
                Some(at) => KeyTtl::Expires(at.saturating_duration_since(now)),
                None => KeyTtl::Persistent,
            },
            None => KeyTtl::Missing,
        })
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Ttl) -> Result<Option<u64>, StoreError> {
        // The shard lock held by the entry guard makes this one atomic step
        self.increment(key, Some(ttl)).map(Some)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<PrefixDeletion, StoreError> {
        let before = self.map.len();
        self.map.retain(|k, _| !k.starts_with(prefix));
        let deleted = before.saturating_sub(self.map.len());
        Ok(PrefixDeletion::Deleted(deleted as u64))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
