//! Redis-backed key-value store.
//!
//! Lets several application instances share one cache and one set of rate
//! counters.
//!
//! ## Architecture
//!
//! - Keys: the caller's key with a configurable prefix
//! - Values: opaque bytes written with `SET .. EX`
//! - Counters: `INCR` plus `EXPIRE` in a single Lua script, so a counter is
//!   never created without its window expiry
//! - Prefix deletion: `SCAN MATCH` + `DEL` in batches
//!
//! Connections go through `redis::aio::ConnectionManager`, which reconnects
//! on its own. Every command is bounded by `operation_timeout`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cache_throttle::{CacheAsideGateway, RedisStore, RedisStoreConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RedisStoreConfig {
//!         key_prefix: "shop:".to_string(),
//!         operation_timeout: Duration::from_millis(250),
//!         ..Default::default()
//!     };
//!
//!     let store = RedisStore::connect_with_config("redis://127.0.0.1/", config)
//!         .await
//!         .expect("Failed to connect to Redis");
//!     let gateway = CacheAsideGateway::new(store);
//! }
//! ```

use crate::application::ports::{KeyTtl, KeyValueStore, PrefixDeletion, StoreError};
use crate::domain::policy::Ttl;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, RedisResult, Script};
use std::fmt;
use std::future::Future;
use std::time::Duration;

const INCREMENT_WITH_EXPIRY: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

const EXPIRE_IF_NONE: &str = r"
if redis.call('PTTL', KEYS[1]) == -1 then
    return redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return 0
";

/// Configuration for Redis storage.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix prepended to every key (default: "cache-throttle:")
    pub key_prefix: String,
    /// Upper bound on each command's round trip (default: 500ms)
    pub operation_timeout: Duration,
    /// `COUNT` hint for `SCAN` during prefix deletion (default: 100)
    pub scan_batch: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cache-throttle:".to_string(),
            operation_timeout: Duration::from_millis(500),
            scan_batch: 100,
        }
    }
}

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        if e.kind() == redis::ErrorKind::TypeError {
            StoreError::UnexpectedReply {
                reason: e.to_string(),
            }
        } else {
            StoreError::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}

/// Redis adapter for the [`KeyValueStore`] port.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    increment_script: Script,
    expire_script: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            config,
            increment_script: Script::new(INCREMENT_WITH_EXPIRY),
            expire_script: Script::new(EXPIRE_IF_NONE),
        })
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Run one command under the configured timeout.
    async fn bounded<T, F>(&self, op: &'static str, command: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let after = self.config.operation_timeout;
        match tokio::time::timeout(after, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::debug!(op, error = %e, "Redis command failed");
                Err(e.into())
            }
            Err(_) => {
                tracing::debug!(op, timeout = ?after, "Redis command timed out");
                Err(StoreError::Timeout { after })
            }
        }
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

/// Interpret a `PTTL` reply.
fn key_ttl_from_pttl(pttl: i64) -> KeyTtl {
    match pttl {
        -2 => KeyTtl::Missing,
        -1 => KeyTtl::Persistent,
        ms if ms >= 0 => KeyTtl::Expires(Duration::from_millis(ms as u64)),
        _ => KeyTtl::Missing,
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        self.bounded("GET", async move { conn.get(&key).await })
            .await
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        self.bounded("SET", async move {
            conn.set_ex::<_, _, ()>(&key, value, ttl.as_secs()).await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        self.bounded("DEL", async move { conn.del::<_, ()>(&key).await })
            .await
    }

    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        self.bounded("INCR", async move { conn.incr(&key, 1u64).await })
            .await
    }

    async fn set_expiry_if_none_set(&self, key: &str, ttl: Ttl) -> Result<bool, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        let armed: i64 = self
            .bounded("EXPIRE", async move {
                self.expire_script
                    .key(&key)
                    .arg(ttl.as_secs())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(armed == 1)
    }

    async fn time_to_live(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        let pttl: i64 = self
            .bounded("PTTL", async move { conn.pttl(&key).await })
            .await?;
        Ok(key_ttl_from_pttl(pttl))
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Ttl) -> Result<Option<u64>, StoreError> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        let count: u64 = self
            .bounded("INCR+EXPIRE", async move {
                self.increment_script
                    .key(&key)
                    .arg(ttl.as_secs())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(Some(count))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<PrefixDeletion, StoreError> {
        let pattern = escape_glob(&self.key(prefix));
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(self.config.scan_batch)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let removed: u64 = self.bounded("DEL", conn.del(&keys)).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(PrefixDeletion::Deleted(deleted))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
