//! Namespaced keys for cache entries and rate counters.
//!
//! Every cached value lives under a key of the form `"<namespace>:<id>"`.
//! Two logically different resources must never map to the same key. A
//! namespace cannot contain the separator, so the first `:` of a key always
//! ends its namespace and distinct `(namespace, id)` pairs stay distinct.
//! Identifiers may contain `:`.
//!
//! Cache entries and rate counters share one store. The gateway writes under
//! [`DEFAULT_CACHE_PREFIX`], the limiter under [`DEFAULT_RATE_PREFIX`], so no
//! cache key or cache invalidation can reach a counter.

use std::fmt;
use thiserror::Error;

/// Separator between a namespace and the identifier inside it.
pub const SEPARATOR: char = ':';

/// Default store prefix for cache entries.
pub const DEFAULT_CACHE_PREFIX: &str = "cache:";

/// Default store prefix for rate counter keys.
pub const DEFAULT_RATE_PREFIX: &str = "rate:";

/// Error returned when a key cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The namespace part was empty
    #[error("key namespace must not be empty")]
    EmptyNamespace,
    /// The namespace contained the separator
    #[error("key namespace must not contain ':'")]
    SeparatorInNamespace,
    /// The identifier part was empty
    #[error("key identifier must not be empty")]
    EmptyId,
    /// A raw key string was empty
    #[error("key must not be empty")]
    EmptyKey,
    /// A rate limiting identity was empty
    #[error("rate limiting identity must not be empty")]
    EmptyIdentity,
}

/// A namespace shared by a family of cache keys, e.g. `"product"`.
///
/// Used to build [`CacheKey`]s and as the unit of bulk invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(String);

impl Namespace {
    /// Create a namespace.
    ///
    /// A trailing separator is tolerated and stripped, so `"product"` and
    /// `"product:"` name the same namespace.
    ///
    /// # Errors
    /// Returns [`KeyError::EmptyNamespace`] if nothing remains after trimming,
    /// [`KeyError::SeparatorInNamespace`] if the name still contains `:`.
    pub fn new(name: impl Into<String>) -> Result<Self, KeyError> {
        let mut name = name.into();
        while name.ends_with(SEPARATOR) {
            name.pop();
        }
        if name.is_empty() {
            return Err(KeyError::EmptyNamespace);
        }
        if name.contains(SEPARATOR) {
            return Err(KeyError::SeparatorInNamespace);
        }
        Ok(Self(name))
    }

    /// Build a key for `id` inside this namespace.
    ///
    /// # Errors
    /// Returns [`KeyError::EmptyId`] if `id` is empty.
    pub fn key(&self, id: impl fmt::Display) -> Result<CacheKey, KeyError> {
        let id = id.to_string();
        if id.is_empty() {
            return Err(KeyError::EmptyId);
        }
        Ok(CacheKey(format!("{}{}{}", self.0, SEPARATOR, id)))
    }

    /// The prefix every key of this namespace starts with (`"<name>:"`).
    pub fn prefix(&self) -> String {
        format!("{}{}", self.0, SEPARATOR)
    }

    /// Check whether `key` belongs to this namespace.
    pub fn contains(&self, key: &CacheKey) -> bool {
        key.as_str()
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with(SEPARATOR))
    }

    /// The bare namespace name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a cache entry.
///
/// # Example
/// ```
/// use cache_throttle::CacheKey;
///
/// let key = CacheKey::new("product", 42).unwrap();
/// assert_eq!(key.as_str(), "product:42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build `"<namespace>:<id>"`.
    ///
    /// # Errors
    /// Returns an error if either part is empty.
    pub fn new(namespace: &str, id: impl fmt::Display) -> Result<Self, KeyError> {
        Namespace::new(namespace)?.key(id)
    }

    /// Accept a raw, already namespaced key as-is.
    ///
    /// # Errors
    /// Returns [`KeyError::EmptyKey`] if `raw` is empty.
    pub fn from_raw(raw: impl Into<String>) -> Result<Self, KeyError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(KeyError::EmptyKey);
        }
        Ok(Self(raw))
    }

    /// The namespace part, if the key has one.
    pub fn namespace(&self) -> Option<&str> {
        self.0
            .split_once(SEPARATOR)
            .map(|(ns, _)| ns)
            .filter(|ns| !ns.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Key of a rate counter: `"<prefix><identity>:<window-secs>"`.
///
/// The window length is part of the key so that the same identity limited
/// under two different windows keeps two independent counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey(String);

impl RateKey {
    /// Build a counter key for `identity` under `window_secs`.
    ///
    /// # Errors
    /// Returns [`KeyError::EmptyIdentity`] if `identity` is empty.
    pub fn new(prefix: &str, identity: &str, window_secs: u64) -> Result<Self, KeyError> {
        if identity.is_empty() {
            return Err(KeyError::EmptyIdentity);
        }
        Ok(Self(format!(
            "{}{}{}{}",
            prefix, identity, SEPARATOR, window_secs
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
