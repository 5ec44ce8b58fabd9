//! Failure-injecting store wrapper.

use crate::application::ports::{KeyTtl, KeyValueStore, PrefixDeletion, StoreError};
use crate::domain::policy::Ttl;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Store operations, for call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get = 0,
    SetWithExpiry = 1,
    Delete = 2,
    IncrementAndGet = 3,
    SetExpiryIfNoneSet = 4,
    TimeToLive = 5,
    IncrementWithExpiry = 6,
    DeletePrefix = 7,
}

const OPS: usize = 8;

#[derive(Debug, Default)]
struct Faults {
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_counters: AtomicBool,
    fail_expiry: AtomicBool,
    no_atomic_increment: AtomicBool,
    no_prefix_deletion: AtomicBool,
    calls: [AtomicU64; OPS],
}

/// Wraps a store, counting calls and failing selected operations on demand.
///
/// Fault groups:
/// - reads: `get`, `time_to_live`
/// - writes: `set_with_expiry`, `delete`, `delete_prefix`
/// - counters: `increment_and_get`, `increment_with_expiry`
/// - expiry: `set_expiry_if_none_set`
///
/// Clones share faults and counters.
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: Arc<S>,
    faults: Arc<Faults>,
}

impl<S> Clone for FaultyStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            faults: Arc::clone(&self.faults),
        }
    }
}

impl<S> FaultyStore<S>
where
    S: KeyValueStore,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner: Arc::new(inner),
            faults: Arc::new(Faults::default()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_counters(&self, fail: bool) {
        self.faults.fail_counters.store(fail, Ordering::SeqCst);
    }

    pub fn fail_expiry(&self, fail: bool) {
        self.faults.fail_expiry.store(fail, Ordering::SeqCst);
    }

    /// Fail every operation, simulating a full outage.
    pub fn fail_all(&self, fail: bool) {
        self.fail_reads(fail);
        self.fail_writes(fail);
        self.fail_counters(fail);
        self.fail_expiry(fail);
    }

    /// Hide the inner store's atomic increment-with-expiry.
    pub fn disable_atomic_increment(&self) {
        self.faults.no_atomic_increment.store(true, Ordering::SeqCst);
    }

    /// Hide the inner store's prefix deletion.
    pub fn disable_prefix_deletion(&self) {
        self.faults.no_prefix_deletion.store(true, Ordering::SeqCst);
    }

    /// Number of calls made for `op`, failed ones included.
    pub fn calls(&self, op: StoreOp) -> u64 {
        self.faults.calls[op as usize].load(Ordering::SeqCst)
    }

    fn enter(&self, op: StoreOp, fault: &AtomicBool) -> Result<(), StoreError> {
        self.faults.calls[op as usize].fetch_add(1, Ordering::SeqCst);
        if fault.load(Ordering::SeqCst) {
            Err(StoreError::unavailable(format!("injected {:?} failure", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S> KeyValueStore for FaultyStore<S>
where
    S: KeyValueStore,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.enter(StoreOp::Get, &self.faults.fail_reads)?;
        self.inner.get(key).await
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), StoreError> {
        self.enter(StoreOp::SetWithExpiry, &self.faults.fail_writes)?;
        self.inner.set_with_expiry(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.enter(StoreOp::Delete, &self.faults.fail_writes)?;
        self.inner.delete(key).await
    }

    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError> {
        self.enter(StoreOp::IncrementAndGet, &self.faults.fail_counters)?;
        self.inner.increment_and_get(key).await
    }

    async fn set_expiry_if_none_set(&self, key: &str, ttl: Ttl) -> Result<bool, StoreError> {
        self.enter(StoreOp::SetExpiryIfNoneSet, &self.faults.fail_expiry)?;
        self.inner.set_expiry_if_none_set(key, ttl).await
    }

    async fn time_to_live(&self, key: &str) -> Result<KeyTtl, StoreError> {
        self.enter(StoreOp::TimeToLive, &self.faults.fail_reads)?;
        self.inner.time_to_live(key).await
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Ttl) -> Result<Option<u64>, StoreError> {
        if self.faults.no_atomic_increment.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.enter(StoreOp::IncrementWithExpiry, &self.faults.fail_counters)?;
        self.inner.increment_with_expiry(key, ttl).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<PrefixDeletion, StoreError> {
        if self.faults.no_prefix_deletion.load(Ordering::SeqCst) {
            return Ok(PrefixDeletion::Unsupported);
        }
        self.enter(StoreOp::DeletePrefix, &self.faults.fail_writes)?;
        self.inner.delete_prefix(prefix).await
    }

    fn name(&self) -> &'static str {
        "faulty"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryStore;

    #[tokio::test]
    async fn test_passes_through_and_counts() {
        let store = FaultyStore::new(MemoryStore::new());
        let ttl = Ttl::from_secs(60).unwrap();

        store.set_with_expiry("k", b"v", ttl).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.calls(StoreOp::Get), 1);
        assert_eq!(store.calls(StoreOp::SetWithExpiry), 1);
    }

    #[tokio::test]
    async fn test_fault_groups() {
        let store = FaultyStore::new(MemoryStore::new());
        store.fail_reads(true);

        assert!(store.get("k").await.is_err());
        assert!(store.time_to_live("k").await.is_err());
        assert!(store.increment_and_get("k").await.is_ok());

        store.fail_all(false);
        assert!(store.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_hidden_capabilities() {
        let store = FaultyStore::new(MemoryStore::new());
        let ttl = Ttl::from_secs(60).unwrap();
        store.disable_atomic_increment();
        store.disable_prefix_deletion();

        assert_eq!(store.increment_with_expiry("k", ttl).await.unwrap(), None);
        assert_eq!(
            store.delete_prefix("k").await.unwrap(),
            PrefixDeletion::Unsupported
        );
    }
}
