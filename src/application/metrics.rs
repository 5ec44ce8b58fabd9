//! Observability metrics for the cache and the limiter.
//!
//! Counters are plain atomics shared through an `Arc`, so a single `Metrics`
//! handle can be cloned into a gateway, a limiter and a monitoring task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counters for cache lookups, invalidations and admissions.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Lookups that skipped the store while the circuit was open
    cache_bypasses: AtomicU64,
    compute_failures: AtomicU64,
    decode_failures: AtomicU64,
    populate_failures: AtomicU64,
    invalidations: AtomicU64,
    invalidation_failures: AtomicU64,
    requests_admitted: AtomicU64,
    requests_rejected: AtomicU64,
    fail_open_admissions: AtomicU64,
    fail_closed_rejections: AtomicU64,
    expiry_failures: AtomicU64,
    reconciliations: AtomicU64,
    store_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        bump(&self.inner.cache_hits);
    }

    pub(crate) fn record_miss(&self) {
        bump(&self.inner.cache_misses);
    }

    pub(crate) fn record_bypass(&self) {
        bump(&self.inner.cache_bypasses);
    }

    pub(crate) fn record_compute_failure(&self) {
        bump(&self.inner.compute_failures);
    }

    pub(crate) fn record_decode_failure(&self) {
        bump(&self.inner.decode_failures);
    }

    pub(crate) fn record_populate_failure(&self) {
        bump(&self.inner.populate_failures);
    }

    pub(crate) fn record_invalidation(&self) {
        bump(&self.inner.invalidations);
    }

    pub(crate) fn record_invalidation_failure(&self) {
        bump(&self.inner.invalidation_failures);
    }

    pub(crate) fn record_admitted(&self) {
        bump(&self.inner.requests_admitted);
    }

    pub(crate) fn record_rejected(&self) {
        bump(&self.inner.requests_rejected);
    }

    pub(crate) fn record_fail_open(&self) {
        bump(&self.inner.fail_open_admissions);
    }

    pub(crate) fn record_fail_closed(&self) {
        bump(&self.inner.fail_closed_rejections);
    }

    pub(crate) fn record_expiry_failure(&self) {
        bump(&self.inner.expiry_failures);
    }

    pub(crate) fn record_reconciliation(&self) {
        bump(&self.inner.reconciliations);
    }

    pub(crate) fn record_store_error(&self) {
        bump(&self.inner.store_errors);
    }

    /// Get a point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let i = &self.inner;
        MetricsSnapshot {
            cache_hits: load(&i.cache_hits),
            cache_misses: load(&i.cache_misses),
            cache_bypasses: load(&i.cache_bypasses),
            compute_failures: load(&i.compute_failures),
            decode_failures: load(&i.decode_failures),
            populate_failures: load(&i.populate_failures),
            invalidations: load(&i.invalidations),
            invalidation_failures: load(&i.invalidation_failures),
            requests_admitted: load(&i.requests_admitted),
            requests_rejected: load(&i.requests_rejected),
            fail_open_admissions: load(&i.fail_open_admissions),
            fail_closed_rejections: load(&i.fail_closed_rejections),
            expiry_failures: load(&i.expiry_failures),
            reconciliations: load(&i.reconciliations),
            store_errors: load(&i.store_errors),
        }
    }

    /// Reset all metrics to zero.
    ///
    /// Useful for testing or when starting a new monitoring period.
    pub fn reset(&self) {
        let i = &self.inner;
        for counter in [
            &i.cache_hits,
            &i.cache_misses,
            &i.cache_bypasses,
            &i.compute_failures,
            &i.decode_failures,
            &i.populate_failures,
            &i.invalidations,
            &i.invalidation_failures,
            &i.requests_admitted,
            &i.requests_rejected,
            &i.fail_open_admissions,
            &i.fail_closed_rejections,
            &i.expiry_failures,
            &i.reconciliations,
            &i.store_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Lookups answered from the cache
    pub cache_hits: u64,
    /// Lookups that invoked the compute function after consulting the store
    pub cache_misses: u64,
    /// Lookups that invoked the compute function without consulting the store
    pub cache_bypasses: u64,
    /// Compute functions that returned an error
    pub compute_failures: u64,
    /// Stored payloads that could not be decoded
    pub decode_failures: u64,
    /// Computed values that could not be written back
    pub populate_failures: u64,
    /// Successful single-key or prefix invalidations
    pub invalidations: u64,
    /// Invalidations the store failed to perform
    pub invalidation_failures: u64,
    /// Requests admitted by the limiter, including fail-open admissions
    pub requests_admitted: u64,
    /// Requests rejected by the limiter, including fail-closed rejections
    pub requests_rejected: u64,
    /// Admissions decided by the failure policy
    pub fail_open_admissions: u64,
    /// Rejections decided by the failure policy
    pub fail_closed_rejections: u64,
    /// Counters whose window expiry could not be armed
    pub expiry_failures: u64,
    /// Leaked counters whose expiry was re-armed
    pub reconciliations: u64,
    /// Store operations that failed, across both components
    pub store_errors: u64,
}

impl MetricsSnapshot {
    /// Ratio of hits to all lookups (0.0 to 1.0).
    ///
    /// Returns 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_lookups();
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Ratio of rejected to all limiter decisions (0.0 to 1.0).
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.requests_rejected as f64 / total as f64
        }
    }

    pub fn total_lookups(&self) -> u64 {
        self.cache_hits
            .saturating_add(self.cache_misses)
            .saturating_add(self.cache_bypasses)
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_admitted.saturating_add(self.requests_rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initial_state() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_snapshot() {
        let metrics = Metrics::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_rejected();
        metrics.record_store_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.requests_rejected, 1);
        assert_eq!(snapshot.store_errors, 1);
        assert_eq!(snapshot.total_lookups(), 3);
    }

    #[test]
    fn test_hit_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().hit_rate(), 0.0);

        metrics.record_miss();
        assert_eq!(metrics.snapshot().hit_rate(), 0.0);

        metrics.record_hit();
        assert!((metrics.snapshot().hit_rate() - 0.5).abs() < f64::EPSILON);

        metrics.record_hit();
        metrics.record_hit();
        assert!((metrics.snapshot().hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejection_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().rejection_rate(), 0.0);

        for _ in 0..3 {
            metrics.record_admitted();
        }
        metrics.record_rejected();
        assert!((metrics.snapshot().rejection_rate() - 0.25).abs() < f64::EPSILON);
        assert_eq!(metrics.snapshot().total_requests(), 4);
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.record_hit();
        metrics.record_fail_open();
        metrics.record_reconciliation();

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_clone_shares_counters() {
        let metrics1 = Metrics::new();
        metrics1.record_admitted();

        let metrics2 = metrics1.clone();
        metrics2.record_admitted();

        assert_eq!(metrics1.snapshot().requests_admitted, 2);
        assert_eq!(metrics2.snapshot().requests_admitted, 2);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::thread;

        let metrics = Metrics::new();
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    m.record_hit();
                    m.record_miss();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1000);
        assert_eq!(snapshot.cache_misses, 1000);
    }
}
