//! Observability metrics for admission control.
//!
//! Counters are shared by every clone of a controller and by observers built
//! from it, so a single [`Metrics`] describes one profile's session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking admission decisions and storage health.
///
/// All counters use relaxed atomics and can be read at any time.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Checks answered with `allowed = true`
    admitted: AtomicU64,
    /// Checks answered with `allowed = false`
    denied: AtomicU64,
    /// Open to Blocked transitions
    blocks_started: AtomicU64,
    /// Stale blocks rewritten to the current block duration
    blocks_migrated: AtomicU64,
    /// Blocks that ran out and returned to Open
    blocks_expired: AtomicU64,
    /// Future timestamps clamped or block starts restarted after a clock rewind
    clock_corrections: AtomicU64,
    /// Failed store reads, writes or clears
    store_failures: AtomicU64,
    /// Persisted values that failed to decode or validate
    corrupt_states: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self) {
        self.inner.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_block_started(&self) {
        self.inner.blocks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_block_migrated(&self) {
        self.inner.blocks_migrated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_block_expired(&self) {
        self.inner.blocks_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_clock_correction(&self) {
        self.inner.clock_corrections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.inner.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_corrupt_state(&self) {
        self.inner.corrupt_states.fetch_add(1, Ordering::Relaxed);
    }

    /// Checks that were admitted.
    pub fn admitted(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    /// Checks that were denied.
    pub fn denied(&self) -> u64 {
        self.inner.denied.load(Ordering::Relaxed)
    }

    /// Blocks started by a limit being reached.
    pub fn blocks_started(&self) -> u64 {
        self.inner.blocks_started.load(Ordering::Relaxed)
    }

    /// Stale blocks rewritten to the configured block duration.
    pub fn blocks_migrated(&self) -> u64 {
        self.inner.blocks_migrated.load(Ordering::Relaxed)
    }

    /// Blocks that expired.
    pub fn blocks_expired(&self) -> u64 {
        self.inner.blocks_expired.load(Ordering::Relaxed)
    }

    /// Corrections applied after the wall clock moved backwards.
    pub fn clock_corrections(&self) -> u64 {
        self.inner.clock_corrections.load(Ordering::Relaxed)
    }

    /// Store operations that failed.
    pub fn store_failures(&self) -> u64 {
        self.inner.store_failures.load(Ordering::Relaxed)
    }

    /// Persisted values discarded as corrupt.
    pub fn corrupt_states(&self) -> u64 {
        self.inner.corrupt_states.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted(),
            denied: self.denied(),
            blocks_started: self.blocks_started(),
            blocks_migrated: self.blocks_migrated(),
            blocks_expired: self.blocks_expired(),
            clock_corrections: self.clock_corrections(),
            store_failures: self.store_failures(),
            corrupt_states: self.corrupt_states(),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        let inner = &self.inner;
        for counter in [
            &inner.admitted,
            &inner.denied,
            &inner.blocks_started,
            &inner.blocks_migrated,
            &inner.blocks_expired,
            &inner.clock_corrections,
            &inner.store_failures,
            &inner.corrupt_states,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub denied: u64,
    pub blocks_started: u64,
    pub blocks_migrated: u64,
    pub blocks_expired: u64,
    pub clock_corrections: u64,
    pub store_failures: u64,
    pub corrupt_states: u64,
}

impl MetricsSnapshot {
    /// Ratio of denied checks to all checks (0.0 to 1.0).
    ///
    /// Returns 0.0 if no checks have been made.
    pub fn denial_rate(&self) -> f64 {
        let total = self.total_checks();
        if total == 0 {
            0.0
        } else {
            self.denied as f64 / total as f64
        }
    }

    /// Total number of checks answered (admitted + denied).
    pub fn total_checks(&self) -> u64 {
        self.admitted.saturating_add(self.denied)
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
        metrics.record_admitted();
        metrics.record_admitted();
        metrics.record_denied();
        metrics.record_block_started();
        metrics.record_block_migrated();
        metrics.record_store_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.admitted, 2);
        assert_eq!(snapshot.denied, 1);
        assert_eq!(snapshot.blocks_started, 1);
        assert_eq!(snapshot.blocks_migrated, 1);
        assert_eq!(snapshot.blocks_expired, 0);
        assert_eq!(snapshot.store_failures, 1);
        assert_eq!(snapshot.total_checks(), 3);
    }

    #[test]
    fn test_denial_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().denial_rate(), 0.0);

        metrics.record_admitted();
        metrics.record_denied();
        assert!((metrics.snapshot().denial_rate() - 0.5).abs() < f64::EPSILON);

        metrics.record_denied();
        metrics.record_denied();
        assert!((metrics.snapshot().denial_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.record_admitted();
        metrics.record_clock_correction();
        metrics.record_corrupt_state();

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_clones_share_counters() {
        let a = Metrics::new();
        a.record_block_expired();

        let b = a.clone();
        b.record_block_expired();

        assert_eq!(a.blocks_expired(), 2);
        assert_eq!(b.blocks_expired(), 2);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::thread;

        let metrics = Metrics::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_admitted();
                        m.record_denied();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.admitted(), 800);
        assert_eq!(metrics.denied(), 800);
    }
}
