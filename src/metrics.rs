//! Pool-wide counters, exposed as a point-in-time snapshot for logging
//! and health endpoints.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Lock-free counters updated from the hot enqueue/dispatch/ack/nack
/// paths in `queue.rs` and `monitor.rs`, plus live worker occupancy.
#[derive(Default)]
pub struct PoolMetrics {
    jobs_enqueued: AtomicU64,
    jobs_dispatched: AtomicU64,
    jobs_acked: AtomicU64,
    jobs_nacked: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_redelivered: AtomicU64,
    workers_total: AtomicUsize,
    workers_busy: AtomicUsize,
}

impl PoolMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_enqueued(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acked(&self) {
        self.jobs_acked.fetch_add(1, Ordering::Relaxed);
    }

    /// `redeliver` matches the argument passed to `QueueBackend::reject`:
    /// every nack is counted, and a requeued nack additionally counts as
    /// a redelivery.
    pub fn record_nacked(&self, redeliver: bool) {
        self.jobs_nacked.fetch_add(1, Ordering::Relaxed);
        if redeliver {
            self.jobs_redelivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.workers_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_busy(&self) {
        self.workers_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_idle(&self) {
        self.workers_busy.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn workers_total(&self) -> usize {
        self.workers_total.load(Ordering::Relaxed)
    }

    pub fn workers_busy(&self) -> usize {
        self.workers_busy.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
            jobs_acked: self.jobs_acked.load(Ordering::Relaxed),
            jobs_nacked: self.jobs_nacked.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_redelivered: self.jobs_redelivered.load(Ordering::Relaxed),
            workers_total: self.workers_total(),
            workers_busy: self.workers_busy(),
        }
    }
}

/// Serializable point-in-time view of `PoolMetrics`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetricsSnapshot {
    pub jobs_enqueued: u64,
    pub jobs_dispatched: u64,
    pub jobs_acked: u64,
    pub jobs_nacked: u64,
    pub jobs_failed: u64,
    pub jobs_redelivered: u64,
    pub workers_total: usize,
    pub workers_busy: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recorded_counters() {
        let metrics = PoolMetrics::new();
        metrics.record_enqueued();
        metrics.record_enqueued();
        metrics.record_dispatched();
        metrics.record_acked();
        metrics.record_nacked(true);
        metrics.record_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_enqueued, 2);
        assert_eq!(snapshot.jobs_dispatched, 1);
        assert_eq!(snapshot.jobs_acked, 1);
        assert_eq!(snapshot.jobs_nacked, 1);
        assert_eq!(snapshot.jobs_redelivered, 1);
        assert_eq!(snapshot.jobs_failed, 1);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let metrics = PoolMetrics::new();
        metrics.record_enqueued();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"jobsEnqueued\":1"));
    }

    #[test]
    fn test_worker_counters_track_busy_transitions() {
        let metrics = PoolMetrics::new();
        metrics.worker_started();
        metrics.worker_started();
        assert_eq!(metrics.workers_total(), 2);

        metrics.mark_busy();
        assert_eq!(metrics.workers_busy(), 1);
        metrics.mark_idle();
        assert_eq!(metrics.workers_busy(), 0);
    }

    #[test]
    fn test_nack_without_redeliver_does_not_count_as_redelivered() {
        let metrics = PoolMetrics::new();
        metrics.record_nacked(false);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_nacked, 1);
        assert_eq!(snapshot.jobs_redelivered, 0);
    }
}
