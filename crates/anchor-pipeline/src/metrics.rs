//! Pipeline counters
//!
//! Thread-safe counters for monitoring the ingestion loop. The snapshot is
//! what the runtime logs periodically and on shutdown.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Metrics collector for the anchoring pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Batches sealed and committed.
    pub batches_created: AtomicU64,
    /// Events consumed into committed batches.
    pub events_processed: AtomicU64,
    /// Successful mints, replayed mints included.
    pub mints_succeeded: AtomicU64,
    /// Mints that failed after all retries.
    pub mints_failed: AtomicU64,
    /// Blocking reads that returned no entries.
    pub empty_reads: AtomicU64,
    /// Events dropped as malformed.
    pub malformed_events: AtomicU64,
    /// Wall-clock of the last committed batch, ms since epoch; 0 when no
    /// batch has been committed yet.
    last_batch_at_ms: AtomicI64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, event_count: usize, now_ms: i64) {
        self.batches_created.fetch_add(1, Ordering::Relaxed);
        self.events_processed
            .fetch_add(event_count as u64, Ordering::Relaxed);
        self.last_batch_at_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn record_mint_success(&self) {
        self.mints_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mint_failure(&self) {
        self.mints_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_read(&self) {
        self.empty_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_event(&self) {
        self.malformed_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot; `now_ms` feeds the batch-age gauge.
    pub fn snapshot(&self, now_ms: i64) -> MetricsSnapshot {
        let last_batch = self.last_batch_at_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            batches_created: self.batches_created.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            mints_succeeded: self.mints_succeeded.load(Ordering::Relaxed),
            mints_failed: self.mints_failed.load(Ordering::Relaxed),
            empty_reads: self.empty_reads.load(Ordering::Relaxed),
            malformed_events: self.malformed_events.load(Ordering::Relaxed),
            seconds_since_last_batch: (last_batch > 0)
                .then(|| ((now_ms - last_batch).max(0) / 1000) as u64),
        }
    }
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_created: u64,
    pub events_processed: u64,
    pub mints_succeeded: u64,
    pub mints_failed: u64,
    pub empty_reads: u64,
    pub malformed_events: u64,
    pub seconds_since_last_batch: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot() {
        let metrics = PipelineMetrics::new();
        let snapshot = metrics.snapshot(10_000);
        assert_eq!(snapshot.batches_created, 0);
        assert_eq!(snapshot.seconds_since_last_batch, None);
    }

    #[test]
    fn test_record_batch_updates_gauge() {
        let metrics = PipelineMetrics::new();
        metrics.record_batch(250, 60_000);
        metrics.record_batch(750, 90_000);

        let snapshot = metrics.snapshot(95_000);
        assert_eq!(snapshot.batches_created, 2);
        assert_eq!(snapshot.events_processed, 1000);
        assert_eq!(snapshot.seconds_since_last_batch, Some(5));
    }

    #[test]
    fn test_mint_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_mint_success();
        metrics.record_mint_success();
        metrics.record_mint_failure();

        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.mints_succeeded, 2);
        assert_eq!(snapshot.mints_failed, 1);
    }
}
