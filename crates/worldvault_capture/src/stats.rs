//! # Capture Statistics
//!
//! Progress counters for a capture session.
//!
//! [`SharedStats`] is the atomics-backed accumulator: the persistence
//! context writes it, any context reads it. [`CaptureStats`] is the
//! plain snapshot handed to callers — a derived, read-only view,
//! never a source of truth.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use worldvault_storage::FlushReport;

/// Atomics-backed statistics accumulator shared across contexts.
#[derive(Debug, Default)]
pub struct SharedStats {
    chunks_written: AtomicU64,
    chunks_skipped: AtomicU64,
    chunks_failed: AtomicU64,
    bytes_written: AtomicU64,
    entities_captured: AtomicU64,
    staged_pending: AtomicUsize,
    partial_stop: AtomicBool,
}

impl SharedStats {
    /// Creates a zeroed accumulator behind an [`Arc`].
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Folds one flush cycle's report into the totals.
    pub fn record_flush(&self, report: &FlushReport) {
        self.chunks_written.fetch_add(report.written, Ordering::Relaxed);
        self.chunks_skipped.fetch_add(report.skipped, Ordering::Relaxed);
        self.chunks_failed.fetch_add(report.failed, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(report.bytes_written, Ordering::Relaxed);
    }

    /// Adds persisted entity snapshots to the total.
    pub fn record_entities(&self, count: u64) {
        self.entities_captured.fetch_add(count, Ordering::Relaxed);
    }

    /// Publishes the current staging backlog size.
    pub fn set_staged_pending(&self, pending: usize) {
        self.staged_pending.store(pending, Ordering::Relaxed);
    }

    /// Latches the partial-stop warning (stop timed out before the
    /// final flush finished).
    pub fn mark_partial_stop(&self) {
        self.partial_stop.store(true, Ordering::Release);
    }

    /// Takes a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            entities_captured: self.entities_captured.load(Ordering::Relaxed),
            staged_pending: self.staged_pending.load(Ordering::Relaxed),
            partial_stop: self.partial_stop.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time progress snapshot for UI/reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Chunk records durably written to the archive.
    pub chunks_written: u64,
    /// Chunk records dropped by the completeness merge rule.
    pub chunks_skipped: u64,
    /// Chunk records lost to I/O failures after retries.
    pub chunks_failed: u64,
    /// Region/entity file bytes written.
    pub bytes_written: u64,
    /// Entity snapshots persisted.
    pub entities_captured: u64,
    /// Records staged but not yet flushed.
    pub staged_pending: usize,
    /// True if a stop timed out before the final flush completed.
    pub partial_stop: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_reports_accumulate() {
        let stats = SharedStats::new_shared();
        stats.record_flush(&FlushReport {
            written: 10,
            skipped: 2,
            failed: 1,
            bytes_written: 4096,
        });
        stats.record_flush(&FlushReport {
            written: 5,
            skipped: 0,
            failed: 0,
            bytes_written: 1024,
        });
        stats.record_entities(3);

        let snap = stats.snapshot();
        assert_eq!(snap.chunks_written, 15);
        assert_eq!(snap.chunks_skipped, 2);
        assert_eq!(snap.chunks_failed, 1);
        assert_eq!(snap.bytes_written, 5120);
        assert_eq!(snap.entities_captured, 3);
        assert!(!snap.partial_stop);
    }
}
