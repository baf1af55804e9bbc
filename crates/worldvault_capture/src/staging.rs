//! # Chunk Staging Buffer
//!
//! Thread-safe holding area for observed chunks before they are
//! durable. Keyed by chunk position: a later observation of the same
//! chunk replaces the staged one instead of queueing behind it, so
//! the buffer deduplicates as it fills.
//!
//! ## Completeness is monotonic
//!
//! An incoming record replaces a staged record for the same key only
//! if its completeness is >= the staged one; downgrades are dropped
//! silently.
//!
//! ## Backpressure
//!
//! The buffer is bounded. Above the high-water mark, staging a NEW
//! key blocks the producer on a condvar until the worker drains, up
//! to a timeout, then fails with `BackpressureTimeout`. Upgrading an
//! already-staged key never blocks: it does not grow the buffer, and
//! keeping that path cheap is what keeps the producer hot path cheap.

use crate::error::{CaptureError, CaptureResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use worldvault_storage::{ChunkPos, ChunkRecord};

/// Bounded insert-or-upgrade staging map.
pub struct ChunkStagingBuffer {
    records: Mutex<HashMap<ChunkPos, ChunkRecord>>,
    space_available: Condvar,
    high_water_mark: usize,
    stage_timeout: Duration,
}

impl ChunkStagingBuffer {
    /// Creates a buffer with the given capacity bound and producer
    /// blocking timeout.
    #[must_use]
    pub fn new(high_water_mark: usize, stage_timeout: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            space_available: Condvar::new(),
            high_water_mark,
            stage_timeout,
        }
    }

    /// Stages a record: insert, or upgrade an existing record for the
    /// same chunk.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::BackpressureTimeout`] if the buffer
    /// stays at the high-water mark past the stage timeout.
    pub fn stage(&self, record: ChunkRecord) -> CaptureResult<()> {
        let mut records = self.records.lock();
        let deadline = Instant::now() + self.stage_timeout;

        loop {
            if let Some(existing) = records.get(&record.pos) {
                // Same key: replace only on completeness >= existing.
                if record.completeness >= existing.completeness {
                    records.insert(record.pos, record);
                }
                return Ok(());
            }

            if records.len() < self.high_water_mark {
                records.insert(record.pos, record);
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CaptureError::BackpressureTimeout {
                    timeout_ms: self.stage_timeout.as_millis() as u64,
                });
            }
            self.space_available.wait_for(&mut records, deadline - now);
        }
    }

    /// Removes and returns up to `max_batch` records.
    ///
    /// Order is arbitrary; keys are unique so order carries no
    /// meaning.
    #[must_use]
    pub fn drain(&self, max_batch: usize) -> Vec<ChunkRecord> {
        let mut records = self.records.lock();
        let drained: Vec<ChunkRecord> = if records.len() <= max_batch {
            records.drain().map(|(_, r)| r).collect()
        } else {
            let keys: Vec<ChunkPos> = records.keys().take(max_batch).copied().collect();
            keys.iter().filter_map(|k| records.remove(k)).collect()
        };
        if !drained.is_empty() {
            self.space_available.notify_all();
        }
        drained
    }

    /// Number of staged records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drops all staged records (discard path).
    pub fn clear(&self) {
        let mut records = self.records.lock();
        records.clear();
        self.space_available.notify_all();
    }
}
