//! # Persistence Worker
//!
//! The one background thread per session that owns the archive.
//!
//! ## Architecture
//!
//! ```text
//!   event source ──> [ChunkStagingBuffer / EntityTracker] ──> [worker thread] ──> RegionStore
//!                          (shared, in-memory)                (single writer)
//! ```
//!
//! The worker drains staging on a fixed interval, or earlier when the
//! manager nudges it because staging crossed the flush threshold -
//! whichever comes first. Serializing all archive writes through this
//! one thread is what guarantees the archive stays structurally valid
//! without making `RegionStore` reentrant.
//!
//! All persistence failures are contained here: they are logged and
//! counted in the shared statistics, never propagated to the
//! producer.

use crate::staging::ChunkStagingBuffer;
use crate::stats::SharedStats;
use crate::tracker::EntityTracker;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use worldvault_storage::{OverwritePolicy, RegionStore};

/// Records drained per flush cycle; bounds per-cycle memory.
const MAX_DRAIN_BATCH: usize = 512;

/// Control messages for the worker thread.
#[derive(Clone, Copy, Debug)]
enum WorkerCommand {
    /// Flush ahead of the interval (staging crossed the threshold).
    Flush,
    /// Finish up and exit.
    Stop {
        /// Abandon staged-but-unflushed data instead of draining.
        discard: bool,
    },
}

/// Condvar-backed completion latch for the final drain.
struct CompletionSignal {
    done: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl CompletionSignal {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    fn signal(&self) {
        self.done.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        let mut guard = self.mutex.lock();
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        self.condvar.wait_for(&mut guard, timeout);
        self.done.load(Ordering::Acquire)
    }
}

/// Lock-free handle for requesting an early flush.
///
/// Held by the producer side, so a nudge never contends with a
/// `stop` that is blocking on the worker's final drain.
pub struct FlushNudge {
    commands: Sender<WorkerCommand>,
}

impl FlushNudge {
    /// Asks the worker to flush ahead of its interval. Best-effort:
    /// if the command queue is full a flush is already pending.
    pub fn nudge(&self) {
        let _ = self.commands.try_send(WorkerCommand::Flush);
    }
}

/// Handle to the background persistence thread.
pub struct PersistenceWorker {
    commands: Sender<WorkerCommand>,
    completion: Arc<CompletionSignal>,
    handle: Option<JoinHandle<()>>,
    detached: bool,
}

impl PersistenceWorker {
    /// Spawns the worker thread for one session.
    ///
    /// The worker takes sole ownership of the [`RegionStore`]; the
    /// staging buffer, tracker and stats are the shared seams.
    #[must_use]
    pub fn spawn(
        store: RegionStore,
        staging: Arc<ChunkStagingBuffer>,
        tracker: Arc<EntityTracker>,
        stats: Arc<SharedStats>,
        flush_interval: Duration,
        policy: OverwritePolicy,
    ) -> Self {
        let (commands, command_rx) = bounded::<WorkerCommand>(8);
        let completion = Arc::new(CompletionSignal::new());

        let thread_completion = Arc::clone(&completion);
        let handle = std::thread::spawn(move || {
            let mut store = store;
            loop {
                match command_rx.recv_timeout(flush_interval) {
                    Ok(WorkerCommand::Flush) | Err(RecvTimeoutError::Timeout) => {
                        flush_cycle(&mut store, &staging, &tracker, &stats, policy, false);
                    }
                    Ok(WorkerCommand::Stop { discard: true }) => {
                        staging.clear();
                        tracker.clear();
                        stats.set_staged_pending(0);
                        tracing::info!("persistence worker: discard stop, staged data dropped");
                        break;
                    }
                    Ok(WorkerCommand::Stop { discard: false })
                    | Err(RecvTimeoutError::Disconnected) => {
                        flush_cycle(&mut store, &staging, &tracker, &stats, policy, true);
                        tracing::info!("persistence worker: final flush complete");
                        break;
                    }
                }
            }
            thread_completion.signal();
        });

        Self {
            commands,
            completion,
            handle: Some(handle),
            detached: false,
        }
    }

    /// Returns a handle for requesting early flushes without going
    /// through the worker itself.
    #[must_use]
    pub fn nudge_handle(&self) -> FlushNudge {
        FlushNudge {
            commands: self.commands.clone(),
        }
    }

    /// Stops the worker and waits up to `timeout` for it to finish.
    ///
    /// Returns `true` if the worker completed in time (the thread is
    /// joined), `false` on timeout (the thread is left to finish in
    /// the background and is detached).
    #[must_use]
    pub fn stop(&mut self, discard: bool, timeout: Duration) -> bool {
        let _ = self.commands.send(WorkerCommand::Stop { discard });
        let completed = self.completion.wait_timeout(timeout);
        if completed {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        } else {
            self.detached = true;
        }
        completed
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        if self.detached {
            // A timed-out stop already ordered the final flush; the
            // thread finishes on its own. Dropping the handle detaches.
            self.handle.take();
            return;
        }
        if let Some(handle) = self.handle.take() {
            // Dropped without an explicit stop: order a final flush so
            // no staged data is lost.
            let _ = self.commands.send(WorkerCommand::Stop { discard: false });
            let _ = handle.join();
        }
    }
}

/// One drain-and-flush pass. With `drain_all` it loops until both
/// staging structures are empty (the forced final drain).
fn flush_cycle(
    store: &mut RegionStore,
    staging: &ChunkStagingBuffer,
    tracker: &EntityTracker,
    stats: &SharedStats,
    policy: OverwritePolicy,
    drain_all: bool,
) {
    loop {
        let records = staging.drain(MAX_DRAIN_BATCH);
        let drained = records.len();
        if !records.is_empty() {
            let report = store.flush(records, policy);
            stats.record_flush(&report);
            tracing::debug!(
                written = report.written,
                skipped = report.skipped,
                failed = report.failed,
                "flush cycle"
            );
        }

        let snapshots = tracker.drain();
        if !snapshots.is_empty() {
            match store.flush_entities(snapshots) {
                Ok(applied) => stats.record_entities(applied as u64),
                Err(e) => {
                    // Snapshots lost this cycle; the tracker refills
                    // from live observations.
                    tracing::error!("entity flush failed: {e}");
                }
            }
        }

        stats.set_staged_pending(staging.len());
        if !drain_all || (drained < MAX_DRAIN_BATCH && staging.is_empty() && tracker.is_empty()) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use worldvault_storage::{ChunkPayload, ChunkPos, ChunkRecord, Completeness, EntitySnapshot};

    fn record(x: i32, z: i32) -> ChunkRecord {
        ChunkRecord::new(
            ChunkPos::new(x, z),
            Completeness::Full,
            ChunkPayload {
                blocks: vec![7; 128],
                ..Default::default()
            },
        )
    }

    fn spawn_worker(
        dir: &TempDir,
        staging: &Arc<ChunkStagingBuffer>,
        tracker: &Arc<EntityTracker>,
        stats: &Arc<SharedStats>,
        interval: Duration,
    ) -> PersistenceWorker {
        let store = RegionStore::open(dir.path()).unwrap();
        PersistenceWorker::spawn(
            store,
            Arc::clone(staging),
            Arc::clone(tracker),
            Arc::clone(stats),
            interval,
            OverwritePolicy::MergeKeepMostComplete,
        )
    }

    #[test]
    fn test_stop_flushes_everything() {
        let dir = TempDir::new().unwrap();
        let staging = Arc::new(ChunkStagingBuffer::new(4096, Duration::from_millis(100)));
        let tracker = Arc::new(EntityTracker::new());
        let stats = SharedStats::new_shared();
        // Long interval: only the stop-driven final flush can drain.
        let mut worker = spawn_worker(&dir, &staging, &tracker, &stats, Duration::from_secs(60));

        for x in 0..20 {
            staging.stage(record(x, 0)).unwrap();
        }
        tracker.observe(EntitySnapshot {
            id: 1,
            kind: "pig".to_string(),
            position: [0.0, 64.0, 0.0],
            attributes: Vec::new(),
        });

        assert!(worker.stop(false, Duration::from_secs(10)));
        let snap = stats.snapshot();
        assert_eq!(snap.chunks_written, 20);
        assert_eq!(snap.entities_captured, 1);
        assert_eq!(snap.staged_pending, 0);

        let store = RegionStore::open(dir.path()).unwrap();
        assert!(store.read_chunk(ChunkPos::new(19, 0)).unwrap().is_some());
        assert_eq!(store.read_entities().unwrap().len(), 1);
    }

    #[test]
    fn test_discard_stop_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let staging = Arc::new(ChunkStagingBuffer::new(4096, Duration::from_millis(100)));
        let tracker = Arc::new(EntityTracker::new());
        let stats = SharedStats::new_shared();
        let mut worker = spawn_worker(&dir, &staging, &tracker, &stats, Duration::from_secs(60));

        for x in 0..10 {
            staging.stage(record(x, 0)).unwrap();
        }
        assert!(worker.stop(true, Duration::from_secs(10)));

        assert_eq!(stats.snapshot().chunks_written, 0);
        assert!(staging.is_empty());
        // No region files were created.
        let region_dir = dir.path().join("region");
        assert_eq!(std::fs::read_dir(region_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_nudge_handle_flushes_before_interval() {
        let dir = TempDir::new().unwrap();
        let staging = Arc::new(ChunkStagingBuffer::new(4096, Duration::from_millis(100)));
        let tracker = Arc::new(EntityTracker::new());
        let stats = SharedStats::new_shared();
        let mut worker = spawn_worker(&dir, &staging, &tracker, &stats, Duration::from_secs(60));

        staging.stage(record(0, 0)).unwrap();
        worker.nudge_handle().nudge();

        // Poll briefly; the nudge should land well before the interval.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while stats.snapshot().chunks_written == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(stats.snapshot().chunks_written, 1);
        assert!(worker.stop(false, Duration::from_secs(10)));
    }
}
