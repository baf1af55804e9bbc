//! # Capture Manager
//!
//! The single access point external callers use to drive the engine:
//! UI/menu code calls the control API, the event source calls
//! [`CaptureManager::ingest`].
//!
//! Explicitly constructed and dependency-injected - create one at
//! process start, drop it at process exit. Session exclusivity is
//! enforced here: one `Capturing` session at a time per manager, and
//! one manager per process by construction.
//!
//! ## Locking
//!
//! The active session sits behind an `RwLock<Option<...>>`. `ingest`
//! only ever takes the read lock, so a `stop(discard = false)` call
//! blocked on the final flush never blocks the producer - by then the
//! session is `Stopping` and ingestion is a no-op anyway. Early-flush
//! nudges go through a [`FlushNudge`] handle rather than the worker
//! mutex, so even a producer racing a `stop` never waits on it.

use crate::config::CaptureConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::events::CaptureEvent;
use crate::session::{CaptureOrigin, CaptureSession, SessionState};
use crate::staging::ChunkStagingBuffer;
use crate::stats::CaptureStats;
use crate::tracker::EntityTracker;
use crate::worker::{FlushNudge, PersistenceWorker};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use worldvault_storage::RegionStore;

/// Everything alive while a session runs.
struct ActiveParts {
    session: Arc<CaptureSession>,
    staging: Arc<ChunkStagingBuffer>,
    tracker: Arc<EntityTracker>,
    nudge: FlushNudge,
    worker: Mutex<PersistenceWorker>,
}

/// The capture engine façade.
pub struct CaptureManager {
    config: CaptureConfig,
    active: RwLock<Option<Arc<ActiveParts>>>,
    /// Stats of the most recently ended session, so progress stays
    /// queryable after stop (including the partial-stop flag).
    last_stats: Mutex<CaptureStats>,
}

impl CaptureManager {
    /// Creates a manager with the given configuration.
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            active: RwLock::new(None),
            last_stats: Mutex::new(CaptureStats::default()),
        }
    }

    /// Starts a capture session writing to `target`.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::AlreadyCapturing`] if a session is active
    ///   (including one still stopping).
    /// - [`CaptureError::TargetUnavailable`] if the archive directory
    ///   tree cannot be created.
    pub fn start(&self, target: impl AsRef<Path>, origin: CaptureOrigin) -> CaptureResult<()> {
        let target = target.as_ref().to_path_buf();
        let mut active = self.active.write();
        if active.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }

        let store = RegionStore::open(&target).map_err(|e| match e {
            worldvault_storage::StorageError::Io(source) => CaptureError::TargetUnavailable {
                path: target.clone(),
                source,
            },
            other => CaptureError::Storage(other),
        })?;
        let session = Arc::new(CaptureSession::new(target, origin));
        write_meta_file(&session);

        let staging = Arc::new(ChunkStagingBuffer::new(
            self.config.staging_high_water_mark,
            self.config.stage_timeout(),
        ));
        let tracker = Arc::new(EntityTracker::new());
        let worker = PersistenceWorker::spawn(
            store,
            Arc::clone(&staging),
            Arc::clone(&tracker),
            session.stats(),
            self.config.flush_interval(),
            self.config.overwrite_policy(),
        );

        let nudge = worker.nudge_handle();
        *active = Some(Arc::new(ActiveParts {
            session,
            staging,
            tracker,
            nudge,
            worker: Mutex::new(worker),
        }));
        Ok(())
    }

    /// Stops the active session.
    ///
    /// `discard = true` abandons staged-but-unflushed data; the
    /// cancellation is observable by the producer before any waiting
    /// happens. `discard = false` blocks until the final flush
    /// completes or the stop timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::NotCapturing`] with no active session.
    /// - [`CaptureError::StopTimeout`] if the final flush overran the
    ///   timeout; the session is still reset to idle and the partial
    ///   stop is recorded in the statistics.
    pub fn stop(&self, discard: bool) -> CaptureResult<()> {
        let parts = {
            let active = self.active.read();
            match active.as_ref() {
                Some(parts) if parts.session.state() == SessionState::Capturing => {
                    Arc::clone(parts)
                }
                _ => return Err(CaptureError::NotCapturing),
            }
        };

        if discard {
            // Flag first: the producer context must see the no-op
            // behavior even while the worker is mid-flush.
            parts.session.cancel();
        }
        parts.session.begin_stopping();

        let completed = parts
            .worker
            .lock()
            .stop(discard, self.config.stop_timeout());
        if !completed {
            parts.session.stats().mark_partial_stop();
            tracing::warn!(
                timeout_ms = self.config.stop_timeout_ms,
                "final flush overran stop timeout; session reset to idle"
            );
        }

        *self.last_stats.lock() = parts.session.stats().snapshot();
        *self.active.write() = None;

        if completed {
            Ok(())
        } else {
            Err(CaptureError::StopTimeout {
                timeout_ms: self.config.stop_timeout_ms,
            })
        }
    }

    /// Suspends ingestion. No-op when idle or already paused.
    pub fn pause(&self) {
        if let Some(parts) = self.active.read().as_ref() {
            parts.session.pause();
        }
    }

    /// Resumes ingestion. No-op when idle or not paused.
    pub fn resume(&self) {
        if let Some(parts) = self.active.read().as_ref() {
            parts.session.resume();
        }
    }

    /// True while a session is in the `Capturing` state.
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.session_state() == SessionState::Capturing
    }

    /// True if the active session is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.active
            .read()
            .as_ref()
            .is_some_and(|p| p.session.is_paused())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.active
            .read()
            .as_ref()
            .map_or(SessionState::Idle, |p| p.session.state())
    }

    /// Display name of the level being captured, if any.
    #[must_use]
    pub fn current_level_name(&self) -> Option<String> {
        self.active
            .read()
            .as_ref()
            .map(|p| p.session.origin().level_name.clone())
    }

    /// Progress statistics: the live session's, or the last ended
    /// session's when idle.
    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        match self.active.read().as_ref() {
            Some(parts) => {
                let mut snap = parts.session.stats().snapshot();
                snap.staged_pending = parts.staging.len();
                snap
            }
            None => *self.last_stats.lock(),
        }
    }

    /// Routes one observation from the event source into staging.
    ///
    /// Cheap on the common path: atomic state checks, a radius test,
    /// one map insert. Late events while idle, stopping, paused or
    /// cancelled are silently ignored. The only blocking path is
    /// staging backpressure.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::BackpressureTimeout`] if the staging
    /// buffer stays full past the configured timeout.
    pub fn ingest(&self, event: CaptureEvent) -> CaptureResult<()> {
        let active = self.active.read();
        let Some(parts) = active.as_ref() else {
            return Ok(());
        };
        if !parts.session.accepts_ingest() {
            return Ok(());
        }

        match event {
            CaptureEvent::Chunk(obs) => {
                let origin = parts.session.origin().origin_chunk;
                if obs.pos.chebyshev_distance(origin) > self.config.capture_radius {
                    return Ok(());
                }
                parts.staging.stage(obs.into_record())?;
                if parts.staging.len() >= self.config.flush_threshold() {
                    // Through the lock-free handle: a stop holding the
                    // worker mutex for its final drain must not stall
                    // a producer that slipped past the state check.
                    parts.nudge.nudge();
                }
            }
            CaptureEvent::Entity(obs) => {
                parts.tracker.observe(obs.snapshot);
            }
        }
        Ok(())
    }
}

/// Writes `capture_meta.json` into the archive so the tooling can
/// recognize its own captures later.
fn write_meta_file(session: &CaptureSession) {
    let started_at_ms = session
        .started_at()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let origin = session.origin();
    let meta = serde_json::json!({
        "created_by": "worldvault",
        "level_id": origin.level_id,
        "level_name": origin.sanitized_level_name(),
        "started_at_ms": started_at_ms,
    });
    let path: PathBuf = session.target().join("capture_meta.json");
    if let Err(e) = std::fs::write(&path, meta.to_string()) {
        // Metadata is best-effort; the archive itself is unaffected.
        tracing::warn!(path = %path.display(), "failed to write capture metadata: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChunkObservation, EntityObservation};
    use std::time::Duration;
    use tempfile::TempDir;
    use worldvault_storage::{ChunkPayload, ChunkPos, Completeness, EntitySnapshot};

    fn origin() -> CaptureOrigin {
        CaptureOrigin::new("overworld", "test-server", ChunkPos::new(0, 0))
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            flush_interval_ms: 20,
            ..CaptureConfig::default()
        }
    }

    fn chunk_event(x: i32, z: i32) -> CaptureEvent {
        ChunkObservation::new(
            ChunkPos::new(x, z),
            Completeness::Full,
            ChunkPayload {
                blocks: vec![1; 64],
                ..Default::default()
            },
        )
        .into()
    }

    #[test]
    fn test_second_start_fails_first_unaffected() {
        let dir = TempDir::new().unwrap();
        let manager = CaptureManager::new(fast_config());
        manager.start(dir.path().join("a"), origin()).unwrap();

        let err = manager.start(dir.path().join("b"), origin());
        assert!(matches!(err, Err(CaptureError::AlreadyCapturing)));
        assert!(manager.is_capturing());
        assert_eq!(manager.current_level_name().as_deref(), Some("test-server"));

        manager.stop(false).unwrap();
        assert!(!manager.is_capturing());
    }

    #[test]
    fn test_stop_while_idle_is_not_capturing() {
        let manager = CaptureManager::new(fast_config());
        assert!(matches!(manager.stop(false), Err(CaptureError::NotCapturing)));
    }

    #[test]
    fn test_ingest_while_idle_is_noop() {
        let manager = CaptureManager::new(fast_config());
        manager.ingest(chunk_event(0, 0)).unwrap();
        assert_eq!(manager.stats(), CaptureStats::default());
    }

    #[test]
    fn test_pause_suppresses_ingest() {
        let dir = TempDir::new().unwrap();
        let manager = CaptureManager::new(fast_config());
        manager.start(dir.path(), origin()).unwrap();

        manager.pause();
        assert!(manager.is_paused());
        manager.ingest(chunk_event(0, 0)).unwrap();
        manager.resume();
        manager.ingest(chunk_event(1, 0)).unwrap();
        manager.stop(false).unwrap();

        // Only the post-resume chunk landed.
        assert_eq!(manager.stats().chunks_written, 1);
    }

    #[test]
    fn test_radius_filter_drops_far_chunks() {
        let dir = TempDir::new().unwrap();
        let config = CaptureConfig {
            capture_radius: 4,
            ..fast_config()
        };
        let manager = CaptureManager::new(config);
        manager.start(dir.path(), origin()).unwrap();

        manager.ingest(chunk_event(3, -2)).unwrap(); // inside
        manager.ingest(chunk_event(5, 0)).unwrap(); // outside
        manager.stop(false).unwrap();

        assert_eq!(manager.stats().chunks_written, 1);
    }

    #[test]
    fn test_meta_file_written_at_start() {
        let dir = TempDir::new().unwrap();
        let manager = CaptureManager::new(fast_config());
        let o = CaptureOrigin::new("overworld", "play.host:25565", ChunkPos::new(0, 0));
        manager.start(dir.path(), o).unwrap();
        manager.stop(false).unwrap();

        let meta = std::fs::read_to_string(dir.path().join("capture_meta.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&meta).unwrap();
        assert_eq!(parsed["created_by"], "worldvault");
        assert_eq!(parsed["level_name"], "play.host_25565");
        assert!(parsed["started_at_ms"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_threshold_crossing_flushes_before_interval() {
        let dir = TempDir::new().unwrap();
        let config = CaptureConfig {
            // Interval far beyond the test's lifetime: only the
            // threshold nudge can trigger a flush.
            flush_interval_ms: 60_000,
            staging_high_water_mark: 4,
            ..CaptureConfig::default()
        };
        let manager = CaptureManager::new(config);
        manager.start(dir.path(), origin()).unwrap();

        for x in 0..3 {
            manager.ingest(chunk_event(x, 0)).unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while manager.stats().chunks_written < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(manager.stats().chunks_written >= 2);
        manager.stop(false).unwrap();
    }

    #[test]
    fn test_entity_ingest_counts() {
        let dir = TempDir::new().unwrap();
        let manager = CaptureManager::new(fast_config());
        manager.start(dir.path(), origin()).unwrap();
        manager
            .ingest(
                EntityObservation::new(EntitySnapshot {
                    id: 11,
                    kind: "horse".to_string(),
                    position: [1.0, 70.0, -3.0],
                    attributes: vec![9],
                })
                .into(),
            )
            .unwrap();
        manager.stop(false).unwrap();
        assert_eq!(manager.stats().entities_captured, 1);
    }

    #[test]
    fn test_stats_survive_stop() {
        let dir = TempDir::new().unwrap();
        let manager = CaptureManager::new(fast_config());
        manager.start(dir.path(), origin()).unwrap();
        manager.ingest(chunk_event(0, 0)).unwrap();
        manager.stop(false).unwrap();

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(manager.stats().chunks_written, 1);
        assert!(!manager.stats().partial_stop);
    }
}
