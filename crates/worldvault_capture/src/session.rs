//! # Capture Session
//!
//! The lifecycle state machine for one capture.
//!
//! ## States
//!
//! - **Idle**: no session object exists.
//! - **Capturing**: ingestion routes observations into staging.
//! - **Stopping**: the final drain is in flight; ingestion is a no-op.
//!
//! Pause is not a state of its own: it suspends ingestion without
//! losing session identity or statistics, and the persistence worker
//! keeps running underneath it.

use crate::stats::SharedStats;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use worldvault_storage::ChunkPos;

/// Longest accepted level name; longer names are truncated.
pub const MAX_LEVEL_NAME_LENGTH: usize = 64;

/// Lifecycle state of the capture engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No active session.
    Idle = 0,
    /// Observations are being captured.
    Capturing = 1,
    /// Final drain in progress; late events are ignored.
    Stopping = 2,
}

/// Where a capture came from: world identity plus the chunk the
/// capture radius is measured from.
#[derive(Clone, Debug)]
pub struct CaptureOrigin {
    /// Stable world/level identifier (e.g. dimension key).
    pub level_id: String,
    /// Display name of the level (server address or world name).
    pub level_name: String,
    /// Chunk the capture radius is centered on.
    pub origin_chunk: ChunkPos,
}

impl CaptureOrigin {
    /// Creates an origin descriptor.
    #[must_use]
    pub fn new(
        level_id: impl Into<String>,
        level_name: impl Into<String>,
        origin_chunk: ChunkPos,
    ) -> Self {
        Self {
            level_id: level_id.into(),
            level_name: level_name.into(),
            origin_chunk,
        }
    }

    /// Level name made filesystem-friendly: `:` becomes `_` (server
    /// addresses carry ports) and the result is capped at
    /// [`MAX_LEVEL_NAME_LENGTH`] characters.
    #[must_use]
    pub fn sanitized_level_name(&self) -> String {
        self.level_name
            .replace(':', "_")
            .chars()
            .take(MAX_LEVEL_NAME_LENGTH)
            .collect()
    }
}

/// One capture session: identity is the archive target path.
///
/// Created on `start`, dropped when the engine returns to idle.
pub struct CaptureSession {
    target: PathBuf,
    origin: CaptureOrigin,
    started_at: SystemTime,
    state: AtomicU8,
    paused: AtomicBool,
    cancelled: AtomicBool,
    stats: Arc<SharedStats>,
}

impl CaptureSession {
    /// Creates a session in the `Capturing` state.
    #[must_use]
    pub fn new(target: PathBuf, origin: CaptureOrigin) -> Self {
        tracing::info!(
            target_dir = %target.display(),
            level = %origin.level_name,
            "capture session started"
        );
        Self {
            target,
            origin,
            started_at: SystemTime::now(),
            state: AtomicU8::new(SessionState::Capturing as u8),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            stats: SharedStats::new_shared(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            1 => SessionState::Capturing,
            2 => SessionState::Stopping,
            _ => SessionState::Idle,
        }
    }

    /// Moves `Capturing -> Stopping`. Ingestion becomes a no-op from
    /// the producer's next observation onward.
    pub fn begin_stopping(&self) {
        self.state
            .store(SessionState::Stopping as u8, Ordering::Release);
        tracing::info!(level = %self.origin.level_name, "capture session stopping");
    }

    /// True while observations should be routed into staging.
    ///
    /// Cheap enough for the producer hot path: three relaxed-ish
    /// atomic loads, no locks.
    #[must_use]
    pub fn accepts_ingest(&self) -> bool {
        self.state.load(Ordering::Acquire) == SessionState::Capturing as u8
            && !self.paused.load(Ordering::Acquire)
            && !self.cancelled.load(Ordering::Acquire)
    }

    /// Suspends ingestion. Does not flush eagerly; the worker keeps
    /// its cadence.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            tracing::info!(level = %self.origin.level_name, "capture paused");
        }
    }

    /// Resumes ingestion.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            tracing::info!(level = %self.origin.level_name, "capture resumed");
        }
    }

    /// True if ingestion is currently suspended.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Marks the session cancelled (discard stop). Immediately
    /// observable by the producer context.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True if the session was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Archive target directory.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Origin descriptor.
    #[must_use]
    pub fn origin(&self) -> &CaptureOrigin {
        &self.origin
    }

    /// Session start time.
    #[must_use]
    pub const fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Shared statistics accumulator.
    #[must_use]
    pub fn stats(&self) -> Arc<SharedStats> {
        Arc::clone(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CaptureSession {
        CaptureSession::new(
            PathBuf::from("/tmp/wv-test"),
            CaptureOrigin::new("overworld", "play.example.org:25565", ChunkPos::new(0, 0)),
        )
    }

    #[test]
    fn test_new_session_accepts_ingest() {
        let s = session();
        assert_eq!(s.state(), SessionState::Capturing);
        assert!(s.accepts_ingest());
    }

    #[test]
    fn test_pause_resume_preserves_identity() {
        let s = session();
        s.pause();
        assert!(s.is_paused());
        assert!(!s.accepts_ingest());
        assert_eq!(s.state(), SessionState::Capturing);
        s.resume();
        assert!(s.accepts_ingest());
    }

    #[test]
    fn test_stopping_rejects_ingest() {
        let s = session();
        s.begin_stopping();
        assert_eq!(s.state(), SessionState::Stopping);
        assert!(!s.accepts_ingest());
    }

    #[test]
    fn test_cancel_rejects_ingest() {
        let s = session();
        s.cancel();
        assert!(!s.accepts_ingest());
    }

    #[test]
    fn test_level_name_sanitization() {
        let origin = CaptureOrigin::new("overworld", "play.example.org:25565", ChunkPos::new(0, 0));
        assert_eq!(origin.sanitized_level_name(), "play.example.org_25565");

        let long = "x".repeat(100);
        let origin = CaptureOrigin::new("overworld", long, ChunkPos::new(0, 0));
        assert_eq!(origin.sanitized_level_name().len(), MAX_LEVEL_NAME_LENGTH);
    }
}
