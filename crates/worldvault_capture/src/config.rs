//! # Capture Configuration
//!
//! Tunables for a capture session, loadable from a TOML file.

use crate::error::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use worldvault_storage::OverwritePolicy;

/// Configuration for the capture engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Chunks accepted around the capture origin (Chebyshev radius).
    pub capture_radius: u32,
    /// Persistence worker cadence in milliseconds.
    pub flush_interval_ms: u64,
    /// Staged records above which `stage` applies backpressure.
    pub staging_high_water_mark: usize,
    /// How long a producer may block on a full staging buffer before
    /// failing with `BackpressureTimeout`.
    pub stage_timeout_ms: u64,
    /// How long `stop(discard = false)` waits for the final flush
    /// before failing with `StopTimeout`.
    pub stop_timeout_ms: u64,
    /// Merge policy for chunk data already present in the archive.
    pub overwrite_policy: ConfiguredOverwritePolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_radius: 64,
            flush_interval_ms: 500,
            staging_high_water_mark: 4096,
            stage_timeout_ms: 2_000,
            stop_timeout_ms: 30_000,
            overwrite_policy: ConfiguredOverwritePolicy::MergeKeepMostComplete,
        }
    }
}

impl CaptureConfig {
    /// Production preset: wider radius, larger staging headroom.
    ///
    /// Sized so a 24 ms disk latency spike never backpressures a
    /// render-tick producer observing a full view distance.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            capture_radius: 128,
            flush_interval_ms: 250,
            staging_high_water_mark: 16_384,
            stage_timeout_ms: 5_000,
            stop_timeout_ms: 60_000,
            overwrite_policy: ConfiguredOverwritePolicy::MergeKeepMostComplete,
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Storage`] if the file is unreadable and
    /// [`CaptureError::InvalidConfig`] if it fails to parse.
    pub fn from_toml_file(path: impl AsRef<Path>) -> CaptureResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(worldvault_storage::StorageError::from)?;
        let config = toml::from_str(&text).map_err(CaptureError::InvalidConfig)?;
        Ok(config)
    }

    /// Worker cadence as a [`Duration`].
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Producer backpressure timeout as a [`Duration`].
    #[must_use]
    pub const fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// Stop timeout as a [`Duration`].
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Staging size at which the worker is nudged to flush early,
    /// ahead of its interval.
    #[must_use]
    pub const fn flush_threshold(&self) -> usize {
        self.staging_high_water_mark / 2
    }

    /// The storage-layer overwrite policy.
    #[must_use]
    pub const fn overwrite_policy(&self) -> OverwritePolicy {
        match self.overwrite_policy {
            ConfiguredOverwritePolicy::MergeKeepMostComplete => {
                OverwritePolicy::MergeKeepMostComplete
            }
            ConfiguredOverwritePolicy::AlwaysOverwrite => OverwritePolicy::AlwaysOverwrite,
        }
    }
}

/// Serde-facing mirror of [`OverwritePolicy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfiguredOverwritePolicy {
    /// Keep the most complete record per chunk.
    MergeKeepMostComplete,
    /// Always take the incoming record.
    AlwaysOverwrite,
}
