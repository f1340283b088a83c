//! Simulation and playback settings
//!
//! Every field has a serde default so partial JSON files are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::{BuildError, SettingsError};
use crate::sync::profile::ProfileTable;

/// Parameters of the authoritative script build.
///
/// These are part of the build inputs and feed the content hash, so two
/// builds only match if their settings match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimSettings {
    /// Physics step in milliseconds
    pub step_ms: u64,
    /// Keyframe cadence in milliseconds (multiple of `step_ms`)
    pub frame_ms: u64,
    /// Simulation stops here even if runners are still on track
    pub max_sim_ms: u64,
    /// Track length in meters
    pub track_length_m: f64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            step_ms: SIM_STEP_MS,
            frame_ms: KEYFRAME_MS,
            max_sim_ms: MAX_SIM_MS,
            track_length_m: TRACK_LENGTH_M,
        }
    }
}

impl SimSettings {
    /// Reject settings the builder cannot run with
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.step_ms == 0 {
            return Err(BuildError::InvalidSettings("step_ms must be > 0".into()));
        }
        if self.frame_ms == 0 || self.frame_ms % self.step_ms != 0 {
            return Err(BuildError::InvalidSettings(format!(
                "frame_ms {} must be a positive multiple of step_ms {}",
                self.frame_ms, self.step_ms
            )));
        }
        if self.max_sim_ms < self.frame_ms {
            return Err(BuildError::InvalidSettings(format!(
                "max_sim_ms {} shorter than one frame",
                self.max_sim_ms
            )));
        }
        if !self.track_length_m.is_finite() || self.track_length_m <= 0.0 {
            return Err(BuildError::InvalidSettings(format!(
                "track_length_m {} must be positive",
                self.track_length_m
            )));
        }
        Ok(())
    }

    pub fn step_secs(&self) -> f64 {
        self.step_ms as f64 / 1000.0
    }
}

/// Client playback tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    // === Polling ===
    /// Interval between snapshot polls
    pub poll_interval_ms: f64,
    /// Minimum time spent bootstrapping even when data arrives early
    pub bootstrap_min_ms: f64,
    /// Bootstrapping gives up waiting after this long
    pub bootstrap_timeout_ms: f64,
    /// Capacity of the keyframe ring
    pub keyframe_capacity: usize,

    // === Time axis ===
    /// How far behind authoritative time the render clock runs
    pub render_delay_ms: f64,
    /// Exponential smoothing factor of the render clock
    pub clock_alpha: f64,
    /// Clock gap that triggers an immediate jump
    pub clock_hard_snap_ms: f64,

    // === Position axis ===
    /// Slack around the keyframe pair when clamping Hermite output
    pub hermite_epsilon_m: f64,
    /// Leader progress at which the finish-zone profile applies
    pub finish_zone_progress: f64,
    /// Per-phase correction tables
    pub profiles: ProfileTable,

    // === Events and completion ===
    /// Events fire once the render clock is within this of their timestamp
    pub event_tolerance_ms: f64,
    /// A runner within this of the line counts as visually finished
    pub finish_epsilon_m: f64,
    /// Longest wait for visual arrival once the race is decided
    pub completion_fallback_ms: f64,
    /// Track length used until a snapshot reports one
    pub track_length_m: f64,

    // === Diagnostics ===
    /// Hard snaps tolerated per window before warning
    pub desync_snap_limit: usize,
    /// Window over which hard snaps are counted
    pub desync_window_ms: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 150.0,
            bootstrap_min_ms: 300.0,
            bootstrap_timeout_ms: 3000.0,
            keyframe_capacity: 64,

            render_delay_ms: 90.0,
            clock_alpha: 0.15,
            clock_hard_snap_ms: 600.0,

            hermite_epsilon_m: 0.01,
            finish_zone_progress: 0.85,
            profiles: ProfileTable::default(),

            event_tolerance_ms: 24.0,
            finish_epsilon_m: 0.05,
            completion_fallback_ms: 1200.0,
            track_length_m: TRACK_LENGTH_M,

            desync_snap_limit: 6,
            desync_window_ms: 2000.0,
        }
    }
}

/// All tunables, loadable from one JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sim: SimSettings,
    pub sync: SyncSettings,
}

impl Settings {
    /// Read settings from a JSON file
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Read settings from a JSON file, falling back to defaults
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(settings) => {
                log::info!("Loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                log::info!("Using default settings ({}: {})", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write settings as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        log::info!("Settings saved to {}", path.as_ref().display());
        Ok(())
    }
}
