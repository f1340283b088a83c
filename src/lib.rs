//! Race Sync - deterministic horse-race simulation and client playback
//!
//! Core modules:
//! - `sim`: Deterministic race script builder (stats, physics, ranking)
//! - `sync`: Client reconciliation of a replicated race script
//! - `settings`: Tunable simulation and playback parameters
//! - `error`: Error types shared across the crate

pub mod error;
pub mod settings;
pub mod sim;
pub mod sync;

#[cfg(target_arch = "wasm32")]
pub mod web;

pub use error::{BuildError, PollError, SettingsError};
pub use settings::{Settings, SimSettings, SyncSettings};

/// Race configuration constants
pub mod consts {
    /// Fixed simulation timestep (20 Hz)
    pub const SIM_STEP_MS: u64 = 50;
    /// Keyframe sampling cadence
    pub const KEYFRAME_MS: u64 = 100;
    /// Hard cap on simulated race time
    pub const MAX_SIM_MS: u64 = 120_000;
    /// Default track length in meters
    pub const TRACK_LENGTH_M: f64 = 155.0;

    /// Stat ceiling used by normalization
    pub const MAX_STAT: f64 = 40.0;
    /// Curvature of the diminishing-returns normalization
    pub const NORM_RATE: f64 = 2.0;

    /// Stamina pool every runner starts with
    pub const MAX_STAMINA: f64 = 100.0;
    /// Stamina recovered on a successful overtake
    pub const OVERTAKE_STAMINA_RECOVERY: f64 = 3.0;
    /// Ranks at or beyond this trigger escape crisis
    pub const ESCAPE_CRISIS_RANK: u32 = 4;

    /// Fraction of the track that counts as the start zone
    pub const START_ZONE_PROGRESS: f64 = 0.2;
    /// Stamina ratio above which no fatigue applies
    pub const FATIGUE_THRESHOLD: f64 = 0.85;
    /// Exponent of the fatigue curve
    pub const FATIGUE_EXPONENT: f64 = 0.8;
    /// Scales accel factor into the log ramp curvature
    pub const RAMP_CURVATURE: f64 = 3.0;

    /// Stamina drain per meter at zero speed
    pub const DRAIN_BASE: f64 = 0.35;
    /// Additional drain per meter at cap speed
    pub const DRAIN_SPEED_FACTOR: f64 = 0.35;
    /// Speed (m/s) at which the speed term of drain saturates
    pub const DRAIN_SPEED_CAP: f64 = 20.0;
    /// Extra drain for fast runners (scaled by normalized speed)
    pub const DRAIN_SPEED_PENALTY: f64 = 0.3;

    /// Slow-motion fires at this fraction of the winner's finish time
    pub const SLOWMO_TRIGGER_RATIO: f64 = 0.95;
}

/// Convert km/h to m/s
#[inline]
pub fn kmh_to_ms(kmh: f64) -> f64 {
    kmh / 3.6
}
