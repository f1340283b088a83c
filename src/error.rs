//! Error types
//!
//! Build errors are fatal to a single script build. Poll errors are transient
//! and retried by the playback engine. Invariant violations never leave the
//! engine: they are clamped in place and only logged.

use thiserror::Error;

/// A race script could not be built from the supplied inputs.
///
/// No defaults are ever substituted: every client must be able to rebuild the
/// exact same script from the same inputs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("race has no entries")]
    EmptyRoster,

    #[error("entry has an empty player id")]
    EmptyPlayerId,

    #[error("duplicate player id: {0}")]
    DuplicatePlayer(String),

    #[error("invalid stat {stat} for player {player}: {value}")]
    InvalidStat {
        player: String,
        stat: &'static str,
        value: f64,
    },

    #[error("invalid augment value for player {player}: {value}")]
    InvalidAugment { player: String, value: f64 },

    #[error("invalid condition roll for player {player}: {value}")]
    InvalidConditionRoll { player: String, value: f64 },

    #[error("invalid simulation settings: {0}")]
    InvalidSettings(String),

    #[error("failed to serialize build inputs: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BuildError {
    fn from(e: serde_json::Error) -> Self {
        BuildError::Serialization(e.to_string())
    }
}

/// A snapshot poll failed. Always recoverable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    #[error("poll timed out after {0} ms")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for PollError {
    fn from(e: serde_json::Error) -> Self {
        PollError::Malformed(e.to_string())
    }
}

/// A playback invariant was violated and clamped in place.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    #[error("non-finite frame delta: {0}")]
    NonFiniteDelta(f64),

    #[error("negative frame delta: {0} ms")]
    NegativeDelta(f64),

    #[error("non-finite clock target: {0}")]
    NonFiniteTarget(f64),

    #[error("non-finite position for {player}: {value}")]
    NonFinitePosition { player: String, value: f64 },

    #[error("position for {player} moved backward by {delta} m")]
    NegativePositionDelta { player: String, delta: f64 },
}

/// Settings could not be loaded or saved.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings json: {0}")]
    Json(#[from] serde_json::Error),
}
