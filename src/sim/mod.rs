//! Deterministic race simulation
//!
//! All race outcomes are computed here, once per round. This module must be
//! pure and deterministic:
//! - Fixed timestep only
//! - Seeded RNG only
//! - Stable iteration order (by player id)
//! - No rendering or network dependencies

pub mod builder;
pub mod condition;
pub mod hash;
pub mod physics;
pub mod rank;
pub mod script;
pub mod state;
pub mod stats;

pub use builder::{BuildRequest, RaceEntry, build_script, finalize_rankings, slowmo_trigger_ms};
pub use condition::{RoundKey, condition_roll};
pub use rank::RankChange;
pub use script::{Event, EventKind, Keyframe, RaceScript, Ranking, ScriptMeta};
pub use state::EntitySimState;
pub use stats::{
    Abilities, Augment, DerivedParameters, RunnerProfile, SpecialAbility, StatType, Stats,
    normalize_stat,
};
