//! Per-runner simulation state
//!
//! Plain data. Transitions (`step`, `update_rank`) take `&self` and return a
//! new state, so a tick can be replayed or unit tested without any shared
//! object graph.

use serde::{Deserialize, Serialize};

use crate::consts::MAX_STAMINA;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySimState {
    /// Distance covered (m), never decreases
    pub position: f64,
    /// Speed used for the last step (m/s)
    pub current_speed: f64,
    /// Remaining stamina in [0, MAX_STAMINA]
    pub stamina: f64,
    /// Sticky once set
    pub finished: bool,
    /// Race time (s) at which the line was crossed, set at most once
    pub finish_time: Option<f64>,
    /// `None` until the first ranking snapshot
    pub current_rank: Option<u32>,
    pub previous_rank: Option<u32>,
    pub overtake_count: u32,
    /// True only for the tick in which an overtake bonus was granted
    pub overtake_bonus_active: bool,
    pub escape_crisis_active: bool,
    pub escape_crisis_used: bool,
    /// One-shot latch
    pub last_spurt_active: bool,
}

impl Default for EntitySimState {
    fn default() -> Self {
        Self {
            position: 0.0,
            current_speed: 0.0,
            stamina: MAX_STAMINA,
            finished: false,
            finish_time: None,
            current_rank: None,
            previous_rank: None,
            overtake_count: 0,
            overtake_bonus_active: false,
            escape_crisis_active: false,
            escape_crisis_used: false,
            last_spurt_active: false,
        }
    }
}

impl EntitySimState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamina as a fraction of the full pool
    pub fn stamina_ratio(&self) -> f64 {
        (self.stamina / MAX_STAMINA).clamp(0.0, 1.0)
    }

    /// Race progress in [0, 1]
    pub fn progress(&self, track_length: f64) -> f64 {
        (self.position / track_length).clamp(0.0, 1.0)
    }
}
