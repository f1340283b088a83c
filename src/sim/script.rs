//! Race script types
//!
//! The immutable output of one build: keyframes, discrete events and the
//! final ranking. These types are also the wire format served to clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of every runner at one instant
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    pub elapsed_ms: u64,
    pub positions: BTreeMap<String, f64>,
    /// Observed speed since the previous keyframe (m/s)
    pub speeds: BTreeMap<String, f64>,
    pub stamina: BTreeMap<String, f64>,
    pub finished: BTreeMap<String, bool>,
}

impl Keyframe {
    pub fn position(&self, id: &str) -> Option<f64> {
        self.positions.get(id).copied()
    }

    pub fn speed(&self, id: &str) -> f64 {
        self.speeds.get(id).copied().unwrap_or(0.0)
    }

    pub fn stamina_of(&self, id: &str) -> f64 {
        self.stamina.get(id).copied().unwrap_or(0.0)
    }

    pub fn is_finished(&self, id: &str) -> bool {
        self.finished.get(id).copied().unwrap_or(false)
    }

    pub fn player_ids(&self) -> impl Iterator<Item = &String> {
        self.positions.keys()
    }
}

/// Discrete race event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    #[serde(rename_all = "camelCase")]
    Overtake {
        player_id: String,
        from_rank: u32,
        to_rank: u32,
    },
    #[serde(rename_all = "camelCase")]
    LastSpurt { player_id: String },
    #[serde(rename_all = "camelCase")]
    Finish { player_id: String, rank: u32 },
    SlowmoTrigger,
}

impl EventKind {
    pub fn player_id(&self) -> Option<&str> {
        match self {
            EventKind::Overtake { player_id, .. }
            | EventKind::LastSpurt { player_id }
            | EventKind::Finish { player_id, .. } => Some(player_id),
            EventKind::SlowmoTrigger => None,
        }
    }
}

/// A timestamped event with a script-unique id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: u64,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Final placing of one runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranking {
    pub player_id: String,
    /// 1-based finishing place
    #[serde(rename = "position")]
    pub rank: u32,
    /// Finish time in seconds (max sim time if the runner never finished)
    pub time: f64,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMeta {
    pub track_length_m: f64,
    pub step_ms: u64,
    pub frame_ms: u64,
    pub max_sim_ms: u64,
    pub slowmo_trigger_ms: Option<u64>,
    /// Elapsed time of the final keyframe
    pub duration_ms: u64,
    /// Hex SHA-256 of the build inputs
    pub content_hash: String,
}

/// Complete replayable record of one race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceScript {
    pub keyframes: Vec<Keyframe>,
    pub events: Vec<Event>,
    pub rankings: Vec<Ranking>,
    pub meta: ScriptMeta,
}

impl RaceScript {
    /// Index of the last keyframe at or before `elapsed_ms`
    pub fn keyframe_index_at(&self, elapsed_ms: u64) -> Option<usize> {
        let idx = self
            .keyframes
            .partition_point(|kf| kf.elapsed_ms <= elapsed_ms);
        idx.checked_sub(1)
    }

    pub fn keyframe_at(&self, elapsed_ms: u64) -> Option<&Keyframe> {
        self.keyframe_index_at(elapsed_ms).map(|i| &self.keyframes[i])
    }

    /// First keyframe strictly after `elapsed_ms`
    pub fn next_keyframe_after(&self, elapsed_ms: u64) -> Option<&Keyframe> {
        let idx = self
            .keyframes
            .partition_point(|kf| kf.elapsed_ms <= elapsed_ms);
        self.keyframes.get(idx)
    }

    pub fn winner(&self) -> Option<&Ranking> {
        self.rankings.first()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
