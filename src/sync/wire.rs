//! Snapshot poll wire contract

use serde::{Deserialize, Serialize};

use crate::error::PollError;
use crate::sim::{Event, Keyframe, Ranking, RoundKey};

/// Authoritative race status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RaceStatus {
    #[default]
    Prepared,
    Running,
    Completed,
}

/// "Everything since my cursor"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub round: RoundKey,
    /// Elapsed time of the newest keyframe the client holds
    #[serde(default)]
    pub since_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub has_race_state: bool,
    #[serde(default)]
    pub status: RaceStatus,
    /// Race time at `authoritative_now_ms`; negative before the start
    #[serde(default)]
    pub elapsed_ms: i64,
    /// Server wall clock when the response was produced
    #[serde(default)]
    pub authoritative_now_ms: i64,
    #[serde(default)]
    pub keyframe: Option<Keyframe>,
    #[serde(default)]
    pub next_keyframe: Option<Keyframe>,
    #[serde(default)]
    pub events_window: Vec<Event>,
    #[serde(default)]
    pub rankings: Vec<Ranking>,
    #[serde(default)]
    pub started_at_millis: Option<i64>,
    /// Keyframes newer than the request cursor, oldest first
    #[serde(default)]
    pub keyframes_since: Vec<Keyframe>,
    #[serde(default)]
    pub track_length_m: Option<f64>,
    #[serde(default)]
    pub round: Option<RoundKey>,
}

impl PollResponse {
    /// True when the response can drive the render clock
    pub fn carries_timing(&self) -> bool {
        self.has_race_state && (self.keyframe.is_some() || self.started_at_millis.is_some())
    }

    /// Race time implied by the server clock, falling back to `elapsed_ms`
    pub fn race_time_ms(&self) -> f64 {
        match self.started_at_millis {
            Some(start) => (self.authoritative_now_ms - start) as f64,
            None => self.elapsed_ms as f64,
        }
    }

    /// Every keyframe carried by the response
    pub fn all_keyframes(&self) -> impl Iterator<Item = &Keyframe> {
        self.keyframes_since
            .iter()
            .chain(self.keyframe.iter())
            .chain(self.next_keyframe.iter())
    }

    pub fn from_json(json: &str) -> Result<Self, PollError> {
        Ok(serde_json::from_str(json)?)
    }
}
