//! Replicated script log
//!
//! Client-side copy of the authoritative script, filled by polls and read by
//! the render step. Keyframes live in a bounded ring ordered by elapsed
//! time; events are keyed by id so redelivery is harmless.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::sim::{Event, Keyframe, Ranking};

use super::interpolate::{self, Sample};
use super::wire::{PollResponse, RaceStatus};

/// Timing facts from the newest successful poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSample {
    /// Authoritative race time when the response was produced
    pub race_time_ms: f64,
    /// Local clock when the response arrived
    pub received_local_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub new_keyframes: usize,
    pub new_events: usize,
    pub dropped_keyframes: usize,
    /// Older than the newest response already applied
    pub stale: bool,
}

#[derive(Debug, Clone)]
pub struct ReplicatedLog {
    capacity: usize,
    keyframes: VecDeque<Keyframe>,
    events: BTreeMap<u64, Event>,
    players: BTreeSet<String>,
    rankings: Vec<Ranking>,
    status: RaceStatus,
    track_length_m: Option<f64>,
    timing: Option<TimingSample>,
    /// Server clock of the response that last set `status` and `timing`
    authoritative_ms: Option<i64>,
}

impl ReplicatedLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            keyframes: VecDeque::with_capacity(capacity.max(2)),
            events: BTreeMap::new(),
            players: BTreeSet::new(),
            rankings: Vec::new(),
            status: RaceStatus::Prepared,
            track_length_m: None,
            timing: None,
            authoritative_ms: None,
        }
    }

    /// Elapsed time of the newest keyframe held
    pub fn cursor(&self) -> Option<u64> {
        self.keyframes.back().map(|kf| kf.elapsed_ms)
    }

    pub fn status(&self) -> RaceStatus {
        self.status
    }

    pub fn timing(&self) -> Option<TimingSample> {
        self.timing
    }

    pub fn track_length_m(&self) -> Option<f64> {
        self.track_length_m
    }

    pub fn rankings(&self) -> &[Ranking] {
        &self.rankings
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframes.len()
    }

    pub fn latest_keyframe(&self) -> Option<&Keyframe> {
        self.keyframes.back()
    }

    pub fn player_ids(&self) -> impl Iterator<Item = &String> {
        self.players.iter()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Merge one poll response
    pub fn ingest(&mut self, response: &PollResponse, local_now_ms: f64) -> IngestStats {
        let mut stats = IngestStats::default();
        if !response.has_race_state {
            return stats;
        }

        // A late reply to an abandoned poll must not rewind status or timing
        let fresh = self
            .authoritative_ms
            .is_none_or(|held| response.authoritative_now_ms >= held);
        if fresh {
            self.authoritative_ms = Some(response.authoritative_now_ms);
            self.status = response.status;
            if response.carries_timing() {
                self.timing = Some(TimingSample {
                    race_time_ms: response.race_time_ms(),
                    received_local_ms: local_now_ms,
                });
            }
        } else {
            stats.stale = true;
        }
        if let Some(track) = response.track_length_m.filter(|t| t.is_finite() && *t > 0.0) {
            self.track_length_m = Some(track);
        }
        if !response.rankings.is_empty() {
            self.rankings = response.rankings.clone();
        }

        for kf in response.all_keyframes() {
            if let Some(dropped) = self.insert_keyframe(kf) {
                stats.new_keyframes += 1;
                stats.dropped_keyframes += dropped;
            }
        }
        for event in &response.events_window {
            if !self.events.contains_key(&event.id) {
                self.events.insert(event.id, event.clone());
                stats.new_events += 1;
            }
        }
        stats
    }

    /// Insert in elapsed order; returns how many old keyframes were evicted,
    /// or `None` for a duplicate or a keyframe older than the whole ring
    fn insert_keyframe(&mut self, kf: &Keyframe) -> Option<usize> {
        let idx = self
            .keyframes
            .partition_point(|k| k.elapsed_ms < kf.elapsed_ms);
        if self
            .keyframes
            .get(idx)
            .is_some_and(|k| k.elapsed_ms == kf.elapsed_ms)
        {
            return None;
        }
        if idx == 0 && self.keyframes.len() >= self.capacity {
            return None;
        }

        self.players.extend(kf.positions.keys().cloned());
        self.keyframes.insert(idx, kf.clone());
        let mut dropped = 0;
        while self.keyframes.len() > self.capacity {
            self.keyframes.pop_front();
            dropped += 1;
        }
        Some(dropped)
    }

    /// Typical keyframe spacing, from the two newest keyframes
    pub fn frame_span_ms(&self) -> f64 {
        let n = self.keyframes.len();
        if n >= 2 {
            (self.keyframes[n - 1].elapsed_ms - self.keyframes[n - 2].elapsed_ms) as f64
        } else {
            crate::consts::KEYFRAME_MS as f64
        }
    }

    /// Authoritative estimate for runner `id` at `render_ms`
    pub fn sample(&self, id: &str, render_ms: f64, epsilon: f64) -> Option<Sample> {
        let idx = self
            .keyframes
            .partition_point(|k| k.elapsed_ms as f64 <= render_ms);
        if idx == 0 {
            let first = self.keyframes.front()?;
            return Some(interpolate::hold(first, id, first.position(id)?));
        }
        let a = &self.keyframes[idx - 1];
        match self.keyframes.get(idx) {
            Some(b) => interpolate::between(a, b, id, render_ms, epsilon),
            None => interpolate::beyond(a, id, render_ms, self.frame_span_ms()),
        }
    }

    /// Newest known position for `id`
    pub fn latest_position(&self, id: &str) -> Option<f64> {
        self.keyframes.iter().rev().find_map(|kf| kf.position(id))
    }

    /// Events at or before `upto_ms`, in timestamp order
    pub fn events_until(&self, upto_ms: f64) -> Vec<&Event> {
        let mut due: Vec<&Event> = self
            .events
            .values()
            .filter(|e| e.elapsed_ms as f64 <= upto_ms)
            .collect();
        due.sort_by_key(|e| (e.elapsed_ms, e.id));
        due
    }
}
