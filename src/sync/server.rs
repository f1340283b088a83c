//! Authoritative snapshot endpoint
//!
//! Serves the slice of a built script that is "live" at a given wall-clock
//! instant. Events are resent for a short window behind the client cursor so
//! a lost response never loses an event; clients deduplicate by id.

use crate::sim::{Keyframe, RaceScript, RoundKey};

use super::wire::{PollRequest, PollResponse, RaceStatus};

/// How far behind the cursor events are redelivered
pub const EVENT_REDELIVERY_MS: u64 = 2000;
/// Most keyframes sent in one response
pub const MAX_KEYFRAMES_PER_POLL: usize = 64;

#[derive(Debug, Clone)]
pub struct SnapshotServer<'a> {
    script: &'a RaceScript,
    round: RoundKey,
    started_at_ms: i64,
}

impl<'a> SnapshotServer<'a> {
    pub fn new(script: &'a RaceScript, round: RoundKey, started_at_ms: i64) -> Self {
        Self {
            script,
            round,
            started_at_ms,
        }
    }

    pub fn round(&self) -> &RoundKey {
        &self.round
    }

    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    pub fn status_at(&self, elapsed_ms: i64) -> RaceStatus {
        if elapsed_ms < 0 {
            RaceStatus::Prepared
        } else if elapsed_ms as u64 >= self.script.meta.duration_ms {
            RaceStatus::Completed
        } else {
            RaceStatus::Running
        }
    }

    /// Answer one poll at server wall-clock `now_ms`
    pub fn respond(&self, now_ms: i64, request: &PollRequest) -> PollResponse {
        if request.round != self.round {
            log::debug!(
                "Poll for {}#{} on {}#{}",
                request.round.room_id,
                request.round.round,
                self.round.room_id,
                self.round.round
            );
            return PollResponse {
                has_race_state: false,
                authoritative_now_ms: now_ms,
                round: Some(self.round.clone()),
                ..Default::default()
            };
        }

        let elapsed = now_ms - self.started_at_ms;
        let status = self.status_at(elapsed);
        let mut response = PollResponse {
            has_race_state: true,
            status,
            elapsed_ms: elapsed,
            authoritative_now_ms: now_ms,
            started_at_millis: Some(self.started_at_ms),
            track_length_m: Some(self.script.meta.track_length_m),
            round: Some(self.round.clone()),
            ..Default::default()
        };
        if status == RaceStatus::Prepared {
            return response;
        }

        let elapsed = elapsed as u64;
        let keyframe = self.script.keyframe_at(elapsed).cloned();
        let next = self.script.next_keyframe_after(elapsed).cloned();
        let horizon = next
            .as_ref()
            .or(keyframe.as_ref())
            .map_or(0, |kf| kf.elapsed_ms);

        response.keyframes_since = self.keyframes_since(request.since_ms, horizon);
        let window_start = request
            .since_ms
            .map(|since| since.saturating_sub(EVENT_REDELIVERY_MS));
        response.events_window = self
            .script
            .events
            .iter()
            .filter(|e| window_start.is_none_or(|start| e.elapsed_ms > start))
            .filter(|e| e.elapsed_ms <= horizon)
            .cloned()
            .collect();
        if status == RaceStatus::Completed {
            response.rankings = self.script.rankings.clone();
        }
        response.keyframe = keyframe;
        response.next_keyframe = next;
        response
    }

    /// Keyframes after `since` up to `horizon`, newest `MAX_KEYFRAMES_PER_POLL`
    fn keyframes_since(&self, since: Option<u64>, horizon: u64) -> Vec<Keyframe> {
        let fresh: Vec<&Keyframe> = self
            .script
            .keyframes
            .iter()
            .filter(|kf| since.is_none_or(|s| kf.elapsed_ms > s))
            .filter(|kf| kf.elapsed_ms <= horizon)
            .collect();
        let skip = fresh.len().saturating_sub(MAX_KEYFRAMES_PER_POLL);
        fresh.into_iter().skip(skip).cloned().collect()
    }
}
