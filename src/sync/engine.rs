//! Client reconciliation engine
//!
//! Turns polled fragments of the authoritative script into a smooth,
//! monotonic per-frame render state. Driven cooperatively by the host:
//!
//! ```text
//! loop {
//!     if let Some(req) = engine.poll_request(now) { transport.send(req) }
//!     if let Some(result) = transport.recv() { engine.receive(now, result) }
//!     let frame = engine.frame(now);
//!     render(frame);
//! }
//! ```
//!
//! `receive` is the only writer of the replicated log; `frame` only reads it.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::Serialize;

use crate::error::{InvariantViolation, PollError};
use crate::settings::SyncSettings;
use crate::sim::{Event, EventKind, RoundKey};

use super::clock::{ClockCorrection, RenderClock};
use super::log::ReplicatedLog;
use super::profile::{Correction, RacePhase};
use super::wire::{PollRequest, PollResponse, RaceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RaceState {
    /// Waiting for the first usable snapshot
    Bootstrapping,
    /// Have data, race not started yet
    Prepared,
    Running,
    Completed,
}

/// What the renderer draws for one runner
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedEntity {
    pub id: String,
    pub position: f64,
    pub speed: f64,
    pub stamina: f64,
    pub finished: bool,
}

/// Output of one render frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub elapsed_ms: f64,
    pub state: RaceState,
    pub phase: RacePhase,
    pub entities: Vec<RenderedEntity>,
    /// Events consumed this frame, in timestamp order
    pub events: Vec<Event>,
    /// True only on the frame that completed the race
    pub completed_now: bool,
}

/// Counters for telemetry; never shown to players
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub polls_sent: u64,
    pub polls_failed: u64,
    pub responses_discarded: u64,
    pub clock_snaps: u64,
    pub position_snaps: u64,
    pub desync_warnings: u64,
    pub invariant_violations: u64,
    pub degraded_bootstrap: bool,
    pub forced_completion: bool,
}

pub struct ReconciliationEngine {
    round: RoundKey,
    settings: SyncSettings,
    state: RaceState,
    created_at_ms: f64,
    last_frame_ms: Option<f64>,

    log: ReplicatedLog,
    clock: RenderClock,

    poll_in_flight: bool,
    last_poll_ms: Option<f64>,
    seen_timing: bool,

    consumed: HashSet<u64>,
    finish_events_consumed: usize,
    slowmo_active: bool,

    rendered: BTreeMap<String, RenderedEntity>,
    completion_pending_since: Option<f64>,
    snap_times: VecDeque<f64>,
    diagnostics: Diagnostics,
}

impl ReconciliationEngine {
    /// Start observing `round` at local time `now_ms`
    pub fn new(round: RoundKey, settings: SyncSettings, now_ms: f64) -> Self {
        log::info!("Observing {}#{}", round.room_id, round.round);
        Self {
            log: ReplicatedLog::new(settings.keyframe_capacity),
            round,
            settings,
            state: RaceState::Bootstrapping,
            created_at_ms: now_ms,
            last_frame_ms: None,
            clock: RenderClock::new(),
            poll_in_flight: false,
            last_poll_ms: None,
            seen_timing: false,
            consumed: HashSet::new(),
            finish_events_consumed: 0,
            slowmo_active: false,
            rendered: BTreeMap::new(),
            completion_pending_since: None,
            snap_times: VecDeque::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn round(&self) -> &RoundKey {
        &self.round
    }

    pub fn state(&self) -> RaceState {
        self.state
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    pub fn rendered_elapsed_ms(&self) -> f64 {
        self.clock.rendered_ms()
    }

    pub fn is_consumed(&self, event_id: u64) -> bool {
        self.consumed.contains(&event_id)
    }

    pub fn log(&self) -> &ReplicatedLog {
        &self.log
    }

    fn track_length(&self) -> f64 {
        self.log
            .track_length_m()
            .unwrap_or(self.settings.track_length_m)
    }

    // === Polling ===

    /// A request to send now, if one is due and none is in flight
    pub fn poll_request(&mut self, now_ms: f64) -> Option<PollRequest> {
        if self.state == RaceState::Completed || self.poll_in_flight {
            return None;
        }
        let due = self
            .last_poll_ms
            .is_none_or(|last| now_ms - last >= self.settings.poll_interval_ms);
        if !due {
            return None;
        }
        self.poll_in_flight = true;
        self.last_poll_ms = Some(now_ms);
        self.diagnostics.polls_sent += 1;
        Some(PollRequest {
            round: self.round.clone(),
            since_ms: self.log.cursor(),
        })
    }

    /// Deliver the outcome of the in-flight poll
    pub fn receive(&mut self, now_ms: f64, result: Result<PollResponse, PollError>) {
        self.poll_in_flight = false;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.diagnostics.polls_failed += 1;
                log::warn!("Snapshot poll failed, retrying: {}", e);
                return;
            }
        };

        if let Some(round) = &response.round {
            if *round != self.round {
                self.diagnostics.responses_discarded += 1;
                log::debug!(
                    "Discarding snapshot for {}#{} while observing {}#{}",
                    round.room_id,
                    round.round,
                    self.round.room_id,
                    self.round.round
                );
                return;
            }
        }

        let stats = self.log.ingest(&response, now_ms);
        if response.carries_timing() {
            self.seen_timing = true;
        }
        log::trace!(
            "Ingested {} keyframes ({} evicted), {} events",
            stats.new_keyframes,
            stats.dropped_keyframes,
            stats.new_events
        );
    }

    // === Frame ===

    fn record_violation(&mut self, violation: InvariantViolation) {
        self.diagnostics.invariant_violations += 1;
        log::warn!("Playback invariant clamped: {}", violation);
    }

    /// Local frame delta, clamped to a sane value
    fn frame_delta(&mut self, now_ms: f64) -> f64 {
        let dt = match self.last_frame_ms {
            Some(last) => now_ms - last,
            None => 0.0,
        };
        if dt < 0.0 {
            self.record_violation(InvariantViolation::NegativeDelta(dt));
            return 0.0;
        }
        self.last_frame_ms = Some(now_ms);
        dt
    }

    fn advance_state(&mut self, now_ms: f64) {
        match self.state {
            RaceState::Bootstrapping => {
                let age = now_ms - self.created_at_ms;
                if self.seen_timing && age >= self.settings.bootstrap_min_ms {
                    log::info!("Bootstrap complete after {:.0} ms", age);
                    self.state = RaceState::Prepared;
                } else if age >= self.settings.bootstrap_timeout_ms {
                    log::warn!(
                        "Bootstrap timed out after {:.0} ms, continuing degraded",
                        age
                    );
                    self.diagnostics.degraded_bootstrap = true;
                    self.state = RaceState::Prepared;
                }
            }
            RaceState::Prepared => {
                let started = matches!(
                    self.log.status(),
                    RaceStatus::Running | RaceStatus::Completed
                );
                if started && self.log.timing().is_some() && self.log.keyframe_count() > 0 {
                    log::info!("Race running");
                    self.state = RaceState::Running;
                }
            }
            RaceState::Running | RaceState::Completed => {}
        }
    }

    /// Render clock target: authoritative race time minus the render delay,
    /// extrapolated by local time since the sample arrived
    fn clock_target(&self, now_ms: f64) -> Option<f64> {
        let timing = self.log.timing()?;
        Some(
            timing.race_time_ms - self.settings.render_delay_ms
                + (now_ms - timing.received_local_ms),
        )
    }

    fn phase(&self) -> RacePhase {
        let track = self.track_length();
        let leader = self
            .rendered
            .values()
            .map(|e| e.position)
            .fold(0.0, f64::max);
        RacePhase::classify(
            self.slowmo_active,
            leader / track,
            self.settings.finish_zone_progress,
        )
    }

    fn note_position_snap(&mut self, now_ms: f64) {
        self.diagnostics.position_snaps += 1;
        self.snap_times.push_back(now_ms);
        while self
            .snap_times
            .front()
            .is_some_and(|&t| now_ms - t > self.settings.desync_window_ms)
        {
            self.snap_times.pop_front();
        }
        if self.snap_times.len() > self.settings.desync_snap_limit {
            self.diagnostics.desync_warnings += 1;
            log::warn!(
                "Desync: {} hard snaps within {:.0} ms",
                self.snap_times.len(),
                self.settings.desync_window_ms
            );
            self.snap_times.clear();
        }
    }

    fn render_entities(&mut self, now_ms: f64, phase: RacePhase) {
        let profile = self.settings.profiles.select(phase);
        let render_ms = self.clock.rendered_ms();
        let epsilon = self.settings.hermite_epsilon_m;
        let ids: Vec<String> = self.log.player_ids().cloned().collect();

        for id in ids {
            let Some(sample) = self.log.sample(&id, render_ms, epsilon) else {
                continue;
            };
            if !sample.position.is_finite() {
                self.record_violation(InvariantViolation::NonFinitePosition {
                    player: id,
                    value: sample.position,
                });
                continue;
            }

            if !self.rendered.contains_key(&id) {
                self.rendered.insert(
                    id.clone(),
                    RenderedEntity {
                        id,
                        position: sample.position.max(0.0),
                        speed: sample.speed,
                        stamina: sample.stamina,
                        finished: sample.finished,
                    },
                );
                continue;
            }
            let Some(entity) = self.rendered.get_mut(&id) else {
                continue;
            };

            let (next, correction) = profile.correct(entity.position, sample.position);
            entity.position = next.max(entity.position);
            entity.speed = sample.speed;
            entity.stamina = sample.stamina;
            entity.finished |= sample.finished;

            match correction {
                Correction::Snap => self.note_position_snap(now_ms),
                Correction::Hold if entity.position - sample.position > profile.snap_distance_m => {
                    let delta = entity.position - sample.position;
                    self.record_violation(InvariantViolation::NegativePositionDelta {
                        player: id,
                        delta,
                    });
                }
                _ => {}
            }
        }
    }

    fn consume_events(&mut self) -> Vec<Event> {
        let horizon = self.clock.rendered_ms() + self.settings.event_tolerance_ms;
        let due: Vec<Event> = self
            .log
            .events_until(horizon)
            .into_iter()
            .filter(|e| !self.consumed.contains(&e.id))
            .cloned()
            .collect();

        for event in &due {
            self.consumed.insert(event.id);
            match &event.kind {
                EventKind::Finish { player_id, rank } => {
                    self.finish_events_consumed += 1;
                    log::debug!("{} finished #{} at {} ms", player_id, rank, event.elapsed_ms);
                }
                EventKind::SlowmoTrigger => {
                    if !self.slowmo_active {
                        log::info!("Slow motion at {} ms", event.elapsed_ms);
                    }
                    self.slowmo_active = true;
                }
                _ => {}
            }
        }
        due
    }

    /// Completion arbitration; true when the race completes this frame
    fn check_completion(&mut self, now_ms: f64) -> bool {
        if self.rendered.is_empty() || self.finish_events_consumed == 0 {
            return false;
        }
        if !self.rendered.values().all(|e| e.finished) {
            self.completion_pending_since = None;
            return false;
        }

        let line = self.track_length() - self.settings.finish_epsilon_m;
        if self.rendered.values().all(|e| e.position >= line) {
            return true;
        }

        let since = *self.completion_pending_since.get_or_insert(now_ms);
        if now_ms - since < self.settings.completion_fallback_ms {
            return false;
        }

        log::warn!(
            "Forcing completion after {:.0} ms waiting for runners to reach the line",
            now_ms - since
        );
        self.diagnostics.forced_completion = true;
        for entity in self.rendered.values_mut() {
            if let Some(latest) = self.log.latest_position(&entity.id) {
                entity.position = entity.position.max(latest);
            }
        }
        true
    }

    /// Advance one render frame at local time `now_ms`
    pub fn frame(&mut self, now_ms: f64) -> Frame {
        let now_ms = if now_ms.is_finite() {
            now_ms
        } else {
            self.record_violation(InvariantViolation::NonFiniteDelta(now_ms));
            self.last_frame_ms.unwrap_or(self.created_at_ms)
        };
        let dt = self.frame_delta(now_ms);
        self.advance_state(now_ms);

        let mut events = Vec::new();
        let mut completed_now = false;
        let phase = self.phase();

        if self.state == RaceState::Running {
            match self.clock_target(now_ms) {
                Some(target) if target.is_finite() => {
                    let profile = self.settings.profiles.select(phase);
                    let correction = self.clock.advance(
                        dt,
                        target,
                        self.settings.clock_alpha,
                        self.settings.clock_hard_snap_ms,
                        &profile,
                    );
                    if correction == ClockCorrection::Snap {
                        self.diagnostics.clock_snaps += 1;
                        log::debug!("Render clock snapped to {:.0} ms", target);
                    }
                }
                Some(target) => {
                    self.record_violation(InvariantViolation::NonFiniteTarget(target));
                }
                None => {}
            }

            self.render_entities(now_ms, phase);
            events = self.consume_events();

            if self.check_completion(now_ms) {
                self.state = RaceState::Completed;
                completed_now = true;
                log::info!(
                    "Race complete at {:.0} ms render time",
                    self.clock.rendered_ms()
                );
            }
        }

        Frame {
            elapsed_ms: self.clock.rendered_ms(),
            state: self.state,
            phase,
            entities: self.rendered.values().cloned().collect(),
            events,
            completed_now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SimSettings;
    use crate::sim::{BuildRequest, Keyframe, RaceEntry, RaceScript, Stats, build_script};
    use crate::sync::interpolate::hermite;
    use crate::sync::server::SnapshotServer;
    use crate::sync::transport::{LinkProfile, SimulatedLink};

    const FRAME_MS: f64 = 16.0;

    fn round() -> RoundKey {
        RoundKey::new("engine", 1)
    }

    fn script() -> RaceScript {
        let entries = [
            ("a", 22.0, 18.0),
            ("b", 18.0, 25.0),
            ("c", 26.0, 12.0),
            ("d", 15.0, 30.0),
        ]
        .iter()
        .map(|&(id, speed, stamina)| RaceEntry {
            player_id: id.to_string(),
            stats: Stats {
                speed,
                stamina,
                power: 20.0,
                guts: 20.0,
                start: 20.0,
                luck: 20.0,
            },
            augments: Vec::new(),
            condition_roll: None,
        })
        .collect();
        build_script(&BuildRequest {
            round: round(),
            entries,
            settings: SimSettings::default(),
        })
        .unwrap()
    }

    /// Instant link: response reflects server state at `now_ms`
    fn poll_now(engine: &mut ReconciliationEngine, server: &SnapshotServer, now_ms: f64) {
        if let Some(req) = engine.poll_request(now_ms) {
            let resp = server.respond(now_ms as i64, &req);
            engine.receive(now_ms, Ok(resp));
        }
    }

    fn constant_keyframe(elapsed_ms: u64, position: f64) -> Keyframe {
        let mut kf = Keyframe {
            elapsed_ms,
            ..Default::default()
        };
        kf.positions.insert("a".into(), position);
        kf.speeds.insert("a".into(), 0.0);
        kf.stamina.insert("a".into(), 80.0);
        kf.finished.insert("a".into(), false);
        kf
    }

    fn running_response(race_time_ms: i64, keyframes: Vec<Keyframe>) -> PollResponse {
        PollResponse {
            has_race_state: true,
            status: RaceStatus::Running,
            elapsed_ms: race_time_ms,
            authoritative_now_ms: race_time_ms,
            started_at_millis: Some(0),
            keyframes_since: keyframes,
            track_length_m: Some(155.0),
            round: Some(round()),
            ..Default::default()
        }
    }

    /// Engine past bootstrap with the given response ingested
    fn running_engine(response: PollResponse) -> ReconciliationEngine {
        let mut engine = ReconciliationEngine::new(round(), SyncSettings::default(), 0.0);
        engine.poll_request(0.0);
        engine.receive(0.0, Ok(response));
        engine.frame(0.0);
        engine.frame(SyncSettings::default().bootstrap_min_ms);
        engine.frame(SyncSettings::default().bootstrap_min_ms);
        assert_eq!(engine.state(), RaceState::Running);
        engine
    }

    #[test]
    fn test_single_request_in_flight() {
        let mut engine = ReconciliationEngine::new(round(), SyncSettings::default(), 0.0);
        assert!(engine.poll_request(0.0).is_some());
        assert!(engine.poll_request(500.0).is_none());
        engine.receive(520.0, Err(PollError::Timeout(500)));
        assert_eq!(engine.diagnostics().polls_failed, 1);
        assert!(engine.poll_request(520.0).is_some());
        // Interval respected after the retry
        engine.receive(530.0, Err(PollError::Network("reset".into())));
        assert!(engine.poll_request(600.0).is_none());
        assert!(engine.poll_request(670.0).is_some());
    }

    #[test]
    fn test_bootstrap_waits_for_data_and_min_duration() {
        let script = script();
        let server = SnapshotServer::new(&script, round(), 0);
        let mut engine = ReconciliationEngine::new(round(), SyncSettings::default(), 1000.0);

        poll_now(&mut engine, &server, 1000.0);
        assert_eq!(engine.frame(1000.0).state, RaceState::Bootstrapping);
        assert_eq!(engine.frame(1200.0).state, RaceState::Bootstrapping);
        let frame = engine.frame(1300.0);
        assert_ne!(frame.state, RaceState::Bootstrapping);
        assert!(!engine.diagnostics().degraded_bootstrap);
    }

    #[test]
    fn test_bootstrap_timeout_degrades() {
        let mut engine = ReconciliationEngine::new(round(), SyncSettings::default(), 0.0);
        assert_eq!(engine.frame(2999.0).state, RaceState::Bootstrapping);
        assert_eq!(engine.frame(3000.0).state, RaceState::Prepared);
        assert!(engine.diagnostics().degraded_bootstrap);
    }

    #[test]
    fn test_prepared_until_start() {
        let script = script();
        let server = SnapshotServer::new(&script, round(), 5000);
        let mut engine = ReconciliationEngine::new(round(), SyncSettings::default(), 0.0);
        poll_now(&mut engine, &server, 0.0);
        engine.frame(0.0);
        assert_eq!(engine.frame(400.0).state, RaceState::Prepared);
        assert_eq!(engine.rendered_elapsed_ms(), 0.0);
    }

    #[test]
    fn test_other_round_discarded() {
        let mut engine = ReconciliationEngine::new(round(), SyncSettings::default(), 0.0);
        let mut response = running_response(1000, vec![constant_keyframe(1000, 5.0)]);
        response.round = Some(RoundKey::new("engine", 2));
        engine.poll_request(0.0);
        engine.receive(0.0, Ok(response));
        assert_eq!(engine.diagnostics().responses_discarded, 1);
        assert_eq!(engine.log().keyframe_count(), 0);
    }

    #[test]
    fn test_clock_hard_snap_reaches_target() {
        let kfs = (0..=100).map(|i| constant_keyframe(i * 100, 10.0)).collect();
        let mut engine = running_engine(running_response(1000, kfs));
        let before = engine.rendered_elapsed_ms();

        // Authoritative time jumps 4 s ahead of what the client expected
        engine.poll_request(400.0);
        engine.receive(400.0, Ok(running_response(5400, Vec::new())));
        let frame = engine.frame(400.0);
        assert!(frame.elapsed_ms >= 5400.0 - 90.0);
        assert!(frame.elapsed_ms > before);
        assert_eq!(engine.diagnostics().clock_snaps, 1);
    }

    #[test]
    fn test_position_hard_snap_within_one_frame() {
        // Runner stands still at 10 m, then the script has it at 60 m
        let mut kfs: Vec<Keyframe> = (0..=20).map(|i| constant_keyframe(i * 100, 10.0)).collect();
        kfs.extend((21..=60).map(|i| constant_keyframe(i * 100, 60.0)));
        let mut engine = running_engine(running_response(1000, kfs));
        let frame = engine.frame(316.0);
        assert!((frame.entities[0].position - 10.0).abs() < 1e-9);

        // Jump the clock past the step so the estimate is 60 m
        engine.poll_request(400.0);
        engine.receive(400.0, Ok(running_response(3000, Vec::new())));
        let frame = engine.frame(400.0);
        assert!(frame.elapsed_ms > 2100.0);
        assert!(frame.entities[0].position >= 60.0);
        assert_eq!(engine.diagnostics().position_snaps, 1);
    }

    #[test]
    fn test_soft_blend_fraction() {
        // 10 m to 11 m between 1100 and 1200 ms, far below the snap distance
        let mut kfs: Vec<Keyframe> = (0..=11).map(|i| constant_keyframe(i * 100, 10.0)).collect();
        kfs.extend((12..=30).map(|i| constant_keyframe(i * 100, 11.0)));
        // Render clock starts at 840 - 90 + 300 = 1050 ms
        let mut engine = running_engine(running_response(840, kfs));
        let mut now = SyncSettings::default().bootstrap_min_ms;
        let blend = SyncSettings::default().profiles.normal.blend_fraction;

        let mut previous = engine.frame(now).entities[0].position;
        let mut checked = false;
        for _ in 0..20 {
            now += FRAME_MS;
            let frame = engine.frame(now);
            let r = frame.elapsed_ms;
            let position = frame.entities[0].position;
            if r > 1100.0 && r < 1200.0 {
                let u = (r - 1100.0) / 100.0;
                let authoritative = hermite(10.0, 11.0, 0.0, 0.0, u, 0.1);
                let expected = previous + (authoritative - previous) * blend;
                assert!((position - expected).abs() < 1e-9);
                checked = true;
            }
            previous = position;
        }
        assert!(checked, "render clock never entered the blend span");
    }

    #[test]
    fn test_events_consumed_once_despite_redelivery() {
        let script = script();
        let server = SnapshotServer::new(&script, round(), 0);
        let mut engine = ReconciliationEngine::new(round(), SyncSettings::default(), 0.0);
        let mut seen: HashSet<u64> = HashSet::new();
        let mut now = 0.0;
        while engine.state() != RaceState::Completed && now < 60_000.0 {
            // Poll far more often than the interval and always resend the full window
            if let Some(mut req) = engine.poll_request(now) {
                req.since_ms = None;
                let resp = server.respond(now as i64, &req);
                engine.receive(now, Ok(resp));
            }
            let frame = engine.frame(now);
            for event in frame.events {
                assert!(seen.insert(event.id), "event {} consumed twice", event.id);
            }
            now += FRAME_MS;
        }
        assert_eq!(engine.state(), RaceState::Completed);
        assert_eq!(seen.len(), script.events.len());
    }

    #[test]
    fn test_event_waits_for_render_clock() {
        let kfs = (0..=30).map(|i| constant_keyframe(i * 100, 10.0)).collect();
        let mut response = running_response(1000 + 90, kfs);
        response.events_window = vec![Event {
            id: 1,
            elapsed_ms: 1500,
            kind: EventKind::LastSpurt {
                player_id: "a".into(),
            },
        }];
        let mut engine = running_engine(response);
        let mut now = SyncSettings::default().bootstrap_min_ms;
        loop {
            now += FRAME_MS;
            let frame = engine.frame(now);
            if !frame.events.is_empty() {
                assert!(frame.elapsed_ms + 24.0 >= 1500.0);
                break;
            }
            assert!(frame.elapsed_ms + 24.0 < 1500.0);
            assert!(now < 5000.0, "event never fired");
        }
        assert!(engine.is_consumed(1));
    }

    #[test]
    fn test_no_completion_without_finish_event() {
        // Everyone authoritative-finished at the line, but no finish event delivered
        let mut kfs = Vec::new();
        for i in 0..=10 {
            let mut kf = constant_keyframe(i * 100, 156.0);
            kf.finished.insert("a".into(), true);
            kfs.push(kf);
        }
        let mut engine = running_engine(running_response(1000, kfs));
        let mut now = SyncSettings::default().bootstrap_min_ms;
        for _ in 0..200 {
            now += FRAME_MS;
            assert_ne!(engine.frame(now).state, RaceState::Completed);
        }
    }

    #[test]
    fn test_completion_fallback_forces_arrival() {
        let settings = SyncSettings::default();
        // Script says finished, but the runner's keyframes never reach the line
        let mut kfs = Vec::new();
        for i in 0..=10 {
            let mut kf = constant_keyframe(i * 100, 150.0);
            kf.finished.insert("a".into(), true);
            kfs.push(kf);
        }
        let mut response = running_response(1000, kfs);
        response.events_window = vec![Event {
            id: 1,
            elapsed_ms: 0,
            kind: EventKind::Finish {
                player_id: "a".into(),
                rank: 1,
            },
        }];
        // Finish event is consumed on the first running frame, which starts the wait
        let mut engine = running_engine(response);
        let pending_since = settings.bootstrap_min_ms;
        let mut now = pending_since;
        loop {
            now += FRAME_MS;
            let frame = engine.frame(now);
            if frame.completed_now {
                let waited = now - pending_since;
                assert!(waited >= settings.completion_fallback_ms);
                assert!(waited < settings.completion_fallback_ms + 2.0 * FRAME_MS);
                break;
            }
            assert!(now < 10_000.0, "never completed");
        }
        assert!(engine.diagnostics().forced_completion);
        assert!(engine.poll_request(now + 1000.0).is_none());
    }

    #[test]
    fn test_full_race_completes_with_final_positions() {
        let script = script();
        let server = SnapshotServer::new(&script, round(), 0);
        let mut engine = ReconciliationEngine::new(round(), SyncSettings::default(), 0.0);
        let mut now = 0.0;
        let mut completions = 0;
        while now < script.meta.duration_ms as f64 + 5000.0 {
            poll_now(&mut engine, &server, now);
            let frame = engine.frame(now);
            if frame.completed_now {
                completions += 1;
            }
            now += FRAME_MS;
        }
        assert_eq!(completions, 1);
        assert_eq!(engine.state(), RaceState::Completed);
        assert!(!engine.diagnostics().forced_completion);
        let track = script.meta.track_length_m;
        let frame = engine.frame(now);
        assert_eq!(frame.entities.len(), 4);
        for entity in &frame.entities {
            assert!(entity.finished);
            assert!(entity.position >= track - SyncSettings::default().finish_epsilon_m);
        }
    }

    #[test]
    fn test_negative_delta_clamped() {
        let kfs = (0..=30).map(|i| constant_keyframe(i * 100, 10.0)).collect();
        let mut engine = running_engine(running_response(1000, kfs));
        let before = engine.rendered_elapsed_ms();
        let frame = engine.frame(100.0);
        assert!(frame.elapsed_ms >= before);
        assert_eq!(engine.diagnostics().invariant_violations, 1);
        let frame = engine.frame(f64::NAN);
        assert!(frame.elapsed_ms >= before);
        assert_eq!(engine.diagnostics().invariant_violations, 2);
    }

    #[test]
    fn test_repeated_snaps_raise_one_desync_warning() {
        // 6 m between keyframes, over the 4 m snap distance at every frame
        let kfs = (0..=40).map(|i| constant_keyframe(i * 100, i as f64 * 6.0)).collect();
        // Render clock tracks local time exactly: 90 - 90 + now
        let mut engine = running_engine(running_response(90, kfs));
        let settings = SyncSettings::default();
        let limit = settings.desync_snap_limit as u64;

        let mut now = settings.bootstrap_min_ms;
        for _ in 0..limit {
            now += 100.0;
            let frame = engine.frame(now);
            assert_eq!(frame.phase, RacePhase::Normal);
        }
        assert_eq!(engine.diagnostics().position_snaps, limit);
        assert_eq!(engine.diagnostics().desync_warnings, 0);

        now += 100.0;
        let frame = engine.frame(now);
        assert!((frame.entities[0].position - now / 100.0 * 6.0).abs() < 1e-9);
        assert_eq!(engine.diagnostics().position_snaps, limit + 1);
        assert_eq!(engine.diagnostics().desync_warnings, 1);
    }

    #[test]
    fn test_snaps_spread_out_do_not_warn() {
        let kfs = (0..=300).map(|i| constant_keyframe(i * 100, i as f64 * 0.5)).collect();
        let mut engine = running_engine(running_response(90, kfs));
        let settings = SyncSettings::default();
        // One 5 m jump per second, never more than the limit inside the window
        let mut now = settings.bootstrap_min_ms;
        for _ in 0..20 {
            now += 1000.0;
            engine.frame(now);
        }
        assert_eq!(engine.diagnostics().position_snaps, 20);
        assert_eq!(engine.diagnostics().desync_warnings, 0);
    }

    #[test]
    fn test_non_finite_position_is_skipped() {
        let mut kfs: Vec<Keyframe> = (0..=30).map(|i| constant_keyframe(i * 100, 10.0)).collect();
        kfs[14].positions.insert("a".into(), f64::NAN);
        kfs[15].positions.insert("a".into(), f64::NAN);
        let mut engine = running_engine(running_response(90, kfs));
        let before = engine.diagnostics().invariant_violations;

        // One corrupt endpoint, then both
        for (now, violations) in [(1350.0, 1), (1450.0, 2)] {
            let frame = engine.frame(now);
            assert_eq!(frame.entities.len(), 1);
            assert_eq!(frame.entities[0].position, 10.0);
            assert_eq!(engine.diagnostics().invariant_violations, before + violations);
        }

        let frame = engine.frame(1650.0);
        assert_eq!(frame.entities[0].position, 10.0);
        assert_eq!(engine.diagnostics().invariant_violations, before + 2);
    }

    #[test]
    fn test_late_reply_after_timeout_keeps_clock() {
        let kfs = (0..=100).map(|i| constant_keyframe(i * 100, 10.0)).collect();
        let mut engine = running_engine(running_response(90, kfs));

        engine.poll_request(400.0);
        engine.receive(400.0, Ok(running_response(4_000, Vec::new())));
        let ahead = engine.frame(400.0).elapsed_ms;
        assert!(ahead >= 4_000.0 - 90.0);

        // Stale reply from an older poll carries an earlier server clock
        assert!(engine.poll_request(560.0).is_some());
        engine.receive(560.0, Ok(running_response(1_000, Vec::new())));
        let frame = engine.frame(576.0);
        assert!(frame.elapsed_ms >= ahead + 176.0 - 1e-9);
        assert_eq!(engine.diagnostics().clock_snaps, 1);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            #[test]
            fn prop_monotonic_under_jitter(
                seed in 0u64..10_000,
                rtt in 20.0f64..400.0,
                jitter in 0.0f64..150.0,
                loss in 0.0f64..0.3,
                frame_ms in 8.0f64..40.0,
            ) {
                let script = script();
                let server = SnapshotServer::new(&script, round(), 0);
                let profile = LinkProfile {
                    rtt_ms: rtt,
                    jitter_ms: jitter,
                    loss,
                    ..Default::default()
                };
                let mut link = SimulatedLink::new(server, profile, seed);
                let mut engine = ReconciliationEngine::new(round(), SyncSettings::default(), 0.0);

                let mut last_elapsed = 0.0;
                let mut last_positions: BTreeMap<String, f64> = BTreeMap::new();
                let mut consumed = HashSet::new();
                let mut now = 0.0;
                let end = script.meta.duration_ms as f64 + 8000.0;
                while now < end {
                    if let Some(req) = engine.poll_request(now) {
                        link.send(now, &req);
                    }
                    while let Some(result) = link.recv(now) {
                        engine.receive(now, result);
                    }
                    let frame = engine.frame(now);
                    prop_assert!(frame.elapsed_ms >= last_elapsed);
                    last_elapsed = frame.elapsed_ms;
                    for entity in &frame.entities {
                        let prev = last_positions.insert(entity.id.clone(), entity.position);
                        prop_assert!(prev.is_none_or(|p| entity.position >= p));
                    }
                    for event in &frame.events {
                        prop_assert!(consumed.insert(event.id));
                    }
                    now += frame_ms;
                }
                prop_assert_eq!(engine.state(), RaceState::Completed);
            }
        }
    }
}
