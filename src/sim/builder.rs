//! Deterministic script builder
//!
//! Runs every runner through a closed fixed-step loop and samples a compact
//! script of keyframes, events and final rankings. Identical inputs always
//! produce an identical script and content hash.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::consts::SLOWMO_TRIGGER_RATIO;
use crate::error::BuildError;
use crate::settings::SimSettings;

use super::condition::{RoundKey, condition_roll};
use super::hash::content_hash;
use super::rank::RankChange;
use super::script::{Event, EventKind, Keyframe, RaceScript, Ranking, ScriptMeta};
use super::state::EntitySimState;
use super::stats::{Abilities, Augment, RunnerProfile, StatType, Stats};

/// One runner's inputs for a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceEntry {
    pub player_id: String,
    pub stats: Stats,
    #[serde(default)]
    pub augments: Vec<Augment>,
    /// Explicit roll; seeded from the round when absent
    #[serde(default)]
    pub condition_roll: Option<f64>,
}

/// Everything a build needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub round: RoundKey,
    pub entries: Vec<RaceEntry>,
    #[serde(default)]
    pub settings: SimSettings,
}

/// Resolved inputs as they enter the content hash
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashedEntry<'a> {
    player_id: &'a str,
    stats: &'a Stats,
    augments: &'a [Augment],
    condition_roll: f64,
}

#[derive(Serialize)]
struct HashedInputs<'a> {
    round: &'a RoundKey,
    settings: &'a SimSettings,
    entries: Vec<HashedEntry<'a>>,
}

struct Runner {
    profile: RunnerProfile,
    state: EntitySimState,
}

/// Outcome of one runner when the loop stops
#[derive(Debug, Clone, PartialEq)]
pub struct FinalResult {
    pub player_id: String,
    pub finish_time: Option<f64>,
    pub position: f64,
}

/// Order entries by player id and reject malformed rosters
fn sorted_entries(entries: &[RaceEntry]) -> Result<Vec<&RaceEntry>, BuildError> {
    if entries.is_empty() {
        return Err(BuildError::EmptyRoster);
    }
    let mut sorted: Vec<&RaceEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.player_id.cmp(&b.player_id));

    let mut seen = HashSet::new();
    for entry in &sorted {
        if entry.player_id.is_empty() {
            return Err(BuildError::EmptyPlayerId);
        }
        if !seen.insert(entry.player_id.as_str()) {
            return Err(BuildError::DuplicatePlayer(entry.player_id.clone()));
        }
    }
    Ok(sorted)
}

/// Condition roll for an entry: explicit override or seeded from luck
fn resolve_roll(round: &RoundKey, entry: &RaceEntry) -> Result<f64, BuildError> {
    match entry.condition_roll {
        Some(roll) if roll.is_finite() && roll > -1.0 => Ok(roll),
        Some(roll) => Err(BuildError::InvalidConditionRoll {
            player: entry.player_id.clone(),
            value: roll,
        }),
        None => {
            // The band is derived from Luck, so it must be sane before rolling
            entry.stats.validate(&entry.player_id)?;
            Abilities::from_augments(&entry.player_id, &entry.augments)?;
            let luck = entry.stats.with_augments(&entry.augments).get(StatType::Luck);
            Ok(condition_roll(round, &entry.player_id, luck))
        }
    }
}

/// Indices of `runners` ordered by position (desc), ties by id (asc)
fn ranking_order(runners: &[Runner]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..runners.len()).collect();
    order.sort_by(|&a, &b| {
        runners[b]
            .state
            .position
            .total_cmp(&runners[a].state.position)
            .then_with(|| runners[a].profile.id.cmp(&runners[b].profile.id))
    });
    order
}

/// Sample a keyframe; speeds are observed over the span since `prev`
fn sample_keyframe(elapsed_ms: u64, runners: &[Runner], prev: Option<&Keyframe>) -> Keyframe {
    let mut kf = Keyframe {
        elapsed_ms,
        ..Default::default()
    };
    for runner in runners {
        let id = &runner.profile.id;
        let position = runner.state.position;
        let speed = match prev {
            Some(prev) if elapsed_ms > prev.elapsed_ms => {
                let span = (elapsed_ms - prev.elapsed_ms) as f64 / 1000.0;
                let before = prev.position(id).unwrap_or(0.0);
                (position - before) / span
            }
            _ => 0.0,
        };
        kf.positions.insert(id.clone(), position);
        kf.speeds.insert(id.clone(), speed);
        kf.stamina.insert(id.clone(), runner.state.stamina);
        kf.finished.insert(id.clone(), runner.state.finished);
    }
    kf
}

/// Final placings: finish time asc, then position desc, then id asc
pub fn finalize_rankings(results: &[FinalResult], max_sim_ms: u64) -> Vec<Ranking> {
    let mut sorted: Vec<&FinalResult> = results.iter().collect();
    sorted.sort_by(|a, b| {
        let by_time = match (a.finish_time, b.finish_time) {
            (Some(ta), Some(tb)) => ta.total_cmp(&tb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.position.total_cmp(&a.position),
        };
        by_time.then_with(|| a.player_id.cmp(&b.player_id))
    });

    let cap_secs = max_sim_ms as f64 / 1000.0;
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, r)| Ranking {
            player_id: r.player_id.clone(),
            rank: i as u32 + 1,
            time: r.finish_time.unwrap_or(cap_secs),
            finished: r.finish_time.is_some(),
        })
        .collect()
}

/// Finish time in whole milliseconds
pub fn finish_ms(time_secs: f64) -> u64 {
    (time_secs * 1000.0).round().max(0.0) as u64
}

/// Slow-motion start for a winner finishing at `winner_secs`
pub fn slowmo_trigger_ms(winner_secs: f64) -> u64 {
    (finish_ms(winner_secs) as f64 * SLOWMO_TRIGGER_RATIO).round() as u64
}

/// Build the authoritative script for one round
pub fn build_script(request: &BuildRequest) -> Result<RaceScript, BuildError> {
    let settings = &request.settings;
    settings.validate()?;

    let entries = sorted_entries(&request.entries)?;
    let mut runners = Vec::with_capacity(entries.len());
    let mut hashed = Vec::with_capacity(entries.len());
    for entry in &entries {
        let roll = resolve_roll(&request.round, entry)?;
        let profile = RunnerProfile::resolve(&entry.player_id, &entry.stats, &entry.augments, roll)?;
        log::debug!(
            "{}: roll {:+.4}, max speed {:.3} m/s, start delay {:.3} s",
            entry.player_id,
            roll,
            profile.params.max_speed,
            profile.params.start_delay
        );
        runners.push(Runner {
            profile,
            state: EntitySimState::new(),
        });
        hashed.push(HashedEntry {
            player_id: &entry.player_id,
            stats: &entry.stats,
            augments: &entry.augments,
            condition_roll: roll,
        });
    }
    let hash = content_hash(&HashedInputs {
        round: &request.round,
        settings,
        entries: hashed,
    })?;

    let track = settings.track_length_m;
    let dt = settings.step_secs();
    let ticks_per_frame = settings.frame_ms / settings.step_ms;

    let mut keyframes = vec![sample_keyframe(0, &runners, None)];
    let mut timeline: Vec<(u64, EventKind)> = Vec::new();
    let mut tick: u64 = 0;

    while !runners.iter().all(|r| r.state.finished) && tick * settings.step_ms < settings.max_sim_ms {
        let now_ms = tick * settings.step_ms;

        // Ranking snapshot from the previous tick's positions
        for (place, idx) in ranking_order(&runners).into_iter().enumerate() {
            let runner = &mut runners[idx];
            let was_finished = runner.state.finished;
            let (next, change) = runner.state.update_rank(&runner.profile, place as u32 + 1);
            runner.state = next;
            if let RankChange::Improved { from, to } = change {
                if !was_finished {
                    timeline.push((
                        now_ms,
                        EventKind::Overtake {
                            player_id: runner.profile.id.clone(),
                            from_rank: from,
                            to_rank: to,
                        },
                    ));
                }
            }
        }

        tick += 1;
        let t_ms = tick * settings.step_ms;
        let t = t_ms as f64 / 1000.0;

        for runner in runners.iter_mut().filter(|r| !r.state.finished) {
            let next = runner.state.step(&runner.profile, track, dt, t);
            if next.last_spurt_active && !runner.state.last_spurt_active {
                timeline.push((
                    t_ms,
                    EventKind::LastSpurt {
                        player_id: runner.profile.id.clone(),
                    },
                ));
            }
            if next.finished && !runner.state.finished {
                log::debug!(
                    "{} finished at {:.3}s",
                    runner.profile.id,
                    next.finish_time.unwrap_or(t)
                );
            }
            runner.state = next;
        }

        if tick % ticks_per_frame == 0 {
            let kf = sample_keyframe(t_ms, &runners, keyframes.last());
            keyframes.push(kf);
        }
    }

    let end_ms = tick * settings.step_ms;
    if keyframes.last().map(|kf| kf.elapsed_ms) != Some(end_ms) {
        let kf = sample_keyframe(end_ms, &runners, keyframes.last());
        keyframes.push(kf);
    }

    let results: Vec<FinalResult> = runners
        .iter()
        .map(|r| FinalResult {
            player_id: r.profile.id.clone(),
            finish_time: r.state.finish_time,
            position: r.state.position,
        })
        .collect();
    let rankings = finalize_rankings(&results, settings.max_sim_ms);

    for ranking in rankings.iter().filter(|r| r.finished) {
        timeline.push((
            finish_ms(ranking.time),
            EventKind::Finish {
                player_id: ranking.player_id.clone(),
                rank: ranking.rank,
            },
        ));
    }

    let slowmo = rankings
        .first()
        .filter(|winner| winner.finished)
        .map(|winner| slowmo_trigger_ms(winner.time));
    if let Some(ms) = slowmo {
        timeline.push((ms, EventKind::SlowmoTrigger));
    } else {
        log::warn!(
            "No runner finished within {} ms in {}#{}",
            settings.max_sim_ms,
            request.round.room_id,
            request.round.round
        );
    }

    timeline.sort_by_key(|(elapsed_ms, _)| *elapsed_ms);
    let events: Vec<Event> = timeline
        .into_iter()
        .enumerate()
        .map(|(i, (elapsed_ms, kind))| Event {
            id: i as u64 + 1,
            elapsed_ms,
            kind,
        })
        .collect();

    let duration_ms = keyframes.last().map_or(0, |kf| kf.elapsed_ms);
    log::info!(
        "Built script {}#{}: {} runners, {} keyframes, {} events, {} ms, winner {}",
        request.round.room_id,
        request.round.round,
        runners.len(),
        keyframes.len(),
        events.len(),
        duration_ms,
        rankings.first().map_or("-", |r| r.player_id.as_str())
    );

    Ok(RaceScript {
        keyframes,
        events,
        rankings,
        meta: ScriptMeta {
            track_length_m: track,
            step_ms: settings.step_ms,
            frame_ms: settings.frame_ms,
            max_sim_ms: settings.max_sim_ms,
            slowmo_trigger_ms: slowmo,
            duration_ms,
            content_hash: hash,
        },
    })
}
