//! Rank and bonus resolution
//!
//! Applies overtake and escape-crisis side effects from a ranking snapshot.

use crate::consts::*;

use super::state::EntitySimState;
use super::stats::RunnerProfile;

/// What a ranking snapshot changed for one runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankChange {
    /// First snapshot, rank only recorded
    Initial,
    Unchanged,
    /// Rank numerically decreased (moved up the field)
    Improved { from: u32, to: u32 },
    Dropped { from: u32, to: u32 },
}

impl EntitySimState {
    /// Record `rank` (1-based) and apply any rank-driven bonuses
    pub fn update_rank(&self, runner: &RunnerProfile, rank: u32) -> (Self, RankChange) {
        let mut next = self.clone();
        next.overtake_bonus_active = false;
        next.previous_rank = self.current_rank;
        next.current_rank = Some(rank);

        // No bonuses on the first snapshot, everyone "moves" from nothing
        let Some(previous) = self.current_rank else {
            return (next, RankChange::Initial);
        };

        let change = if rank < previous {
            RankChange::Improved {
                from: previous,
                to: rank,
            }
        } else if rank > previous {
            RankChange::Dropped {
                from: previous,
                to: rank,
            }
        } else {
            RankChange::Unchanged
        };

        if self.finished {
            return (next, change);
        }

        if let RankChange::Improved { .. } = change {
            if runner.abilities.overtake_bonus_value.is_some() {
                next.overtake_count += 1;
                next.overtake_bonus_active = true;
                next.stamina = (next.stamina + OVERTAKE_STAMINA_RECOVERY).min(MAX_STAMINA);
            }
        }

        if runner.abilities.escape_crisis_value.is_some() {
            if rank >= ESCAPE_CRISIS_RANK && !next.escape_crisis_used {
                next.escape_crisis_active = true;
                next.escape_crisis_used = true;
                log::debug!("{} escape crisis at rank {}", runner.id, rank);
            } else if rank < ESCAPE_CRISIS_RANK && next.escape_crisis_active {
                next.escape_crisis_active = false;
            }
        }

        (next, change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::stats::{Abilities, RunnerProfile, Stats};

    fn runner(abilities: Abilities) -> RunnerProfile {
        let mut profile = RunnerProfile::resolve("r", &Stats::default(), &[], 0.0).unwrap();
        profile.abilities = abilities;
        profile
    }

    fn overtaker() -> RunnerProfile {
        runner(Abilities {
            overtake_bonus_value: Some(8.0),
            ..Default::default()
        })
    }

    #[test]
    fn test_first_call_records_only() {
        let r = runner(Abilities {
            overtake_bonus_value: Some(8.0),
            escape_crisis_value: Some(5.0),
            ..Default::default()
        });
        let state = EntitySimState::new();
        let (next, change) = state.update_rank(&r, 6);
        assert_eq!(change, RankChange::Initial);
        assert_eq!(next.current_rank, Some(6));
        assert_eq!(next.previous_rank, None);
        assert_eq!(next.overtake_count, 0);
        assert!(!next.escape_crisis_active);
        assert!(!next.escape_crisis_used);
    }

    #[test]
    fn test_overtake_from_five_to_three() {
        let r = overtaker();
        let state = EntitySimState {
            stamina: 50.0,
            current_rank: Some(5),
            ..Default::default()
        };
        let (next, change) = state.update_rank(&r, 3);
        assert_eq!(change, RankChange::Improved { from: 5, to: 3 });
        assert_eq!(next.overtake_count, 1);
        assert!((next.stamina - 53.0).abs() < 1e-12);
        assert!(next.overtake_bonus_active);

        // Bonus flag lasts one tick only
        let (after, change) = next.update_rank(&r, 3);
        assert_eq!(change, RankChange::Unchanged);
        assert!(!after.overtake_bonus_active);
        assert_eq!(after.overtake_count, 1);
    }

    #[test]
    fn test_overtake_stamina_capped() {
        let r = overtaker();
        let state = EntitySimState {
            stamina: MAX_STAMINA - 1.0,
            current_rank: Some(2),
            ..Default::default()
        };
        let (next, _) = state.update_rank(&r, 1);
        assert_eq!(next.stamina, MAX_STAMINA);
    }

    #[test]
    fn test_improvement_without_ability() {
        let r = runner(Abilities::default());
        let state = EntitySimState {
            stamina: 50.0,
            current_rank: Some(4),
            ..Default::default()
        };
        let (next, change) = state.update_rank(&r, 2);
        assert_eq!(change, RankChange::Improved { from: 4, to: 2 });
        assert_eq!(next.overtake_count, 0);
        assert_eq!(next.stamina, 50.0);
    }

    #[test]
    fn test_escape_crisis_triggers_once() {
        let r = runner(Abilities {
            escape_crisis_value: Some(6.0),
            ..Default::default()
        });
        let state = EntitySimState {
            current_rank: Some(2),
            ..Default::default()
        };
        let (s, _) = state.update_rank(&r, 4);
        assert!(s.escape_crisis_active && s.escape_crisis_used);

        let (s, _) = s.update_rank(&r, 3);
        assert!(!s.escape_crisis_active);
        assert!(s.escape_crisis_used);

        let (s, _) = s.update_rank(&r, 5);
        assert!(!s.escape_crisis_active, "escape crisis must not re-trigger");
    }

    #[test]
    fn test_finished_runner_records_only() {
        let r = overtaker();
        let state = EntitySimState {
            finished: true,
            stamina: 20.0,
            current_rank: Some(3),
            ..Default::default()
        };
        let (next, change) = state.update_rank(&r, 2);
        assert_eq!(change, RankChange::Improved { from: 3, to: 2 });
        assert_eq!(next.overtake_count, 0);
        assert_eq!(next.stamina, 20.0);
        assert_eq!(next.current_rank, Some(2));
    }
}
