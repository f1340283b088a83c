//! Stat derivation
//!
//! Maps raw attributes, augments and the condition roll onto the physical
//! parameters a runner uses for the whole round.

use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::BuildError;
use crate::kmh_to_ms;

/// The six raw attributes of a runner
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub speed: f64,
    pub stamina: f64,
    pub power: f64,
    pub guts: f64,
    pub start: f64,
    pub luck: f64,
}

/// Attribute selector for stat augments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatType {
    Speed,
    Stamina,
    Power,
    Guts,
    Start,
    Luck,
}

impl StatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatType::Speed => "speed",
            StatType::Stamina => "stamina",
            StatType::Power => "power",
            StatType::Guts => "guts",
            StatType::Start => "start",
            StatType::Luck => "luck",
        }
    }
}

/// Behavioral abilities granted by augments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpecialAbility {
    LastSpurt,
    Overtake,
    EscapeCrisis,
}

/// A modifier applied once before the race
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Augment {
    #[serde(rename_all = "camelCase")]
    Stat { stat_type: StatType, stat_value: f64 },
    #[serde(rename_all = "camelCase")]
    Ability {
        ability: SpecialAbility,
        ability_value: f64,
    },
}

impl Stats {
    pub fn get(&self, stat: StatType) -> f64 {
        match stat {
            StatType::Speed => self.speed,
            StatType::Stamina => self.stamina,
            StatType::Power => self.power,
            StatType::Guts => self.guts,
            StatType::Start => self.start,
            StatType::Luck => self.luck,
        }
    }

    fn get_mut(&mut self, stat: StatType) -> &mut f64 {
        match stat {
            StatType::Speed => &mut self.speed,
            StatType::Stamina => &mut self.stamina,
            StatType::Power => &mut self.power,
            StatType::Guts => &mut self.guts,
            StatType::Start => &mut self.start,
            StatType::Luck => &mut self.luck,
        }
    }

    /// Check every stat is finite and non-negative
    pub fn validate(&self, player: &str) -> Result<(), BuildError> {
        const ALL: [StatType; 6] = [
            StatType::Speed,
            StatType::Stamina,
            StatType::Power,
            StatType::Guts,
            StatType::Start,
            StatType::Luck,
        ];
        for stat in ALL {
            let value = self.get(stat);
            if !value.is_finite() || value < 0.0 {
                return Err(BuildError::InvalidStat {
                    player: player.to_string(),
                    stat: stat.as_str(),
                    value,
                });
            }
        }
        Ok(())
    }

    /// Base stats plus every stat augment (ability augments are ignored)
    pub fn with_augments(&self, augments: &[Augment]) -> Stats {
        let mut out = *self;
        for augment in augments {
            if let Augment::Stat {
                stat_type,
                stat_value,
            } = *augment
            {
                let slot = out.get_mut(stat_type);
                *slot = (*slot + stat_value).max(0.0);
            }
        }
        out
    }

    /// Every stat scaled by `1 + roll`
    pub fn scaled(&self, roll: f64) -> Stats {
        let k = 1.0 + roll;
        Stats {
            speed: self.speed * k,
            stamina: self.stamina * k,
            power: self.power * k,
            guts: self.guts * k,
            start: self.start * k,
            luck: self.luck * k,
        }
    }
}

/// Saturating diminishing-returns curve mapping a stat onto [0, 1]
pub fn normalize_stat(stat: f64) -> f64 {
    let x = (stat.min(MAX_STAT) / MAX_STAT).max(0.0);
    (1.0 - (-NORM_RATE * x).exp()) / (1.0 - (-NORM_RATE).exp())
}

/// Physical parameters of one runner, fixed for the round
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedParameters {
    /// Top speed (m/s)
    pub max_speed: f64,
    pub accel_factor: f64,
    /// Seconds to reach top speed
    pub target_accel_time: f64,
    pub stamina_cost_factor: f64,
    /// Lowest speed multiplier fatigue can impose
    pub fatigue_floor: f64,
    pub start_accel_boost: f64,
    /// Seconds after the gun before the runner moves
    pub start_delay: f64,
    pub speed_normalized: f64,
}

impl DerivedParameters {
    /// Derive parameters from effective (augmented, condition-scaled) stats
    pub fn from_stats(stats: &Stats) -> Self {
        let n_speed = normalize_stat(stats.speed);
        let n_stamina = normalize_stat(stats.stamina);
        let n_power = normalize_stat(stats.power);
        let n_guts = normalize_stat(stats.guts);
        let n_start = normalize_stat(stats.start);

        Self {
            max_speed: kmh_to_ms(58.0 + 10.0 * n_speed),
            accel_factor: 0.3 + 1.2 * n_power,
            target_accel_time: 7.0 - ((n_power + n_start) / 2.0) * 4.0,
            stamina_cost_factor: (1.0 - 0.55 * n_stamina.min(1.0)).max(0.45),
            fatigue_floor: 0.55 + 0.25 * n_guts,
            start_accel_boost: 1.0 + 0.3 * n_start,
            start_delay: 1.0 * (1.0 - n_start),
            speed_normalized: n_speed,
        }
    }
}

/// Special-ability tuning; `None` means the ability is not configured
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Abilities {
    /// Race progress (0-1) at which the last spurt latches
    pub last_spurt_trigger_progress: Option<f64>,
    pub overtake_bonus_value: Option<f64>,
    pub escape_crisis_value: Option<f64>,
}

impl Abilities {
    /// Collect ability augments; the highest value wins for repeats
    pub fn from_augments(player: &str, augments: &[Augment]) -> Result<Self, BuildError> {
        let mut last_spurt: Option<f64> = None;
        let mut overtake: Option<f64> = None;
        let mut escape: Option<f64> = None;

        for augment in augments {
            match *augment {
                Augment::Stat { stat_value, .. } => {
                    if !stat_value.is_finite() {
                        return Err(BuildError::InvalidAugment {
                            player: player.to_string(),
                            value: stat_value,
                        });
                    }
                }
                Augment::Ability {
                    ability,
                    ability_value,
                } => {
                    if !ability_value.is_finite() || ability_value < 0.0 {
                        return Err(BuildError::InvalidAugment {
                            player: player.to_string(),
                            value: ability_value,
                        });
                    }
                    let slot = match ability {
                        SpecialAbility::LastSpurt => &mut last_spurt,
                        SpecialAbility::Overtake => &mut overtake,
                        SpecialAbility::EscapeCrisis => &mut escape,
                    };
                    *slot = Some(slot.map_or(ability_value, |v| v.max(ability_value)));
                }
            }
        }

        Ok(Self {
            last_spurt_trigger_progress: last_spurt.map(|v| 1.0 - (v / 10.0) * 0.2),
            overtake_bonus_value: overtake,
            escape_crisis_value: escape,
        })
    }
}

/// Everything the physics step needs to know about a runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerProfile {
    pub id: String,
    pub params: DerivedParameters,
    pub abilities: Abilities,
}

impl RunnerProfile {
    /// Resolve a runner from base stats, augments and its condition roll
    pub fn resolve(
        id: &str,
        base: &Stats,
        augments: &[Augment],
        condition_roll: f64,
    ) -> Result<Self, BuildError> {
        base.validate(id)?;
        let abilities = Abilities::from_augments(id, augments)?;
        let effective = base.with_augments(augments).scaled(condition_roll);
        Ok(Self {
            id: id.to_string(),
            params: DerivedParameters::from_stats(&effective),
            abilities,
        })
    }
}
