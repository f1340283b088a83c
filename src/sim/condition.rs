//! Condition roll
//!
//! A per-round random modifier derived from Luck. The roll is reproducible
//! from (room, round, player) alone, so it never needs to be stored.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::MAX_STAT;

/// Identifies one round of one room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundKey {
    pub room_id: String,
    pub round: u32,
}

impl RoundKey {
    pub fn new(room_id: impl Into<String>, round: u32) -> Self {
        Self {
            room_id: room_id.into(),
            round,
        }
    }
}

/// `[min, max]` roll band at a normalized-luck anchor
#[derive(Debug, Clone, Copy, PartialEq)]
struct Band {
    luck: f64,
    min: f64,
    max: f64,
}

/// Anchors at normalized luck 0, 1.0 and 1.5
const BANDS: [Band; 3] = [
    Band {
        luck: 0.0,
        min: -0.10,
        max: 0.05,
    },
    Band {
        luck: 1.0,
        min: -0.03,
        max: 0.10,
    },
    Band {
        luck: 1.5,
        min: 0.0,
        max: 0.12,
    },
];

/// Roll range for a Luck stat, linearly interpolated between anchors
pub fn roll_band(luck: f64) -> (f64, f64) {
    let l = (luck / MAX_STAT).clamp(0.0, BANDS[2].luck);
    let (a, b) = if l <= BANDS[1].luck {
        (BANDS[0], BANDS[1])
    } else {
        (BANDS[1], BANDS[2])
    };
    let t = (l - a.luck) / (b.luck - a.luck);
    (a.min + (b.min - a.min) * t, a.max + (b.max - a.max) * t)
}

/// Seed derived from the round and player identity
pub fn roll_seed(key: &RoundKey, player_id: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key.room_id.as_bytes());
    hasher.update(b"|");
    hasher.update(key.round.to_le_bytes());
    hasher.update(b"|");
    hasher.update(player_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Deterministic condition roll for one runner in one round
pub fn condition_roll(key: &RoundKey, player_id: &str, luck: f64) -> f64 {
    let (min, max) = roll_band(luck);
    let mut rng = Pcg32::seed_from_u64(roll_seed(key, player_id));
    if max <= min {
        return min;
    }
    rng.random_range(min..=max)
}
