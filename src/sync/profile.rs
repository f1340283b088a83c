//! Correction profiles
//!
//! One profile is selected per frame from the race phase and drives both the
//! clock drift nudge and the per-runner position correction.

use serde::{Deserialize, Serialize};

/// Race phase used to pick a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RacePhase {
    /// Ordinary mid-race
    Normal,
    /// The leader is close to the line
    FinishZone,
    /// Slow-motion celebration is running
    Slowmo,
}

impl RacePhase {
    pub fn classify(slowmo_active: bool, leader_progress: f64, finish_zone_progress: f64) -> Self {
        if slowmo_active {
            RacePhase::Slowmo
        } else if leader_progress >= finish_zone_progress {
            RacePhase::FinishZone
        } else {
            RacePhase::Normal
        }
    }
}

/// How a rendered position was moved toward its authoritative estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Error above the snap distance, jumped straight to the estimate
    Snap,
    /// Moved a fraction of the error
    Blend,
    /// Estimate was behind; position held
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationProfile {
    /// Fraction of the residual clock error removed per frame
    pub drift_gain: f64,
    /// Largest drift nudge per frame (ms)
    pub drift_clamp_ms: f64,
    /// Position error that triggers a hard snap (m)
    pub snap_distance_m: f64,
    /// Fraction of a small position error removed per frame
    pub blend_fraction: f64,
}

impl ReconciliationProfile {
    /// Clock nudge for a residual error, clamped to the profile limit
    pub fn drift_nudge(&self, residual_ms: f64) -> f64 {
        (residual_ms * self.drift_gain).clamp(-self.drift_clamp_ms, self.drift_clamp_ms)
    }

    /// Move `rendered` toward `authoritative`, never backward
    pub fn correct(&self, rendered: f64, authoritative: f64) -> (f64, Correction) {
        let error = authoritative - rendered;
        if error > self.snap_distance_m {
            (authoritative, Correction::Snap)
        } else if error >= 0.0 {
            (rendered + error * self.blend_fraction, Correction::Blend)
        } else {
            (rendered, Correction::Hold)
        }
    }
}

/// Profiles for every phase, tightened from normal to slow-motion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProfileTable {
    pub normal: ReconciliationProfile,
    pub finish_zone: ReconciliationProfile,
    pub slowmo: ReconciliationProfile,
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self {
            normal: ReconciliationProfile {
                drift_gain: 0.10,
                drift_clamp_ms: 15.0,
                snap_distance_m: 4.0,
                blend_fraction: 0.35,
            },
            finish_zone: ReconciliationProfile {
                drift_gain: 0.06,
                drift_clamp_ms: 8.0,
                snap_distance_m: 2.5,
                blend_fraction: 0.25,
            },
            slowmo: ReconciliationProfile {
                drift_gain: 0.03,
                drift_clamp_ms: 4.0,
                snap_distance_m: 1.5,
                blend_fraction: 0.15,
            },
        }
    }
}

impl ProfileTable {
    pub fn select(&self, phase: RacePhase) -> ReconciliationProfile {
        match phase {
            RacePhase::Normal => self.normal,
            RacePhase::FinishZone => self.finish_zone,
            RacePhase::Slowmo => self.slowmo,
        }
    }
}
