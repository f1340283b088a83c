//! Render clock
//!
//! Tracks the authoritative race time minus the render delay, smoothing
//! jitter away and never running backward.

use super::profile::ReconciliationProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockCorrection {
    /// First target seen, clock placed on it
    Init,
    /// Gap exceeded the hard-snap threshold
    Snap,
    Smooth,
}

#[derive(Debug, Clone, Default)]
pub struct RenderClock {
    smoothed_ms: f64,
    rendered_ms: f64,
    initialized: bool,
}

impl RenderClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic render time (ms since race start, never negative)
    pub fn rendered_ms(&self) -> f64 {
        self.rendered_ms
    }

    /// Unclamped smoothed estimate
    pub fn smoothed_ms(&self) -> f64 {
        self.smoothed_ms
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Advance by `dt_ms` of local time and pull toward `target_ms`
    pub fn advance(
        &mut self,
        dt_ms: f64,
        target_ms: f64,
        alpha: f64,
        hard_snap_ms: f64,
        profile: &ReconciliationProfile,
    ) -> ClockCorrection {
        let correction = if !self.initialized {
            self.initialized = true;
            self.smoothed_ms = target_ms;
            ClockCorrection::Init
        } else {
            self.smoothed_ms += dt_ms;
            let gap = target_ms - self.smoothed_ms;
            if gap.abs() > hard_snap_ms {
                self.smoothed_ms = target_ms;
                ClockCorrection::Snap
            } else {
                self.smoothed_ms += gap * alpha;
                let residual = target_ms - self.smoothed_ms;
                self.smoothed_ms += profile.drift_nudge(residual);
                ClockCorrection::Smooth
            }
        };

        self.rendered_ms = self.rendered_ms.max(self.smoothed_ms);
        correction
    }
}
