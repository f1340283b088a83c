//! Per-runner physics step
//!
//! Advances one runner by one fixed timestep using its derived parameters
//! and special-ability state.

use crate::consts::*;

use super::state::EntitySimState;
use super::stats::RunnerProfile;

/// Speed multiplier imposed by low stamina, in [floor, 1]
pub fn fatigue_multiplier(stamina_ratio: f64, floor: f64) -> f64 {
    if stamina_ratio >= FATIGUE_THRESHOLD {
        return 1.0;
    }
    let x = (stamina_ratio / FATIGUE_THRESHOLD).clamp(0.0, 1.0);
    floor + (1.0 - floor) * x.powf(FATIGUE_EXPONENT)
}

/// Fraction of target speed reached `since_start` seconds after the gun
pub fn log_ramp(since_start: f64, accel: f64, target_accel_time: f64) -> f64 {
    if since_start <= 0.0 {
        return 0.0;
    }
    if since_start >= target_accel_time || target_accel_time <= 0.0 {
        return 1.0;
    }
    let k = (accel * RAMP_CURVATURE).max(f64::EPSILON);
    ((1.0 + k * since_start).ln() / (1.0 + k * target_accel_time).ln()).min(1.0)
}

/// Multiplier on stamina drain for fast runners
fn speed_penalty(speed_normalized: f64) -> f64 {
    1.0 + DRAIN_SPEED_PENALTY * speed_normalized
}

/// Stamina spent covering `distance` at `speed`
pub fn stamina_drain(speed: f64, distance: f64, runner: &RunnerProfile) -> f64 {
    let speed_term = DRAIN_SPEED_FACTOR * speed.clamp(0.0, DRAIN_SPEED_CAP) / DRAIN_SPEED_CAP;
    (DRAIN_BASE + speed_term)
        * speed_penalty(runner.params.speed_normalized)
        * distance
        * runner.params.stamina_cost_factor
}

/// Target speed after ability modifiers.
///
/// The bonuses are clamped back to `max_speed`, which cancels them for a
/// runner already at top speed. Kept as-is pending product confirmation.
pub fn target_speed(state: &EntitySimState, runner: &RunnerProfile) -> f64 {
    let max_speed = runner.params.max_speed;
    let mut target = max_speed;

    if state.escape_crisis_active {
        if let Some(value) = runner.abilities.escape_crisis_value {
            target *= 1.0 + (value / 10.0) * 0.1;
        }
    }
    if state.overtake_count > 0 {
        if let Some(value) = runner.abilities.overtake_bonus_value {
            let per_overtake = 1.0 + (value - 6.0) * 0.005 + 0.01;
            target *= per_overtake.powi(state.overtake_count as i32);
        }
    }

    target.min(max_speed)
}

impl EntitySimState {
    /// Advance by `dt` seconds; `t` is the race time at the end of the step.
    ///
    /// A line crossing inside the step is back-interpolated assuming constant
    /// speed across the step.
    pub fn step(&self, runner: &RunnerProfile, track_length: f64, dt: f64, t: f64) -> Self {
        let mut next = self.clone();
        let params = &runner.params;

        if self.finished || t < params.start_delay {
            return next;
        }

        if self.position >= track_length {
            next.finished = true;
            next.finish_time.get_or_insert(t - dt);
            return next;
        }

        let progress = self.progress(track_length);
        if !next.last_spurt_active {
            if let Some(trigger) = runner.abilities.last_spurt_trigger_progress {
                if progress >= trigger {
                    next.last_spurt_active = true;
                }
            }
        }

        let mut accel = params.accel_factor;
        if self.position < track_length * START_ZONE_PROGRESS {
            accel *= params.start_accel_boost;
        }

        let target = target_speed(self, runner);
        let fatigue = if next.last_spurt_active {
            1.0
        } else {
            fatigue_multiplier(self.stamina_ratio(), params.fatigue_floor)
        };
        let ramp = log_ramp(t - params.start_delay, accel, params.target_accel_time);
        let speed = (target * fatigue * ramp).max(0.0);
        let distance = speed * dt;

        next.current_speed = speed;
        next.stamina = (self.stamina - stamina_drain(speed, distance, runner)).max(0.0);
        next.position = self.position + distance;

        if next.position >= track_length {
            next.finished = true;
            let remaining = track_length - self.position;
            let crossing = if speed > 0.0 { remaining / speed } else { dt };
            next.finish_time.get_or_insert(t - dt + crossing);
        }

        next
    }
}
