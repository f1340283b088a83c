//! Keyframe interpolation

use crate::sim::Keyframe;

/// Cubic Hermite between two samples.
///
/// `v0`/`v1` are speeds (m/s); they are scaled by the span so the tangents
/// are in meters per unit `u`.
pub fn hermite(p0: f64, p1: f64, v0: f64, v1: f64, u: f64, span_secs: f64) -> f64 {
    let u = u.clamp(0.0, 1.0);
    let m0 = v0 * span_secs;
    let m1 = v1 * span_secs;

    let u2 = u * u;
    let u3 = u2 * u;

    let h00 = 2.0 * u3 - 3.0 * u2 + 1.0;
    let h10 = u3 - 2.0 * u2 + u;
    let h01 = -2.0 * u3 + 3.0 * u2;
    let h11 = u3 - u2;

    h00 * p0 + h10 * m0 + h01 * p1 + h11 * m1
}

fn lerp(a: f64, b: f64, u: f64) -> f64 {
    a + (b - a) * u.clamp(0.0, 1.0)
}

/// Authoritative estimate for one runner at one render instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub position: f64,
    pub speed: f64,
    pub stamina: f64,
    pub finished: bool,
}

/// Interpolate runner `id` between `a` and `b` at `render_ms`.
///
/// The result is clamped to the keyframe pair's position range widened by
/// `epsilon`, so Hermite overshoot never leaves the authoritative envelope.
pub fn between(a: &Keyframe, b: &Keyframe, id: &str, render_ms: f64, epsilon: f64) -> Option<Sample> {
    let pa = a.position(id)?;
    let pb = b.position(id).unwrap_or(pa);
    let span_ms = b.elapsed_ms.saturating_sub(a.elapsed_ms) as f64;
    if span_ms <= 0.0 {
        return Some(hold(a, id, pa));
    }
    let u = (render_ms - a.elapsed_ms as f64) / span_ms;
    let raw = hermite(pa, pb, a.speed(id), b.speed(id), u, span_ms / 1000.0);
    let lo = pa.min(pb) - epsilon;
    let hi = pa.max(pb) + epsilon;

    // Non-finite keyframe data passes through for the caller to reject
    let position = if pa.is_finite() && pb.is_finite() {
        raw.clamp(lo, hi)
    } else {
        f64::NAN
    };

    Some(Sample {
        position,
        speed: lerp(a.speed(id), b.speed(id), u),
        stamina: lerp(a.stamina_of(id), b.stamina_of(id), u),
        finished: a.is_finished(id) || (u >= 1.0 && b.is_finished(id)),
    })
}

/// Extrapolate past the newest keyframe, at most `max_ahead_ms`
pub fn beyond(last: &Keyframe, id: &str, render_ms: f64, max_ahead_ms: f64) -> Option<Sample> {
    let p = last.position(id)?;
    if last.is_finished(id) {
        return Some(hold(last, id, p));
    }
    let ahead = (render_ms - last.elapsed_ms as f64).clamp(0.0, max_ahead_ms);
    let speed = last.speed(id).max(0.0);
    Some(Sample {
        position: p + speed * ahead / 1000.0,
        speed,
        stamina: last.stamina_of(id),
        finished: false,
    })
}

/// Sample exactly at a keyframe
pub fn hold(kf: &Keyframe, id: &str, position: f64) -> Sample {
    Sample {
        position,
        speed: kf.speed(id),
        stamina: kf.stamina_of(id),
        finished: kf.is_finished(id),
    }
}
