//! Simulated latent channel
//!
//! Stands in for the network between a client and the snapshot endpoint:
//! seeded latency, jitter and loss so playback can be exercised
//! deterministically in demos and tests.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use crate::error::PollError;

use super::server::SnapshotServer;
use super::wire::{PollRequest, PollResponse};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkProfile {
    /// Mean round-trip time
    pub rtt_ms: f64,
    /// Uniform +/- jitter added to each leg
    pub jitter_ms: f64,
    /// Probability a request is lost
    pub loss: f64,
    /// When a lost request is reported as failed
    pub timeout_ms: f64,
    /// Server clock minus client clock
    pub clock_offset_ms: f64,
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self {
            rtt_ms: 120.0,
            jitter_ms: 40.0,
            loss: 0.05,
            timeout_ms: 1000.0,
            clock_offset_ms: 0.0,
        }
    }
}

struct InFlight {
    deliver_at_ms: f64,
    result: Result<PollResponse, PollError>,
}

pub struct SimulatedLink<'a> {
    server: SnapshotServer<'a>,
    profile: LinkProfile,
    rng: Pcg32,
    in_flight: Vec<InFlight>,
}

impl<'a> SimulatedLink<'a> {
    pub fn new(server: SnapshotServer<'a>, profile: LinkProfile, seed: u64) -> Self {
        Self {
            server,
            profile,
            rng: Pcg32::seed_from_u64(seed),
            in_flight: Vec::new(),
        }
    }

    fn leg_ms(&mut self) -> f64 {
        let jitter = self.profile.jitter_ms.max(0.0);
        let spread = if jitter > 0.0 {
            self.rng.random_range(-jitter..=jitter)
        } else {
            0.0
        };
        (self.profile.rtt_ms / 2.0 + spread).max(0.0)
    }

    /// Send a request at client time `now_ms`
    pub fn send(&mut self, now_ms: f64, request: &PollRequest) {
        let lost = self.rng.random_bool(self.profile.loss.clamp(0.0, 1.0));
        if lost {
            self.in_flight.push(InFlight {
                deliver_at_ms: now_ms + self.profile.timeout_ms,
                result: Err(PollError::Timeout(self.profile.timeout_ms as u64)),
            });
            return;
        }
        let up = self.leg_ms();
        let down = self.leg_ms();
        let server_now = (now_ms + up + self.profile.clock_offset_ms).round() as i64;
        let response = self.server.respond(server_now, request);
        self.in_flight.push(InFlight {
            deliver_at_ms: now_ms + up + down,
            result: Ok(response),
        });
    }

    /// Earliest result that has arrived by client time `now_ms`
    pub fn recv(&mut self, now_ms: f64) -> Option<Result<PollResponse, PollError>> {
        let idx = self
            .in_flight
            .iter()
            .enumerate()
            .filter(|(_, f)| f.deliver_at_ms <= now_ms)
            .min_by(|(_, a), (_, b)| a.deliver_at_ms.total_cmp(&b.deliver_at_ms))
            .map(|(i, _)| i)?;
        Some(self.in_flight.swap_remove(idx).result)
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }
}
