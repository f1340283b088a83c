//! Client playback of a replicated race script
//!
//! The server side (`server`) slices a built script by wall-clock time; the
//! client side (`engine`) pulls those slices into a bounded log and renders a
//! smooth, monotonic view of the race from them.

pub mod clock;
pub mod engine;
pub mod interpolate;
pub mod log;
pub mod profile;
pub mod server;
pub mod transport;
pub mod wire;

pub use clock::{ClockCorrection, RenderClock};
pub use engine::{Diagnostics, Frame, RaceState, ReconciliationEngine, RenderedEntity};
pub use self::log::ReplicatedLog;
pub use profile::{Correction, ProfileTable, RacePhase, ReconciliationProfile};
pub use server::SnapshotServer;
pub use transport::{LinkProfile, SimulatedLink};
pub use wire::{PollRequest, PollResponse, RaceStatus};
