//! Race Sync entry point
//!
//! Native: builds race scripts from roster files and replays them through a
//! simulated network. The browser build goes through `race_sync::web`.

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use std::path::{Path, PathBuf};

    use clap::{Parser, Subcommand};
    use thiserror::Error;

    use race_sync::sim::{BuildRequest, RaceEntry, RaceScript, RoundKey, Stats, build_script};
    use race_sync::sync::{
        LinkProfile, RaceState, ReconciliationEngine, SimulatedLink, SnapshotServer,
    };
    use race_sync::{BuildError, Settings};

    /// Client frame cadence used by the replay loop
    const FRAME_MS: f64 = 1000.0 / 60.0;
    /// Replay keeps going this long past the scripted end
    const REPLAY_GRACE_MS: f64 = 10_000.0;
    /// Wall-clock delay between "now" and the scripted start
    const START_DELAY_MS: f64 = 500.0;

    #[derive(Error, Debug)]
    pub enum CliError {
        #[error("cannot read roster {path}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },

        #[error("invalid roster json: {0}")]
        Json(#[from] serde_json::Error),

        #[error(transparent)]
        Build(#[from] BuildError),
    }

    #[derive(Parser, Debug)]
    #[command(name = "race-sync")]
    #[command(about = "Build deterministic race scripts and replay them over a simulated network")]
    pub struct Cli {
        #[command(subcommand)]
        command: Option<Command>,
    }

    #[derive(Subcommand, Debug, PartialEq)]
    enum Command {
        /// Build a script and print it as JSON
        Build {
            /// Roster file (a BuildRequest); the demo roster when omitted
            roster: Option<PathBuf>,
            /// Settings file overriding simulation and playback tuning
            settings: Option<PathBuf>,
        },
        /// Build a script and replay it through a lossy simulated link
        Replay {
            roster: Option<PathBuf>,
            settings: Option<PathBuf>,
        },
    }

    fn load_roster(path: &Path) -> Result<BuildRequest, CliError> {
        let json = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    fn demo_roster() -> BuildRequest {
        let runners = [
            ("thunder", [24.0, 16.0, 20.0, 14.0, 18.0, 10.0]),
            ("biscuit", [18.0, 26.0, 16.0, 22.0, 12.0, 14.0]),
            ("comet", [28.0, 10.0, 22.0, 10.0, 24.0, 8.0]),
            ("maple", [16.0, 22.0, 18.0, 26.0, 14.0, 20.0]),
            ("sprocket", [20.0, 18.0, 26.0, 12.0, 16.0, 16.0]),
        ];
        BuildRequest {
            round: RoundKey::new("demo", 1),
            entries: runners
                .iter()
                .map(|&(id, [speed, stamina, power, guts, start, luck])| RaceEntry {
                    player_id: id.to_string(),
                    stats: Stats {
                        speed,
                        stamina,
                        power,
                        guts,
                        start,
                        luck,
                    },
                    augments: Vec::new(),
                    condition_roll: None,
                })
                .collect(),
            settings: Default::default(),
        }
    }

    fn build(request: &BuildRequest) -> Result<RaceScript, BuildError> {
        let script = build_script(request)?;
        for ranking in &script.rankings {
            log::info!(
                "#{} {} {}",
                ranking.rank,
                ranking.player_id,
                if ranking.finished {
                    format!("{:.3}s", ranking.time)
                } else {
                    "DNF".to_string()
                }
            );
        }
        Ok(script)
    }

    fn replay(script: &RaceScript, request: &BuildRequest, settings: &Settings) {
        let server = SnapshotServer::new(script, request.round.clone(), START_DELAY_MS as i64);
        let mut link = SimulatedLink::new(server, LinkProfile::default(), u64::from(request.round.round));
        let mut engine = ReconciliationEngine::new(request.round.clone(), settings.sync.clone(), 0.0);

        let end = START_DELAY_MS + script.meta.duration_ms as f64 + REPLAY_GRACE_MS;
        let mut now = 0.0;
        let mut last_state = engine.state();
        while now < end && engine.state() != RaceState::Completed {
            if let Some(request) = engine.poll_request(now) {
                link.send(now, &request);
            }
            while let Some(result) = link.recv(now) {
                engine.receive(now, result);
            }

            let frame = engine.frame(now);
            if frame.state != last_state {
                log::info!("{:>7.0} ms  {:?} -> {:?}", now, last_state, frame.state);
                last_state = frame.state;
            }
            for event in &frame.events {
                log::info!(
                    "{:>7.0} ms  event #{} at {} ms: {:?}",
                    now,
                    event.id,
                    event.elapsed_ms,
                    event.kind
                );
            }
            now += FRAME_MS;
        }

        let diagnostics = engine.diagnostics();
        if engine.state() == RaceState::Completed {
            log::info!("Replay complete at {:.0} ms local time", now);
        } else {
            log::warn!("Replay stopped at {:.0} ms without completing", now);
        }
        log::info!("{:?}", diagnostics);
    }

    pub fn run(cli: Cli) -> Result<(), CliError> {
        let command = cli.command.unwrap_or(Command::Replay {
            roster: None,
            settings: None,
        });
        let (print_json, roster, settings_path) = match command {
            Command::Build { roster, settings } => (true, roster, settings),
            Command::Replay { roster, settings } => (false, roster, settings),
        };

        let settings = settings_path
            .as_deref()
            .map(Settings::load)
            .unwrap_or_default();
        let mut request = match roster.as_deref() {
            Some(path) => load_roster(path)?,
            None => {
                log::info!("No roster given, using the demo roster");
                demo_roster()
            }
        };
        if settings_path.is_some() {
            request.settings = settings.sim.clone();
        }

        let script = build(&request)?;
        log::info!(
            "Built {} keyframes, {} events, hash {}",
            script.keyframes.len(),
            script.events.len(),
            script.meta.content_hash
        );

        if print_json {
            println!("{}", script.to_json().map_err(BuildError::from)?);
        } else {
            replay(&script, &request, &settings);
        }
        Ok(())
    }

}

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    use clap::Parser;

    if let Err(e) = cli::run(cli::Cli::parse()) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // WASM entry point is race_sync::web, this is just to satisfy the compiler
}
