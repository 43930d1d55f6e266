use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;
use yard_control::{CrewController, Operator, RunState, SimHost};
use yard_core::{
    persistence, run_reclamation_cycle, EngineContext, Event, EventEnvelope, PassStatus,
    StationId, YardContent,
};
use yard_world::{apply_overrides, build_initial_stock, load_content};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "yard_cli", about = "Freight yard job engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Alternate reclamation passes with crew work for a number of cycles.
    Run {
        #[arg(long)]
        cycles: u64,
        /// Scatter fresh stock with this seed. Mutually exclusive with --state.
        #[arg(long, conflicts_with = "state_file")]
        seed: Option<u64>,
        /// Resume from a state file written by --save. Mutually exclusive with --seed.
        #[arg(long = "state", conflicts_with = "seed")]
        state_file: Option<String>,
        /// Write the final state here.
        #[arg(long)]
        save: Option<String>,
        #[arg(long, default_value = "./content")]
        content_dir: String,
        #[arg(long, default_value_t = 8)]
        steps_per_cycle: u64,
        #[arg(long, default_value_t = 3)]
        trainsets_per_station: u32,
        /// Abandon every n-th job instead of completing it (0 = never).
        #[arg(long, default_value_t = 0)]
        abandon_every: u64,
        /// Override a constant, e.g. `--set station_jobs_per_visit=4`.
        #[arg(long = "set", value_parser = parse_override)]
        overrides: Vec<(String, serde_json::Value)>,
    },
    /// Load and cross-check a content directory.
    Validate {
        #[arg(long, default_value = "./content")]
        content_dir: String,
    },
}

fn parse_override(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

struct Session {
    seed: u64,
    first_cycle: u64,
    ctx: EngineContext,
    host: SimHost,
    crew: CrewController,
    rng: ChaCha8Rng,
}

fn first_station(content: &YardContent) -> Result<StationId> {
    match content.stations.first() {
        Some(station) => Ok(station.id.clone()),
        None => bail!("content has no stations"),
    }
}

fn fresh_session(content: &YardContent, seed: u64, trainsets_per_station: u32) -> Result<Session> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let stock = build_initial_stock(content, trainsets_per_station, &mut rng);
    let mut host = SimHost::new(content, stock);
    let start = first_station(content)?;
    host.move_player_to(&start);
    Ok(Session {
        seed,
        first_cycle: 1,
        ctx: EngineContext::init(content),
        host,
        crew: CrewController::new(start),
        rng,
    })
}

fn resume_session(
    content: &YardContent,
    path: &str,
    events: &mut Vec<EventEnvelope>,
) -> Result<Session> {
    let json =
        std::fs::read_to_string(path).with_context(|| format!("reading state file: {path}"))?;
    let state: RunState =
        serde_json::from_str(&json).with_context(|| format!("parsing state file: {path}"))?;
    let (seed, cycle) = (state.seed, state.cycle);
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(cycle));
    let restored = state
        .restore(content, &mut rng, events)
        .with_context(|| format!("restoring engine state from {path}"))?;
    if !restored.jobs_restored {
        println!("Saved jobs in {path} do not match this track layout; starting without them.");
    }
    Ok(Session {
        seed,
        first_cycle: cycle + 1,
        ctx: restored.ctx,
        host: restored.host,
        crew: restored.crew,
        rng,
    })
}

fn write_state(path: &str, content: &YardContent, session: &mut Session, cycle: u64) -> Result<()> {
    let state = RunState::capture(
        session.seed,
        cycle,
        &session.ctx,
        content,
        &mut session.host,
        &session.crew,
    )
    .context("saving engine state")?;
    let file = std::fs::File::create(path).with_context(|| format!("creating {path}"))?;
    serde_json::to_writer_pretty(file, &state).with_context(|| format!("writing {path}"))?;
    println!("State written to {path}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

struct RunOptions {
    cycles: u64,
    steps_per_cycle: u64,
    save: Option<String>,
}

fn run(content: &YardContent, mut session: Session, options: &RunOptions) -> Result<()> {
    println!(
        "Starting: cycles={} seed={} stations={} cars={} content_version={}",
        options.cycles,
        session.seed,
        content.stations.len(),
        session.host.snapshot().cars,
        content.content_version,
    );
    println!("{}", "-".repeat(80));

    let end = session.first_cycle + options.cycles;
    for cycle in session.first_cycle..end {
        let mut events = Vec::new();
        let status = run_reclamation_cycle(
            &mut session.ctx,
            content,
            &mut session.host,
            &mut session.rng,
            &mut events,
        )?;
        if let PassStatus::Skipped(reason) = &status {
            println!("[cycle={cycle:04}] reclamation skipped: {reason}");
        }
        for _ in 0..options.steps_per_cycle {
            let action = session.crew.step(
                &mut session.ctx,
                content,
                &mut session.host,
                &mut session.rng,
                &mut events,
            )?;
            debug!(?action, "crew step");
        }
        print_notable(&events);
        print_status(cycle, &session);
    }

    println!("{}", "-".repeat(80));
    println!(
        "Done. completed={} abandoned={} broken={}",
        session.crew.completed,
        session.crew.abandoned,
        session.ctx.is_broken()
    );
    if let Some(path) = &options.save {
        write_state(path, content, &mut session, end - 1)?;
    }
    Ok(())
}

fn print_notable(events: &[EventEnvelope]) {
    for envelope in events {
        match &envelope.event {
            Event::GenerationDisabled { reason } => {
                println!("*** JOB GENERATION DISABLED: {reason} ***");
            }
            Event::ReclamationFinished {
                candidates,
                absorbed,
                preserved,
                deleted,
            } if *candidates > 0 => println!(
                "    reclaimed: candidates={candidates} absorbed={absorbed} \
                 preserved={preserved} deleted={deleted}"
            ),
            _ => {}
        }
    }
}

fn print_status(cycle: u64, session: &Session) {
    let snapshot = session.host.snapshot();
    let available = session.ctx.chains.available_jobs(None).count();
    println!(
        "[cycle={cycle:04}]  chains={chains:3}  available={available:3}  \
         cars={cars:4}  loaded={loaded:4}  unused={unused:4}  \
         completed={completed}  crew_at={location}",
        chains = session.ctx.chains.len(),
        cars = snapshot.cars,
        loaded = snapshot.loaded,
        unused = snapshot.unused,
        completed = session.crew.completed,
        location = session.crew.location(),
    );
}

fn validate(content_dir: &str) -> Result<()> {
    let content = load_content(content_dir)?;
    let tracks: usize = content.stations.iter().map(|s| s.tracks.len()).sum();
    println!(
        "Content OK: version={} stations={} tracks={} car_types={} cargo_types={} tracks_hash={:08x}",
        content.content_version,
        content.stations.len(),
        tracks,
        content.cargo.car_types.len(),
        content.cargo.cargo_types.len(),
        persistence::tracks_hash(&content),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            cycles,
            seed,
            state_file,
            save,
            content_dir,
            steps_per_cycle,
            trainsets_per_station,
            abandon_every,
            overrides,
        } => {
            let mut content = load_content(&content_dir)?;
            let overrides: HashMap<String, serde_json::Value> = overrides.into_iter().collect();
            apply_overrides(&mut content.constants, &overrides)?;

            let mut events = Vec::new();
            let mut session = match state_file {
                Some(path) => resume_session(&content, &path, &mut events)?,
                None => fresh_session(
                    &content,
                    seed.unwrap_or_else(rand::random),
                    trainsets_per_station,
                )?,
            };
            session.crew = session.crew.abandoning_every(abandon_every);
            let options = RunOptions {
                cycles,
                steps_per_cycle,
                save,
            };
            run(&content, session, &options)?;
        }
        Commands::Validate { content_dir } => validate(&content_dir)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_dir() -> String {
        format!("{}/../../content", env!("CARGO_MANIFEST_DIR"))
    }

    #[test]
    fn test_parse_override_reads_json_values() {
        let (key, value) = parse_override("station_jobs_per_visit=4").unwrap();
        assert_eq!(key, "station_jobs_per_visit");
        assert_eq!(value, serde_json::json!(4));
        let (_, value) = parse_override("preserve_unabsorbed_cars=false").unwrap();
        assert_eq!(value, serde_json::json!(false));
    }

    #[test]
    fn test_parse_override_falls_back_to_string() {
        let (_, value) = parse_override("track_selection=Random").unwrap();
        assert_eq!(value, serde_json::json!("Random"));
        assert!(parse_override("no_equals_sign").is_err());
    }

    #[test]
    fn test_state_file_resumes_saved_jobs() {
        let content = load_content(&content_dir()).unwrap();
        let mut session = fresh_session(&content, 42, 2).unwrap();
        let mut events = Vec::new();
        session
            .crew
            .step(
                &mut session.ctx,
                &content,
                &mut session.host,
                &mut session.rng,
                &mut events,
            )
            .unwrap();
        let chains = session.ctx.chains.len();
        let cars = session.host.snapshot().cars;
        assert!(chains > 0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let path = path.to_str().unwrap();
        write_state(path, &content, &mut session, 1).unwrap();

        let resumed = resume_session(&content, path, &mut events).unwrap();
        assert_eq!(resumed.first_cycle, 2);
        assert_eq!(resumed.seed, 42);
        assert_eq!(resumed.ctx.chains.len(), chains);
        assert_eq!(resumed.host.snapshot().cars, cars);
        assert_eq!(resumed.crew.location(), session.crew.location());
    }

    #[test]
    fn test_missing_state_file_errors() {
        let content = load_content(&content_dir()).unwrap();
        let mut events = Vec::new();
        let err = resume_session(&content, "/nonexistent/state.json", &mut events)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("reading state file"));
    }
}
