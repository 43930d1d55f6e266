mod reclaim_loop;
mod routes;
mod state;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;
use yard_control::{CrewController, RunState, SimHost};
use yard_core::{EngineContext, YardContent};
use yard_world::{apply_overrides, build_initial_stock, load_content};

use crate::reclaim_loop::{run_reclaim_loop, LoopTiming};
use crate::state::{AppState, YardState};

#[derive(Parser)]
#[command(name = "yard_daemon", about = "Freight yard reclamation service")]
struct Args {
    #[arg(long, default_value = "./content")]
    content_dir: String,
    /// Scatter fresh stock with this seed. Mutually exclusive with --state.
    #[arg(long, conflicts_with = "state_file")]
    seed: Option<u64>,
    /// Resume from a state file written by the CLI or `POST /api/v1/save`.
    #[arg(long = "state", conflicts_with = "seed")]
    state_file: Option<String>,
    /// File that `POST /api/v1/save` writes.
    #[arg(long)]
    save: Option<PathBuf>,
    #[arg(long, default_value_t = 3001)]
    port: u16,
    #[arg(long, default_value = "http://localhost:5173")]
    cors_origin: String,
    #[arg(long, default_value_t = 3)]
    trainsets_per_station: u32,
    /// Crew steps after each reclamation pass.
    #[arg(long, default_value_t = 4)]
    crew_steps: u64,
    /// Stop after this many passes.
    #[arg(long)]
    max_cycles: Option<u64>,
    /// Override a constant, e.g. `--set reclamation_period_secs=5`.
    #[arg(long = "set", value_parser = parse_override)]
    overrides: Vec<(String, serde_json::Value)>,
}

fn parse_override(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn fresh_yard(content: YardContent, seed: u64, trainsets_per_station: u32) -> Result<YardState> {
    let Some(start) = content.stations.first().map(|s| s.id.clone()) else {
        bail!("content has no stations");
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let stock = build_initial_stock(&content, trainsets_per_station, &mut rng);
    let mut host = SimHost::new(&content, stock);
    host.move_player_to(&start);
    Ok(YardState {
        ctx: EngineContext::init(&content),
        host,
        crew: CrewController::new(start),
        content,
        rng,
        seed,
        cycles_run: 0,
    })
}

fn resume_yard(content: YardContent, path: &str) -> Result<YardState> {
    let json =
        std::fs::read_to_string(path).with_context(|| format!("reading state file: {path}"))?;
    let saved: RunState =
        serde_json::from_str(&json).with_context(|| format!("parsing state file: {path}"))?;
    let (seed, cycle) = (saved.seed, saved.cycle);
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(cycle));
    let mut events = Vec::new();
    let restored = saved
        .restore(&content, &mut rng, &mut events)
        .with_context(|| format!("restoring engine state from {path}"))?;
    if !restored.jobs_restored {
        tracing::warn!(path, "saved jobs do not match the track layout; starting without them");
    }
    Ok(YardState {
        ctx: restored.ctx,
        host: restored.host,
        crew: restored.crew,
        content,
        rng,
        seed,
        cycles_run: cycle,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut content = load_content(&args.content_dir)?;
    let overrides: HashMap<String, serde_json::Value> = args.overrides.into_iter().collect();
    apply_overrides(&mut content.constants, &overrides)?;
    let mut timing = LoopTiming::from_constants(&content.constants, args.crew_steps);
    timing.max_cycles = args.max_cycles;

    let yard = match &args.state_file {
        Some(path) => resume_yard(content, path)?,
        None => fresh_yard(
            content,
            args.seed.unwrap_or_else(rand::random),
            args.trainsets_per_station,
        )?,
    };
    info!(
        seed = yard.seed,
        cars = yard.host.snapshot().cars,
        period_secs = timing.period.as_secs_f32(),
        "yard ready"
    );

    let (event_tx, _) = tokio::sync::broadcast::channel(256);
    let app_state = AppState {
        yard: Arc::new(Mutex::new(yard)),
        event_tx: event_tx.clone(),
        save_path: args.save,
    };
    tokio::spawn(run_reclaim_loop(app_state.yard.clone(), event_tx, timing));

    let router = routes::make_router_with_cors(app_state, &args.cors_origin);
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "serving yard API");
    axum::serve(listener, router).await.context("serving API")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::make_router;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use yard_core::test_fixtures::base_content;

    fn make_test_state(save_path: Option<PathBuf>) -> AppState {
        let yard = fresh_yard(base_content(), 42, 2).unwrap();
        let (event_tx, _) = tokio::sync::broadcast::channel(64);
        AppState {
            yard: Arc::new(Mutex::new(yard)),
            event_tx,
            save_path,
        }
    }

    fn run_crew(state: &AppState, steps: usize) {
        use yard_control::Operator;
        let mut yard = state.yard.lock();
        let YardState {
            ctx,
            content,
            host,
            crew,
            rng,
            ..
        } = &mut *yard;
        let mut events = Vec::new();
        for _ in 0..steps {
            crew.step(ctx, content, host, rng, &mut events).unwrap();
        }
    }

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = make_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_meta_reports_seed_and_cycle() {
        let (status, json) = get_json(make_test_state(None), "/api/v1/meta").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["seed"], 42);
        assert_eq!(json["cycle"], 0);
        assert_eq!(json["broken"], false);
    }

    #[tokio::test]
    async fn test_snapshot_counts_cars_and_crew() {
        let state = make_test_state(None);
        run_crew(&state, 1);
        let (status, json) = get_json(state, "/api/v1/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["host"]["cars"].as_u64().unwrap() > 0);
        assert_eq!(json["crew"]["location"], "A");
        assert!(json["crew"]["active_job"].is_string());
        assert_eq!(json["spawn_block"], serde_json::json!(["A"]));
    }

    #[tokio::test]
    async fn test_jobs_filter_by_station() {
        let state = make_test_state(None);
        run_crew(&state, 1);
        let (status, all) = get_json(state.clone(), "/api/v1/jobs").await;
        assert_eq!(status, StatusCode::OK);
        let chains = all["chains"].as_array().unwrap();
        assert!(!chains.is_empty());
        assert!(chains.iter().any(|c| c["taken"] == true));

        let (_, at_b) = get_json(state, "/api/v1/jobs?station=B").await;
        assert!(at_b["chains"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_without_path_is_unavailable() {
        let response = make_router(make_test_state(None))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/save")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_save_writes_a_resumable_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yard.json");
        let state = make_test_state(Some(path.clone()));
        run_crew(&state, 1);
        let chains = state.yard.lock().ctx.chains.len();

        let response = make_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/save")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let resumed = resume_yard(base_content(), path.to_str().unwrap()).unwrap();
        assert_eq!(resumed.ctx.chains.len(), chains);
        assert_eq!(resumed.seed, 42);
    }
}
