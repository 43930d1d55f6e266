use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{
        sse::{Event, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use yard_control::RunState;
use yard_core::{EventEnvelope, StationId, TrackId};

#[cfg(test)]
pub fn make_router(state: AppState) -> Router {
    make_router_with_cors(state, "http://localhost:5173")
}

pub fn make_router_with_cors(state: AppState, cors_origin: &str) -> Router {
    let origin = cors_origin
        .parse::<axum::http::HeaderValue>()
        .unwrap_or_else(|_| axum::http::HeaderValue::from_static("http://localhost:5173"));
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/meta", get(meta_handler))
        .route("/api/v1/snapshot", get(snapshot_handler))
        .route("/api/v1/jobs", get(jobs_handler))
        .route("/api/v1/stream", get(stream_handler))
        .route("/api/v1/save", post(save_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn meta_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let yard = app_state.yard.lock();
    Json(serde_json::json!({
        "cycle": yard.ctx.cycle,
        "cycles_run": yard.cycles_run,
        "seed": yard.seed,
        "content_version": yard.content.content_version,
        "broken": yard.ctx.is_broken(),
    }))
}

pub async fn snapshot_handler(
    State(app_state): State<AppState>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let yard = app_state.yard.lock();
    let reserved: BTreeMap<&TrackId, f32> = yard
        .content
        .stations
        .iter()
        .flat_map(|s| s.tracks.iter())
        .map(|t| (&t.id, yard.ctx.tracks.reserved(&t.id)))
        .filter(|(_, length)| *length > 0.0)
        .collect();
    let body = serde_json::json!({
        "cycle": yard.ctx.cycle,
        "host": yard.host.snapshot(),
        "chains": yard.ctx.chains.len(),
        "available_jobs": yard.ctx.chains.available_jobs(None).count(),
        "spawn_block": &yard.ctx.spawn_block,
        "reserved": reserved,
        "crew": {
            "location": yard.crew.location(),
            "active_job": yard.crew.active_job(),
            "completed": yard.crew.completed,
            "abandoned": yard.crew.abandoned,
        },
    });
    drop(yard);
    match serde_json::to_string(&body) {
        Ok(json) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            json,
        ),
        Err(err) => {
            tracing::error!("snapshot serialization failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"error":"serialization failed"}"#.to_string(),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    station: Option<String>,
}

/// Live chains with their current job, optionally only those listed at one
/// station's job board.
pub async fn jobs_handler(
    State(app_state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Json<serde_json::Value> {
    let station = query.station.map(StationId);
    let yard = app_state.yard.lock();
    let mut chains: Vec<serde_json::Value> = yard
        .ctx
        .chains
        .values()
        .filter_map(|chain| Some((chain, chain.current_job()?)))
        .filter(|(_, job)| station.as_ref().map_or(true, |s| &job.station == s))
        .map(|(chain, job)| {
            serde_json::json!({
                "chain_id": chain.id,
                "state": chain.state,
                "policy": chain.policy,
                "taken": chain.is_taken(),
                "job": job,
            })
        })
        .collect();
    drop(yard);
    chains.sort_by(|a, b| a["chain_id"].as_str().cmp(&b["chain_id"].as_str()));
    Json(serde_json::json!({ "chains": chains }))
}

pub async fn save_handler(
    State(app_state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(path) = app_state.save_path.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "no save path (start with --save)"})),
        );
    };

    let mut yard = app_state.yard.lock();
    let crate::state::YardState {
        ctx,
        content,
        host,
        crew,
        seed,
        cycles_run,
        ..
    } = &mut *yard;
    let captured = RunState::capture(*seed, *cycles_run, ctx, content, host, crew);
    drop(yard);
    let body = match captured.map(|state| serde_json::to_string_pretty(&state)) {
        Ok(Ok(json)) => json,
        Ok(Err(err)) => {
            tracing::error!("save serialization failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "serialization failed"})),
            );
        }
        Err(err) => {
            tracing::error!("engine save failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": format!("engine save: {err}")})),
            );
        }
    };

    if let Err(err) = std::fs::write(&path, body) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": format!("write save: {err}")})),
        );
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({"path": path.display().to_string()})),
    )
}

pub async fn stream_handler(
    State(app_state): State<AppState>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = app_state.event_tx.subscribe();
    let yard = app_state.yard.clone();

    let stream = async_stream::stream! {
        let mut heartbeat = tokio::time::interval(Duration::from_secs(5));
        heartbeat.tick().await; // discard the immediate first tick
        let mut flush = tokio::time::interval(Duration::from_millis(50));
        flush.tick().await; // discard the immediate first tick
        let mut pending: Vec<EventEnvelope> = Vec::new();
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(events) => pending.extend(events),
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = flush.tick() => {
                    if !pending.is_empty() {
                        let data = serde_json::to_string(&pending).unwrap_or_default();
                        pending.clear();
                        yield Ok(Event::default().data(data));
                    }
                }
                _ = heartbeat.tick() => {
                    let cycle = yard.lock().ctx.cycle;
                    let hb = serde_json::json!({"heartbeat": true, "cycle": cycle});
                    yield Ok(Event::default().data(hb.to_string()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}
