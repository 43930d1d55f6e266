//! Jobs spawned when the player first visits a station.

use rand::Rng;
use tracing::{debug, info};

use crate::chain::JobChain;
use crate::context::EngineContext;
use crate::controller::finalize;
use crate::generators::{empty_haul, shunting_load, shunting_unload, transport, GenerationEnv};
use crate::host::Host;
use crate::{ChainId, EngineError, Event, EventEnvelope, JobKind, StationId, YardContent};

/// Builds one chain of `kind` at `station` with freshly spawned cars.
/// Inbound work is only generated when `suppress_inbound_generation` is off.
pub fn generate_station_job<H: Host, R: Rng + ?Sized>(
    env: &mut GenerationEnv<'_, H>,
    station: &StationId,
    kind: JobKind,
    force_licenses: bool,
    rng: &mut R,
) -> Option<JobChain> {
    match kind {
        JobKind::ShuntingLoad => {
            shunting_load::generate_with_car_spawning(env, station, force_licenses, rng)
        }
        JobKind::Transport => {
            transport::generate_with_car_spawning(env, station, force_licenses, rng)
        }
        JobKind::ShuntingUnload if env.constants().suppress_inbound_generation => {
            debug!(%station, "inbound job generation is suppressed");
            None
        }
        JobKind::ShuntingUnload => {
            shunting_unload::generate_with_car_spawning(env, station, force_licenses, rng)
        }
        JobKind::EmptyHaul => empty_haul::generate_with_car_spawning(env, station, rng),
    }
}

/// Populates a station's job board the first time it is visited in a
/// session. Attempts alternate between shunting loads and transports; the
/// first attempt is restricted to jobs the player holds licenses for.
pub fn generate_station_jobs<H: Host, R: Rng + ?Sized>(
    ctx: &mut EngineContext,
    content: &YardContent,
    host: &mut H,
    station: &StationId,
    rng: &mut R,
    events: &mut Vec<EventEnvelope>,
) -> Result<Vec<ChainId>, EngineError> {
    if ctx.is_broken() || ctx.spawn_blocked(station) {
        return Ok(Vec::new());
    }
    if content.station(station).is_none() {
        return Err(EngineError::UnknownStation(station.clone()));
    }

    let attempts = content.constants.station_jobs_per_visit;
    let mut generated = Vec::new();
    for attempt in 0..attempts {
        let kind = if attempt % 2 == 0 {
            JobKind::ShuntingLoad
        } else {
            JobKind::Transport
        };
        let chain = generate_station_job(
            &mut ctx.generation_env(content, host),
            station,
            kind,
            attempt == 0,
            rng,
        );
        let Some(chain) = chain else {
            debug!(%station, %kind, attempt, "station job attempt produced nothing");
            continue;
        };
        match finalize(ctx, host, chain, events) {
            Ok(id) => generated.push(id),
            Err(err) => {
                ctx.on_critical_failure(&err, events);
                return Err(err);
            }
        }
    }

    ctx.spawn_block.insert(station.clone());
    info!(%station, chains = generated.len(), "generated station jobs");
    ctx.emit(
        events,
        Event::StationJobsGenerated {
            station: station.clone(),
            chains: generated.len(),
        },
    );
    Ok(generated)
}
