//! Work generated when the last job of a chain completes.

use rand::Rng;
use tracing::{error, info};

use crate::chain::{FollowOnPolicy, JobChain};
use crate::context::EngineContext;
use crate::controller::finalize;
use crate::generators::{empty_haul, shunting_unload, transport};
use crate::host::Host;
use crate::{
    CarId, CarsPerTrack, EngineError, Event, EventEnvelope, JobDefinition, JobKind, JobPayload,
    JobSpecification, TrackId, YardContent,
};

/// Dispatches on the chain's policy and the kind of its last job.
pub fn run_follow_on<H: Host, R: Rng + ?Sized>(
    ctx: &mut EngineContext,
    content: &YardContent,
    host: &mut H,
    chain: &mut JobChain,
    rng: &mut R,
    events: &mut Vec<EventEnvelope>,
) -> Result<(), EngineError> {
    let Some(last) = chain.last_job().cloned() else {
        error!(chain = %chain.id, "completed chain has no jobs");
        return Ok(());
    };
    match (chain.policy, last.kind()) {
        (FollowOnPolicy::Terminal, _) => Ok(()),
        (FollowOnPolicy::EmptyHaulGeneration, JobKind::ShuntingUnload) => {
            empty_hauls_after_unload(ctx, content, host, chain, &last, rng, events)
        }
        (
            FollowOnPolicy::EmptyHaulGeneration | FollowOnPolicy::TransportGeneration,
            JobKind::ShuntingLoad,
        ) => transport_after_load(ctx, content, host, chain, &last, rng, events),
        (
            FollowOnPolicy::EmptyHaulGeneration | FollowOnPolicy::ShuntingUnloadGeneration,
            JobKind::Transport,
        ) => unload_after_transport(ctx, content, host, chain, &last, rng, events),
        (policy, kind) => {
            error!(
                chain = %chain.id,
                ?policy,
                %kind,
                "unexpected job chain format; no follow-on jobs will be generated"
            );
            Ok(())
        }
    }
}

fn detach_cars(chain: &mut JobChain, cars: &[CarId]) {
    chain.cars.retain(|car| !cars.contains(car));
}

fn current_cargo(host: &impl Host, cars: &[CarId]) -> Vec<Option<crate::CargoType>> {
    cars.iter()
        .map(|id| host.car(id).and_then(|car| car.cargo.clone()))
        .collect()
}

fn loaded_spec(
    host: &impl Host,
    last: &JobDefinition,
    start: TrackId,
    cars: Vec<CarId>,
) -> JobSpecification {
    JobSpecification {
        origin: last.station.clone(),
        cars_per_track: vec![CarsPerTrack {
            track: start,
            cars: cars.clone(),
        }],
        destination: last.destination.clone(),
        cargo_per_car: current_cargo(host, &cars),
        cars,
    }
}

fn transport_after_load<H: Host, R: Rng + ?Sized>(
    ctx: &mut EngineContext,
    content: &YardContent,
    host: &mut H,
    chain: &mut JobChain,
    last: &JobDefinition,
    rng: &mut R,
    events: &mut Vec<EventEnvelope>,
) -> Result<(), EngineError> {
    let JobPayload::ShuntingLoad {
        destination_track, ..
    } = &last.payload
    else {
        return Ok(());
    };
    let spec = loaded_spec(host, last, destination_track.clone(), chain.cars.clone());
    let generated = transport::generate_with_existing_cars(
        &mut ctx.generation_env(content, host),
        spec,
        false,
        FollowOnPolicy::for_generated(JobKind::Transport),
        rng,
    );
    if let Some(next) = generated {
        detach_cars(chain, &next.cars);
        finalize(ctx, host, next, events)?;
    }
    Ok(())
}

fn unload_after_transport<H: Host, R: Rng + ?Sized>(
    ctx: &mut EngineContext,
    content: &YardContent,
    host: &mut H,
    chain: &mut JobChain,
    last: &JobDefinition,
    rng: &mut R,
    events: &mut Vec<EventEnvelope>,
) -> Result<(), EngineError> {
    let JobPayload::Transport {
        destination_track, ..
    } = &last.payload
    else {
        return Ok(());
    };
    let spec = loaded_spec(host, last, destination_track.clone(), chain.cars.clone());
    let generated = shunting_unload::generate_with_existing_cars(
        &mut ctx.generation_env(content, host),
        spec,
        false,
        FollowOnPolicy::for_generated(JobKind::ShuntingUnload),
        rng,
    );
    if let Some(next) = generated {
        detach_cars(chain, &next.cars);
        finalize(ctx, host, next, events)?;
    }
    Ok(())
}

/// After an unload, car sets the station can load again stay there as
/// jobless stock; the rest are sent away empty.
fn empty_hauls_after_unload<H: Host, R: Rng + ?Sized>(
    ctx: &mut EngineContext,
    content: &YardContent,
    host: &mut H,
    chain: &mut JobChain,
    last: &JobDefinition,
    rng: &mut R,
    events: &mut Vec<EventEnvelope>,
) -> Result<(), EngineError> {
    let JobPayload::ShuntingUnload {
        destination_tracks, ..
    } = &last.payload
    else {
        return Ok(());
    };
    let Some(station) = content.station(&last.station) else {
        return Err(EngineError::UnknownStation(last.station.clone()));
    };

    let mut diverted = 0;
    for set in destination_tracks.iter().rev() {
        let car_types: Vec<_> = set
            .cars
            .iter()
            .filter_map(|id| host.car(id).map(|car| car.car_type.clone()))
            .collect();
        let reusable = !car_types.is_empty()
            && station.ruleset.outbound.iter().any(|group| {
                car_types
                    .iter()
                    .all(|car_type| ctx.index.can_carry_any(car_type, &group.cargo_types))
            });
        if reusable {
            host.register_jobless_cars(&set.cars);
            detach_cars(chain, &set.cars);
            diverted += set.cars.len();
            continue;
        }

        let generated = empty_haul::generate_with_existing_cars(
            &mut ctx.generation_env(content, host),
            &station.id,
            set.track.clone(),
            set.cars.clone(),
            FollowOnPolicy::for_generated(JobKind::EmptyHaul),
            rng,
        );
        if let Some(next) = generated {
            detach_cars(chain, &next.cars);
            finalize(ctx, host, next, events)?;
        }
    }

    if diverted > 0 {
        info!(station = %station.id, count = diverted, "diverted unloaded cars to the station's jobless pool");
        ctx.emit(
            events,
            Event::CarsDiverted {
                station: station.id.clone(),
                count: diverted,
            },
        );
    }
    Ok(())
}
