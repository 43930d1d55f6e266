use rand::Rng;
use tracing::{debug, warn};

use super::GenerationEnv;
use crate::chain::{FollowOnPolicy, JobChain};
use crate::host::Host;
use crate::sampling::{generate_base_cargo_train_data, shuffled};
use crate::{
    CarsPerTrack, JobDefinition, JobKind, JobPayload, JobSpecification, JobState, Licenses,
    StationId, TrackPool,
};

/// Builds a transport chain hauling `spec.cars` from `spec.origin` to a
/// transfer-in track of `spec.destination`.
pub fn generate_with_existing_cars<H: Host, R: Rng + ?Sized>(
    env: &mut GenerationEnv<'_, H>,
    spec: JobSpecification,
    force_correct_cargo_state: bool,
    policy: FollowOnPolicy,
    rng: &mut R,
) -> Option<JobChain> {
    env.station(&spec.origin)?;
    env.station(&spec.destination)?;
    let car_types = env.car_types_of(&spec.cars)?;
    let Some(starting_track) = spec
        .cars_per_track
        .first()
        .map(|cpt| cpt.track.clone())
        .or_else(|| {
            spec.cars
                .first()
                .and_then(|id| env.host.car(id))
                .and_then(|car| car.track.clone())
        })
    else {
        warn!(origin = %spec.origin, "transport: train has no starting track");
        return None;
    };

    let train_length = env.train_length(&car_types);
    let Some(destination_track) =
        env.destination_track(&spec.destination, TrackPool::TransferIn, train_length, rng)
    else {
        warn!(
            origin = %spec.origin,
            destination = %spec.destination,
            train_length,
            "transport: found no transfer-in track with enough free space"
        );
        return None;
    };

    let (bonus_time_limit, initial_wage) = env.haul_bonus_and_wage(
        JobKind::Transport,
        &spec.origin,
        &spec.destination,
        &car_types,
        &spec.cargo_per_car,
    );
    let licenses = env.licenses_for(JobKind::Transport, &spec.cargo_per_car, spec.cars.len());
    let threshold = env.constants().loaded_cargo_threshold;
    let amount_per_car = spec
        .cars
        .iter()
        .map(|id| match env.host.car(id) {
            Some(car) if !car.is_empty(threshold) => car.cargo_amount,
            _ => 1.0,
        })
        .collect();

    let definition = JobDefinition {
        id: env.next_job_id(JobKind::Transport),
        station: spec.origin.clone(),
        origin: spec.origin,
        destination: spec.destination,
        cars: spec.cars,
        car_types,
        payload: JobPayload::Transport {
            starting_track,
            destination_track,
            cargo_per_car: spec.cargo_per_car,
            amount_per_car,
        },
        bonus_time_limit,
        initial_wage,
        licenses,
        force_correct_cargo_state,
        state: JobState::Available,
    };
    debug!(job = %definition.id, from = %definition.origin, to = %definition.destination, "transport: built job");
    Some(env.chain_for(definition, policy, rng))
}

/// Spawns a loaded train on a transfer-out track of `station_id` and builds
/// a transport chain to one of its cargo group's partner stations.
pub fn generate_with_car_spawning<H: Host, R: Rng + ?Sized>(
    env: &mut GenerationEnv<'_, H>,
    station_id: &StationId,
    force_licenses: bool,
    rng: &mut R,
) -> Option<JobChain> {
    let station = env.station(station_id)?;
    let data = generate_base_cargo_train_data(
        &station.ruleset,
        &station.ruleset.outbound,
        force_licenses.then_some(Licenses::FREIGHT_HAUL),
        &*env.host,
        env.index,
        rng,
    )?;
    let train_length = env.train_length(&data.car_types);

    let Some(starting_track) =
        env.track_with_space(station_id, TrackPool::TransferOut, train_length, rng)
    else {
        warn!(station = %station_id, "transport: couldn't find starting track with enough free space for train");
        return None;
    };
    let Some(destination) = shuffled(&data.partners, rng).into_iter().find(|partner| {
        env.free_unoccupied_track(partner, TrackPool::TransferIn, train_length, rng)
            .is_some()
    }) else {
        warn!(station = %station_id, "transport: couldn't find a station with enough free space for train");
        return None;
    };

    let Some(cars) = env.host.spawn_cars(&data.car_types, &starting_track) else {
        warn!(track = %starting_track, "transport: failed to spawn cars");
        return None;
    };

    let spec = JobSpecification {
        origin: station_id.clone(),
        cars_per_track: vec![CarsPerTrack {
            track: starting_track,
            cars: cars.clone(),
        }],
        destination,
        cars: cars.clone(),
        cargo_per_car: data.cargo_per_car.into_iter().map(Some).collect(),
    };
    let chain = generate_with_existing_cars(
        env,
        spec,
        true,
        FollowOnPolicy::for_generated(JobKind::Transport),
        rng,
    );
    if chain.is_none() {
        env.discard_spawned(&cars);
    }
    chain
}
