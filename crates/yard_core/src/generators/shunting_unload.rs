use std::collections::BTreeSet;

use rand::Rng;
use tracing::{debug, warn};

use super::GenerationEnv;
use crate::chain::{FollowOnPolicy, JobChain};
use crate::host::Host;
use crate::sampling::{generate_base_cargo_train_data, pick};
use crate::{
    CargoLoad, CarsPerTrack, ContainerType, JobDefinition, JobKind, JobPayload, JobSpecification,
    JobState, Licenses, StationId, TrackPool,
};

/// Builds a shunting-unload chain: the train waits on `spec.cars_per_track[0]`
/// at `spec.destination`, is unloaded there and its cars are split over the
/// destination's storage tracks. `spec.origin` is where the cargo came from.
pub fn generate_with_existing_cars<H: Host, R: Rng + ?Sized>(
    env: &mut GenerationEnv<'_, H>,
    spec: JobSpecification,
    force_correct_cargo_state: bool,
    policy: FollowOnPolicy,
    rng: &mut R,
) -> Option<JobChain> {
    env.station(&spec.origin)?;
    let station = env.station(&spec.destination)?;
    let car_types = env.car_types_of(&spec.cars)?;
    let Some(starting_track) = spec.cars_per_track.first().map(|cpt| cpt.track.clone()) else {
        warn!(station = %station.id, "unload: train has no starting track");
        return None;
    };
    let machine = env.pick_machine(station, &spec.cargo_per_car, rng)?;

    let max_tracks = station.ruleset.max_shunting_storage_tracks.max(1) as usize;
    let track_count = rng.gen_range(1..=max_tracks);
    let Some(split) = env.split_across_storage(&station.id, &car_types, track_count, rng) else {
        warn!(
            origin = %spec.origin,
            station = %station.id,
            "unload: found no storage track with enough free space"
        );
        return None;
    };
    let destination_tracks: Vec<CarsPerTrack> = split
        .into_iter()
        .map(|(range, track)| CarsPerTrack {
            track,
            cars: spec.cars[range].to_vec(),
        })
        .collect();

    let (bonus_time_limit, initial_wage) = env.shunting_bonus_and_wage(
        JobKind::ShuntingUnload,
        destination_tracks.len(),
        &car_types,
        &spec.cargo_per_car,
    );
    let containers: Vec<ContainerType> = car_types
        .iter()
        .filter_map(|car_type| env.index.container_of(car_type))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let licenses = env.host.licenses_for_job_kind(JobKind::ShuntingUnload)
        | env.host.licenses_for_container_types(&containers)
        | env.host.licenses_for_car_count(spec.cars.len());

    let mut unloads: Vec<CargoLoad> = Vec::new();
    for (car, cargo) in spec.cars.iter().zip(&spec.cargo_per_car) {
        let Some(cargo) = cargo else {
            continue;
        };
        let amount = env
            .host
            .car(car)
            .filter(|unit| unit.cargo.is_some())
            .map_or(1.0, |unit| unit.cargo_amount);
        match unloads.iter_mut().find(|load| &load.cargo == cargo) {
            Some(load) => {
                load.cars.push(car.clone());
                load.amount += amount;
            }
            None => unloads.push(CargoLoad {
                cargo: cargo.clone(),
                cars: vec![car.clone()],
                amount,
            }),
        }
    }

    let definition = JobDefinition {
        id: env.next_job_id(JobKind::ShuntingUnload),
        station: station.id.clone(),
        origin: spec.origin,
        destination: spec.destination,
        cars: spec.cars,
        car_types,
        payload: JobPayload::ShuntingUnload {
            starting_track,
            machine: machine.id.clone(),
            destination_tracks,
            unloads,
        },
        bonus_time_limit,
        initial_wage,
        licenses,
        force_correct_cargo_state,
        state: JobState::Available,
    };
    debug!(job = %definition.id, station = %definition.station, "unload: built job");
    Some(env.chain_for(definition, policy, rng))
}

/// Spawns a loaded train on a transfer-in track of `station_id`, as if it had
/// arrived from a partner station, and builds an unload chain for it.
pub fn generate_with_car_spawning<H: Host, R: Rng + ?Sized>(
    env: &mut GenerationEnv<'_, H>,
    station_id: &StationId,
    force_licenses: bool,
    rng: &mut R,
) -> Option<JobChain> {
    let station = env.station(station_id)?;
    let data = generate_base_cargo_train_data(
        &station.ruleset,
        &station.ruleset.inbound,
        force_licenses.then_some(Licenses::SHUNTING),
        &*env.host,
        env.index,
        rng,
    )?;
    let train_length = env.train_length(&data.car_types);

    let Some(starting_track) =
        env.track_with_space(station_id, TrackPool::TransferIn, train_length, rng)
    else {
        warn!(station = %station_id, "unload: couldn't find starting track with enough free space for train");
        return None;
    };
    let Some(origin) = pick(&data.partners, rng).cloned() else {
        warn!(station = %station_id, "unload: cargo group has no partner station");
        return None;
    };

    let Some(cars) = env.host.spawn_cars(&data.car_types, &starting_track) else {
        warn!(track = %starting_track, "unload: failed to spawn cars");
        return None;
    };

    let spec = JobSpecification {
        origin,
        cars_per_track: vec![CarsPerTrack {
            track: starting_track,
            cars: cars.clone(),
        }],
        destination: station_id.clone(),
        cars: cars.clone(),
        cargo_per_car: data.cargo_per_car.into_iter().map(Some).collect(),
    };
    let chain = generate_with_existing_cars(
        env,
        spec,
        true,
        FollowOnPolicy::for_generated(JobKind::ShuntingUnload),
        rng,
    );
    if chain.is_none() {
        env.discard_spawned(&cars);
    }
    chain
}
