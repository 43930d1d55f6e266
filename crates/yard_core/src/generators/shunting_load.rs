use rand::Rng;
use tracing::{debug, warn};

use super::GenerationEnv;
use crate::chain::{FollowOnPolicy, JobChain};
use crate::host::Host;
use crate::sampling::{generate_base_cargo_train_data, shuffled};
use crate::{
    CarId, CargoLoad, CargoType, CarsPerTrack, JobDefinition, JobKind, JobPayload,
    JobSpecification, JobState, Licenses, StationId, TrackPool,
};

/// Cars grouped per cargo type in first-appearance order, one unit of cargo
/// per car.
pub(crate) fn loads_per_cargo(cars: &[CarId], cargo: &[Option<CargoType>]) -> Vec<CargoLoad> {
    let mut loads: Vec<CargoLoad> = Vec::new();
    for (car, cargo) in cars.iter().zip(cargo) {
        let Some(cargo) = cargo else {
            continue;
        };
        match loads.iter_mut().find(|load| &load.cargo == cargo) {
            Some(load) => {
                load.cars.push(car.clone());
                load.amount += 1.0;
            }
            None => loads.push(CargoLoad {
                cargo: cargo.clone(),
                cars: vec![car.clone()],
                amount: 1.0,
            }),
        }
    }
    loads
}

/// Builds a shunting-load chain that loads `spec.cars` at `spec.origin` and
/// stages them on one of its transfer-out tracks.
pub fn generate_with_existing_cars<H: Host, R: Rng + ?Sized>(
    env: &mut GenerationEnv<'_, H>,
    spec: JobSpecification,
    force_correct_cargo_state: bool,
    policy: FollowOnPolicy,
    rng: &mut R,
) -> Option<JobChain> {
    let station = env.station(&spec.origin)?;
    let car_types = env.car_types_of(&spec.cars)?;
    let machine = env.pick_machine(station, &spec.cargo_per_car, rng)?;

    let train_length = env.train_length(&car_types);
    let Some(destination_track) =
        env.destination_track(&station.id, TrackPool::TransferOut, train_length, rng)
    else {
        warn!(
            origin = %spec.origin,
            destination = %spec.destination,
            train_length,
            "load: found no transfer-out track with enough free space"
        );
        return None;
    };

    let (bonus_time_limit, initial_wage) = env.shunting_bonus_and_wage(
        JobKind::ShuntingLoad,
        spec.cars_per_track.len(),
        &car_types,
        &spec.cargo_per_car,
    );
    let licenses = env.licenses_for(JobKind::ShuntingLoad, &spec.cargo_per_car, spec.cars.len());
    let loads = loads_per_cargo(&spec.cars, &spec.cargo_per_car);

    let definition = JobDefinition {
        id: env.next_job_id(JobKind::ShuntingLoad),
        station: spec.origin.clone(),
        origin: spec.origin,
        destination: spec.destination,
        cars: spec.cars,
        car_types,
        payload: JobPayload::ShuntingLoad {
            starting_tracks: spec.cars_per_track,
            machine: machine.id.clone(),
            destination_track,
            loads,
        },
        bonus_time_limit,
        initial_wage,
        licenses,
        force_correct_cargo_state,
        state: JobState::Available,
    };
    debug!(job = %definition.id, station = %definition.station, "load: built job");
    Some(env.chain_for(definition, policy, rng))
}

/// Spawns an empty train split over the station's storage tracks and builds
/// a shunting-load chain for it. Every spawned car is deleted again if the
/// job can't be built.
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
        force_licenses.then_some(Licenses::SHUNTING),
        &*env.host,
        env.index,
        rng,
    )?;

    let max_tracks = station.ruleset.max_shunting_storage_tracks.max(1) as usize;
    let track_count = rng.gen_range(1..=max_tracks);
    let split = env.split_across_storage(station_id, &data.car_types, track_count, rng)?;

    let train_length = env.train_length(&data.car_types);
    let Some((destination, _)) = shuffled(&data.partners, rng)
        .into_iter()
        .find_map(|partner| {
            env.free_unoccupied_track(&partner, TrackPool::TransferIn, train_length, rng)
                .map(|track| (partner, track))
        })
    else {
        warn!(station = %station_id, "load: couldn't find a station with enough free space for train");
        return None;
    };

    let mut spawned: Vec<CarId> = Vec::with_capacity(data.car_types.len());
    let mut cars_per_track = Vec::with_capacity(split.len());
    for (range, track) in split {
        let Some(cars) = env.host.spawn_cars(&data.car_types[range], &track) else {
            warn!(%track, "load: failed to spawn cars");
            env.discard_spawned(&spawned);
            return None;
        };
        spawned.extend(cars.iter().cloned());
        cars_per_track.push(CarsPerTrack { track, cars });
    }

    let spec = JobSpecification {
        origin: station_id.clone(),
        cars_per_track,
        destination,
        cars: spawned.clone(),
        cargo_per_car: data.cargo_per_car.into_iter().map(Some).collect(),
    };
    let chain = generate_with_existing_cars(
        env,
        spec,
        true,
        FollowOnPolicy::for_generated(JobKind::ShuntingLoad),
        rng,
    );
    if chain.is_none() {
        env.discard_spawned(&spawned);
    }
    chain
}
