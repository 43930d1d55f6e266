use rand::Rng;
use tracing::{debug, warn};

use super::GenerationEnv;
use crate::chain::{FollowOnPolicy, JobChain};
use crate::host::Host;
use crate::sampling::{generate_base_cargo_train_data, pick, shuffled};
use crate::{
    CarId, CarType, JobDefinition, JobKind, JobPayload, JobState, StationDef, StationId, TrackId,
    TrackPool,
};

/// Stations other than `from` with an outbound group every car type could be
/// loaded for. Falls back to every other station when none qualifies.
fn destinations_for<'a, H: Host>(
    env: &GenerationEnv<'a, H>,
    from: &StationId,
    car_types: &[CarType],
) -> Vec<&'a StationDef> {
    let others: Vec<&'a StationDef> = env
        .content
        .stations
        .iter()
        .filter(|station| &station.id != from)
        .collect();
    let useful: Vec<&'a StationDef> = others
        .iter()
        .copied()
        .filter(|station| {
            station.ruleset.outbound.iter().any(|group| {
                car_types
                    .iter()
                    .all(|car_type| env.index.can_carry_any(car_type, &group.cargo_types))
            })
        })
        .collect();
    if useful.is_empty() {
        others
    } else {
        useful
    }
}

/// Builds an empty-haul chain sending `cars` from `station_id` to the storage
/// tracks of a station that can put them back to work.
pub fn generate_with_existing_cars<H: Host, R: Rng + ?Sized>(
    env: &mut GenerationEnv<'_, H>,
    station_id: &StationId,
    starting_track: TrackId,
    cars: Vec<CarId>,
    policy: FollowOnPolicy,
    rng: &mut R,
) -> Option<JobChain> {
    env.station(station_id)?;
    let car_types = env.car_types_of(&cars)?;
    let train_length = env.train_length(&car_types);

    let candidates = shuffled(&destinations_for(env, station_id, &car_types), rng);
    let Some((destination, destination_track)) = candidates.into_iter().find_map(|station| {
        env.destination_track(&station.id, TrackPool::Storage, train_length, rng)
            .map(|track| (station.id.clone(), track))
    }) else {
        warn!(station = %station_id, train_length, "empty haul: found no destination with enough free storage");
        return None;
    };

    let no_cargo = vec![None; cars.len()];
    let (bonus_time_limit, initial_wage) = env.haul_bonus_and_wage(
        JobKind::EmptyHaul,
        station_id,
        &destination,
        &car_types,
        &no_cargo,
    );
    let licenses = env.host.licenses_for_job_kind(JobKind::EmptyHaul)
        | env.host.licenses_for_car_count(cars.len());

    let definition = JobDefinition {
        id: env.next_job_id(JobKind::EmptyHaul),
        station: station_id.clone(),
        origin: station_id.clone(),
        destination,
        cars,
        car_types,
        payload: JobPayload::EmptyHaul {
            starting_track,
            destination_track,
        },
        bonus_time_limit,
        initial_wage,
        licenses,
        force_correct_cargo_state: true,
        state: JobState::Available,
    };
    debug!(job = %definition.id, from = %definition.origin, to = %definition.destination, "empty haul: built job");
    Some(env.chain_for(definition, policy, rng))
}

/// Spawns empty cars suited to a random outbound group of another station on
/// a transfer-out track of `station_id` and builds an empty haul for them.
pub fn generate_with_car_spawning<H: Host, R: Rng + ?Sized>(
    env: &mut GenerationEnv<'_, H>,
    station_id: &StationId,
    rng: &mut R,
) -> Option<JobChain> {
    let station = env.station(station_id)?;
    let partners: Vec<&StationDef> = env
        .content
        .stations
        .iter()
        .filter(|other| other.id != station.id && !other.ruleset.outbound.is_empty())
        .collect();
    let Some(partner) = pick(&partners, rng) else {
        warn!(station = %station_id, "empty haul: no station ships cargo");
        return None;
    };
    let group = pick(&partner.ruleset.outbound, rng)?;
    let data = generate_base_cargo_train_data(
        &station.ruleset,
        std::slice::from_ref(group),
        None,
        &*env.host,
        env.index,
        rng,
    )?;
    let train_length = env.train_length(&data.car_types);
    let Some(starting_track) =
        env.track_with_space(station_id, TrackPool::TransferOut, train_length, rng)
    else {
        warn!(station = %station_id, "empty haul: couldn't find starting track with enough free space for train");
        return None;
    };

    let Some(cars) = env.host.spawn_cars(&data.car_types, &starting_track) else {
        warn!(track = %starting_track, "empty haul: failed to spawn cars");
        return None;
    };
    let chain = generate_with_existing_cars(
        env,
        station_id,
        starting_track,
        cars.clone(),
        FollowOnPolicy::for_generated(JobKind::EmptyHaul),
        rng,
    );
    if chain.is_none() {
        env.discard_spawned(&cars);
    }
    chain
}
