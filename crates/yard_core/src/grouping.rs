use std::collections::BTreeMap;

use tracing::debug;

use crate::host::CarRegistry;
use crate::{CarId, StationId, TrainsetCluster, TrainsetId, YardContent};

/// Partitions cars by the trainset they are coupled into. Cars the registry
/// does not know are skipped. Car order inside each trainset follows `cars`.
pub fn group_by_trainset(
    registry: &impl CarRegistry,
    cars: &[CarId],
) -> BTreeMap<TrainsetId, Vec<CarId>> {
    let mut groups: BTreeMap<TrainsetId, Vec<CarId>> = BTreeMap::new();
    for id in cars {
        let Some(car) = registry.car(id) else {
            debug!(car = %id, "skipping unknown car while grouping");
            continue;
        };
        groups
            .entry(car.trainset.clone())
            .or_default()
            .push(id.clone());
    }
    groups
}

/// Assigns every trainset to the closest station within `sqr_threshold`.
///
/// The first car of a trainset stands in for all of it. Trainsets farther
/// than the threshold from every station are dropped.
pub fn assign_to_nearest_station(
    registry: &impl CarRegistry,
    content: &YardContent,
    groups: BTreeMap<TrainsetId, Vec<CarId>>,
    sqr_threshold: f32,
) -> BTreeMap<StationId, Vec<TrainsetCluster>> {
    let mut per_station: BTreeMap<StationId, Vec<TrainsetCluster>> = BTreeMap::new();
    for (trainset, cars) in groups {
        let Some(representative) = cars.first().and_then(|id| registry.car(id)) else {
            continue;
        };
        let mut closest: Option<(&StationId, f32)> = None;
        for station in &content.stations {
            let sqr = representative.position.sqr_distance(station.position);
            if sqr >= sqr_threshold {
                continue;
            }
            if closest.map_or(true, |(_, best)| sqr < best) {
                closest = Some((&station.id, sqr));
            }
        }
        match closest {
            Some((station, _)) => per_station
                .entry(station.clone())
                .or_default()
                .push(TrainsetCluster::new(cars)),
            None => debug!(%trainset, "trainset is too far from every station"),
        }
    }
    per_station
}
