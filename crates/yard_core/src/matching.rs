use std::collections::BTreeMap;

use tracing::debug;

use crate::host::CarRegistry;
use crate::{
    CargoCapabilityIndex, CargoDirection, CargoGroup, CargoGroupId, RollingStockUnit, StationId,
    TrainsetCluster, YardContent,
};

pub type ClustersPerStation = BTreeMap<StationId, Vec<TrainsetCluster>>;

fn cluster_cars<'a>(
    registry: &'a impl CarRegistry,
    cluster: &TrainsetCluster,
) -> Vec<&'a RollingStockUnit> {
    cluster
        .cars
        .iter()
        .filter_map(|id| registry.car(id))
        .collect()
}

fn matching_ids(
    groups: &[CargoGroup],
    mut fits: impl FnMut(&CargoGroup) -> bool,
) -> Vec<CargoGroupId> {
    groups
        .iter()
        .filter(|group| fits(group))
        .map(|group| group.id.clone())
        .collect()
}

/// Fills each empty cluster with the outbound groups every one of its cars
/// could be loaded for.
pub fn populate_empty_groups(
    clusters: &mut ClustersPerStation,
    registry: &impl CarRegistry,
    content: &YardContent,
    index: &CargoCapabilityIndex,
) {
    for (station_id, station_clusters) in clusters.iter_mut() {
        let Some(station) = content.station(station_id) else {
            continue;
        };
        for cluster in station_clusters.iter_mut() {
            let cars = cluster_cars(registry, cluster);
            cluster.groups = matching_ids(&station.ruleset.outbound, |group| {
                !cars.is_empty()
                    && cars
                        .iter()
                        .all(|car| index.can_carry_any(&car.car_type, &group.cargo_types))
            });
            cluster.direction = (!cluster.groups.is_empty()).then_some(CargoDirection::Outbound);
        }
    }
}

/// Fills each loaded cluster with the groups whose cargo list holds every car's
/// current cargo. Outbound groups are tried first, then inbound.
pub fn populate_loaded_groups(
    clusters: &mut ClustersPerStation,
    registry: &impl CarRegistry,
    content: &YardContent,
) {
    for (station_id, station_clusters) in clusters.iter_mut() {
        let Some(station) = content.station(station_id) else {
            continue;
        };
        for cluster in station_clusters.iter_mut() {
            let cars = cluster_cars(registry, cluster);
            let carried_by = |group: &CargoGroup| {
                !cars.is_empty()
                    && cars.iter().all(|car| {
                        car.cargo
                            .as_ref()
                            .is_some_and(|cargo| group.cargo_types.contains(cargo))
                    })
            };
            let outbound = matching_ids(&station.ruleset.outbound, carried_by);
            if !outbound.is_empty() {
                cluster.groups = outbound;
                cluster.direction = Some(CargoDirection::Outbound);
                continue;
            }
            let inbound = matching_ids(&station.ruleset.inbound, carried_by);
            cluster.direction = (!inbound.is_empty()).then_some(CargoDirection::Inbound);
            cluster.groups = inbound;
        }
    }
}

/// Removes clusters no cargo group accepted and returns them per station.
pub fn extract_empty_haul_sets(clusters: &mut ClustersPerStation) -> ClustersPerStation {
    let mut extracted = ClustersPerStation::new();
    for (station, station_clusters) in clusters.iter_mut() {
        let (unmatched, matched): (Vec<_>, Vec<_>) = std::mem::take(station_clusters)
            .into_iter()
            .partition(|cluster| cluster.groups.is_empty());
        *station_clusters = matched;
        if !unmatched.is_empty() {
            debug!(%station, count = unmatched.len(), "trainsets matched no cargo group");
            extracted.insert(station.clone(), unmatched);
        }
    }
    clusters.retain(|_, station_clusters| !station_clusters.is_empty());
    extracted
}

/// Splits matched clusters by the ruleset half they matched.
pub fn take_direction(
    clusters: &mut ClustersPerStation,
    direction: CargoDirection,
) -> ClustersPerStation {
    let mut taken = ClustersPerStation::new();
    for (station, station_clusters) in clusters.iter_mut() {
        let (hit, rest): (Vec<_>, Vec<_>) = std::mem::take(station_clusters)
            .into_iter()
            .partition(|cluster| cluster.direction == Some(direction));
        *station_clusters = rest;
        if !hit.is_empty() {
            taken.insert(station.clone(), hit);
        }
    }
    clusters.retain(|_, station_clusters| !station_clusters.is_empty());
    taken
}
