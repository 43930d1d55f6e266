//! Greedy bundling of matched trainsets into job specifications.

use rand::Rng;
use tracing::{debug, error};

use crate::host::{CarRegistry, LicenseProvider};
use crate::matching::ClustersPerStation;
use crate::sampling::pick;
use crate::{
    CarId, CargoCapabilityIndex, CargoDirection, CargoGroup, CargoGroupId, CargoType,
    CarsPerTrack, JobSpecification, StationDef, TrackId, TrainsetCluster, YardContent,
};

/// Builds shunting-load specifications from empty clusters.
///
/// Per station, bundles are assembled from up to `T` trainsets (one storage
/// track each), taking candidates from the back of the list and cycling
/// rejected ones to the front. The first bundle whose first trainset can be
/// licensed switches into license-fulfilling mode: only licensed groups count
/// and the bundle may not grow past the licensed car cap.
pub fn plan_shunting_load_jobs<H, R>(
    clusters_per_station: ClustersPerStation,
    host: &H,
    content: &YardContent,
    index: &CargoCapabilityIndex,
    rng: &mut R,
) -> Vec<JobSpecification>
where
    H: CarRegistry + LicenseProvider,
    R: Rng + ?Sized,
{
    let max_cars_licensed = host.max_cars_per_job();
    let mut specs = Vec::new();

    for (station_id, mut candidates) in clusters_per_station {
        let Some(station) = content.station(&station_id) else {
            continue;
        };
        let mut has_fulfilled_licenses = false;

        while !candidates.is_empty() {
            let Some(bundle) = assemble_bundle(
                &mut candidates,
                station,
                host,
                max_cars_licensed,
                has_fulfilled_licenses,
                rng,
            ) else {
                debug!(station = %station_id, left = candidates.len(), "no further bundles at station");
                break;
            };
            has_fulfilled_licenses |= bundle.fulfilling;

            let groups: Vec<&CargoGroup> = bundle
                .groups
                .iter()
                .filter_map(|id| station.ruleset.group(id))
                .collect();
            let Some(group) = pick(&groups, rng).copied() else {
                break;
            };
            let Some(destination) = pick(&group.stations, rng) else {
                error!(group = %group.id, "cargo group lists no partner stations");
                continue;
            };

            let cars_per_track = cars_per_track(host, &bundle.cars);
            let cargo_per_car = bundle
                .cars
                .iter()
                .map(|id| cargo_for_car(host, index, id, group, rng))
                .collect();
            specs.push(JobSpecification {
                origin: station_id.clone(),
                cars_per_track,
                destination: destination.clone(),
                cars: bundle.cars,
                cargo_per_car,
            });
        }
    }

    specs
}

struct Bundle {
    cars: Vec<CarId>,
    groups: Vec<CargoGroupId>,
    fulfilling: bool,
}

fn licensed_groups(
    station: &StationDef,
    groups: &[CargoGroupId],
    licenses: &impl LicenseProvider,
) -> Vec<CargoGroupId> {
    groups
        .iter()
        .filter(|id| {
            station
                .ruleset
                .group(id)
                .is_some_and(|group| licenses.is_license_acquired(group.licenses))
        })
        .cloned()
        .collect()
}

fn intersect(a: &[CargoGroupId], b: &[CargoGroupId]) -> Vec<CargoGroupId> {
    a.iter().filter(|id| b.contains(id)).cloned().collect()
}

fn assemble_bundle<R: Rng + ?Sized>(
    candidates: &mut Vec<TrainsetCluster>,
    station: &StationDef,
    licenses: &impl LicenseProvider,
    max_cars_licensed: usize,
    has_fulfilled_licenses: bool,
    rng: &mut R,
) -> Option<Bundle> {
    let max_tracks = station.ruleset.max_shunting_storage_tracks.max(1);
    let mut tracks_left = rng.gen_range(1..=max_tracks);
    let mut tries_left = candidates.len();
    let mut cars: Vec<CarId> = Vec::new();
    let mut groups: Vec<CargoGroupId> = Vec::new();
    let mut fulfilling = false;

    while tracks_left > 0 && tries_left > 0 {
        tries_left -= 1;
        let Some(candidate) = candidates.last() else {
            break;
        };
        let licensed = licensed_groups(station, &candidate.groups, licenses);

        if cars.is_empty() {
            fulfilling = !has_fulfilled_licenses
                && !licensed.is_empty()
                && candidate.cars.len() <= max_cars_licensed;
        } else {
            let license_misfit = fulfilling
                && (licensed.is_empty()
                    || intersect(&groups, &licensed).is_empty()
                    || cars.len() + candidate.cars.len() > max_cars_licensed);
            let group_misfit = intersect(&groups, &candidate.groups).is_empty();
            if license_misfit || group_misfit {
                candidates.rotate_right(1);
                continue;
            }
        }

        let Some(candidate) = candidates.pop() else {
            break;
        };
        let usable = if fulfilling { licensed } else { candidate.groups };
        groups = if cars.is_empty() {
            usable
        } else {
            intersect(&groups, &usable)
        };
        cars.extend(candidate.cars);
        tracks_left -= 1;
    }

    if cars.is_empty() || groups.is_empty() {
        return None;
    }
    Some(Bundle {
        cars,
        groups,
        fulfilling,
    })
}

/// Cars grouped by their current track, tracks in first-appearance order.
fn cars_per_track(registry: &impl CarRegistry, cars: &[CarId]) -> Vec<CarsPerTrack> {
    let mut grouped: Vec<CarsPerTrack> = Vec::new();
    for id in cars {
        let Some(track) = registry.car(id).and_then(|car| car.track.clone()) else {
            error!(car = %id, "car planned for shunting is not on a track");
            continue;
        };
        match grouped.iter_mut().find(|cpt| cpt.track == track) {
            Some(cpt) => cpt.cars.push(id.clone()),
            None => grouped.push(CarsPerTrack {
                track,
                cars: vec![id.clone()],
            }),
        }
    }
    grouped
}

fn cargo_for_car<R: Rng + ?Sized>(
    registry: &impl CarRegistry,
    index: &CargoCapabilityIndex,
    id: &CarId,
    group: &CargoGroup,
    rng: &mut R,
) -> Option<CargoType> {
    let car = registry.car(id)?;
    let compatible = index.compatible_cargo(&car.car_type, &group.cargo_types);
    if compatible.is_empty() {
        error!(
            car = %id,
            car_type = %car.car_type,
            group = %group.id,
            "car has no cargo type in common with its cargo group"
        );
        return None;
    }
    pick(&compatible, rng).cloned()
}

/// One specification per loaded trainset: a random compatible group, a
/// random partner of that group, the first car's track as the start and each
/// car's current cargo.
///
/// For outbound clusters the assigned station is the origin and the partner
/// the destination. For inbound clusters the partner becomes the origin and
/// the assigned station the destination.
pub fn plan_loaded_jobs<R: Rng + ?Sized>(
    clusters_per_station: ClustersPerStation,
    registry: &impl CarRegistry,
    content: &YardContent,
    rng: &mut R,
) -> Vec<JobSpecification> {
    let mut specs = Vec::new();
    for (station_id, clusters) in clusters_per_station {
        let Some(station) = content.station(&station_id) else {
            continue;
        };
        for cluster in clusters {
            let Some(direction) = cluster.direction else {
                continue;
            };
            let groups: Vec<&CargoGroup> = cluster
                .groups
                .iter()
                .filter_map(|id| station.ruleset.group(id))
                .collect();
            let Some(group) = pick(&groups, rng) else {
                continue;
            };
            let Some(partner) = pick(&group.stations, rng) else {
                error!(group = %group.id, "cargo group lists no partner stations");
                continue;
            };
            let Some(start) = first_track(registry, &cluster.cars) else {
                error!(station = %station_id, "loaded trainset is not on a track");
                continue;
            };
            let cargo_per_car = cluster
                .cars
                .iter()
                .map(|id| registry.car(id).and_then(|car| car.cargo.clone()))
                .collect();
            let (origin, destination) = match direction {
                CargoDirection::Outbound => (station_id.clone(), partner.clone()),
                CargoDirection::Inbound => (partner.clone(), station_id.clone()),
            };
            specs.push(JobSpecification {
                origin,
                cars_per_track: vec![CarsPerTrack {
                    track: start,
                    cars: cluster.cars.clone(),
                }],
                destination,
                cars: cluster.cars,
                cargo_per_car,
            });
        }
    }
    specs
}

fn first_track(registry: &impl CarRegistry, cars: &[CarId]) -> Option<TrackId> {
    cars.first()
        .and_then(|id| registry.car(id))
        .and_then(|car| car.track.clone())
}
