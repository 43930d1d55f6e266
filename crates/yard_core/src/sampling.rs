//! Random synthesis of cargo trains for the car-spawning generators.

use std::ops::Range;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{error, warn};

use crate::host::LicenseProvider;
use crate::{CarType, CargoCapabilityIndex, CargoGroup, CargoType, JobsRuleset, Licenses, StationId};

/// Car and cargo types for a train that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct CargoTrainData {
    pub partners: Vec<StationId>,
    pub car_types: Vec<CarType>,
    pub cargo_per_car: Vec<CargoType>,
}

pub(crate) fn pick<'a, T, R: Rng + ?Sized>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    items.choose(rng)
}

pub(crate) fn shuffled<T: Clone, R: Rng + ?Sized>(items: &[T], rng: &mut R) -> Vec<T> {
    let mut out = items.to_vec();
    out.shuffle(rng);
    out
}

/// Splits `count` items into `parts` contiguous ranges; the first
/// `count % parts` ranges get one extra item.
pub fn split_evenly(count: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    let base = count / parts;
    let extra = count % parts;
    (0..parts)
        .map(|i| {
            let start = i * base + i.min(extra);
            let len = if i < extra { base + 1 } else { base };
            start..start + len
        })
        .collect()
}

/// Draws a car count from the ruleset and a cargo group from `groups`, then
/// per car a cargo of that group, a container supporting it and a car type
/// built on that container.
///
/// With `forced_license` set, the train is shaped so the player can take it:
/// the job-kind license must be held, only licensed groups are used and the
/// car count is capped at the licensed maximum.
pub fn generate_base_cargo_train_data<R: Rng + ?Sized>(
    ruleset: &JobsRuleset,
    groups: &[CargoGroup],
    forced_license: Option<Licenses>,
    licenses: &impl LicenseProvider,
    index: &CargoCapabilityIndex,
    rng: &mut R,
) -> Option<CargoTrainData> {
    let min = ruleset.min_cars_per_job.max(1) as usize;
    let max = (ruleset.max_cars_per_job as usize).max(min);
    let mut count = rng.gen_range(min..=max);

    let mut available: Vec<&CargoGroup> = groups.iter().collect();
    if let Some(kind_license) = forced_license {
        if !licenses.is_license_acquired(kind_license) {
            error!(license = %kind_license, "forced generation requested without the job license");
            return None;
        }
        available.retain(|group| licenses.is_license_acquired(group.licenses));
        count = count.min(licenses.max_cars_per_job());
    }
    let Some(group) = pick(&available, rng) else {
        warn!("no cargo group available for generation");
        return None;
    };
    if count == 0 || group.cargo_types.is_empty() {
        warn!(group = %group.id, "cargo group can't make a train");
        return None;
    }

    let mut car_types = Vec::with_capacity(count);
    let mut cargo_per_car = Vec::with_capacity(count);
    for _ in 0..count {
        let cargo = pick(&group.cargo_types, rng)?;
        let Some(container) = pick(index.container_types_for_cargo(cargo), rng) else {
            error!(%cargo, "cargo type has no supporting container");
            return None;
        };
        let Some(car_type) = pick(index.car_types_for_container(container), rng) else {
            error!(%container, "container type has no car type");
            return None;
        };
        car_types.push(car_type.clone());
        cargo_per_car.push(cargo.clone());
    }

    Some(CargoTrainData {
        partners: group.stations.clone(),
        car_types,
        cargo_per_car,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{base_content, make_rng, TestHost};

    #[test]
    fn split_gives_extras_to_first_ranges() {
        assert_eq!(split_evenly(7, 3), vec![0..3, 3..5, 5..7]);
        assert_eq!(split_evenly(2, 2), vec![0..1, 1..2]);
        assert!(split_evenly(3, 0).is_empty());
    }

    #[test]
    fn train_cars_always_carry_group_cargo() {
        let content = base_content();
        let index = CargoCapabilityIndex::build(&content.cargo);
        let host = TestHost::new(&content);
        let station = content.station(&StationId::from("A")).unwrap();
        let mut rng = make_rng();
        for _ in 0..20 {
            let data = generate_base_cargo_train_data(
                &station.ruleset,
                &station.ruleset.outbound,
                None,
                &host,
                &index,
                &mut rng,
            )
            .unwrap();
            let count = data.car_types.len();
            assert!(count >= station.ruleset.min_cars_per_job as usize);
            assert!(count <= station.ruleset.max_cars_per_job as usize);
            for (car_type, cargo) in data.car_types.iter().zip(&data.cargo_per_car) {
                assert!(index.cargo_types_for_car_type(car_type).contains(cargo));
            }
        }
    }

    #[test]
    fn forced_generation_needs_job_license() {
        let content = base_content();
        let index = CargoCapabilityIndex::build(&content.cargo);
        let mut host = TestHost::new(&content);
        host.licenses = Licenses::NONE;
        let station = content.station(&StationId::from("A")).unwrap();
        let mut rng = make_rng();
        let data = generate_base_cargo_train_data(
            &station.ruleset,
            &station.ruleset.outbound,
            Some(Licenses::SHUNTING),
            &host,
            &index,
            &mut rng,
        );
        assert!(data.is_none());
    }

    #[test]
    fn forced_generation_skips_unlicensed_groups_and_caps_cars() {
        let content = base_content();
        let index = CargoCapabilityIndex::build(&content.cargo);
        let mut host = TestHost::new(&content);
        host.licenses = Licenses::SHUNTING | Licenses::FREIGHT_HAUL;
        host.max_cars = 2;
        let station = content.station(&StationId::from("A")).unwrap();
        let mut rng = make_rng();
        for _ in 0..20 {
            let data = generate_base_cargo_train_data(
                &station.ruleset,
                &station.ruleset.outbound,
                Some(Licenses::SHUNTING),
                &host,
                &index,
                &mut rng,
            )
            .unwrap();
            assert!(data.car_types.len() <= 2);
            assert!(!data.cargo_per_car.contains(&CargoType::from("oil")));
        }
    }
}
