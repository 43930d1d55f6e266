//! Content loading and initial rolling stock shared between yard_cli and yard_daemon.

mod overrides;

pub use overrides::apply_overrides;

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;
use yard_core::{
    CarId, CargoTables, Constants, RollingStockUnit, StationDef, TrackPool, TrainsetId, YardContent,
};

#[derive(Deserialize)]
struct StationsFile {
    content_version: String,
    stations: Vec<StationDef>,
}

fn read_json<T: serde::de::DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let text = std::fs::read_to_string(dir.join(name)).with_context(|| format!("reading {name}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {name}"))
}

/// Checks cross-references in loaded content.
///
/// Catches mistakes like a cargo group naming an unknown cargo, a partner
/// station that doesn't exist, or two tracks sharing an id.
pub fn validate_content(content: &YardContent) -> Result<()> {
    let cargo = &content.cargo;
    let cargo_ids: HashSet<&str> = cargo.cargo_types.iter().map(|c| c.id.0.as_str()).collect();
    let containers: HashSet<&str> = cargo
        .car_types
        .iter()
        .map(|c| c.container.0.as_str())
        .collect();
    let station_ids: HashSet<&str> = content.stations.iter().map(|s| s.id.0.as_str()).collect();
    if station_ids.len() != content.stations.len() {
        bail!("station ids are not unique");
    }

    for car_type in &cargo.car_types {
        if car_type.length_m <= 0.0 {
            bail!("car type '{}' has non-positive length", car_type.id);
        }
    }
    for cargo_type in &cargo.cargo_types {
        for container in &cargo_type.containers {
            if !containers.contains(container.0.as_str()) {
                bail!(
                    "cargo '{}' container '{}' is not used by any car type",
                    cargo_type.id,
                    container
                );
            }
        }
    }

    let mut track_ids = HashSet::new();
    for station in &content.stations {
        let ruleset = &station.ruleset;
        if ruleset.max_cars_per_job == 0 || ruleset.min_cars_per_job > ruleset.max_cars_per_job {
            bail!(
                "station '{}' car range {}..={} is empty",
                station.id,
                ruleset.min_cars_per_job,
                ruleset.max_cars_per_job
            );
        }
        for track in &station.tracks {
            if !track_ids.insert(track.id.0.as_str()) {
                bail!("track '{}' is defined more than once", track.id);
            }
            if track.length_m <= 0.0 {
                bail!("track '{}' has non-positive length", track.id);
            }
        }
        for group in ruleset.inbound.iter().chain(&ruleset.outbound) {
            for cargo_type in &group.cargo_types {
                if !cargo_ids.contains(cargo_type.0.as_str()) {
                    bail!("cargo group '{}' cargo '{}' is not a known cargo", group.id, cargo_type);
                }
            }
            if group.stations.is_empty() {
                bail!("cargo group '{}' lists no partner stations", group.id);
            }
            for partner in &group.stations {
                if !station_ids.contains(partner.0.as_str()) || partner == &station.id {
                    bail!("cargo group '{}' partner '{}' is not a known other station", group.id, partner);
                }
            }
        }
        for machine in &station.warehouse_machines {
            if station.tracks.iter().any(|t| t.id == machine.track) {
                bail!(
                    "warehouse machine '{}' track '{}' is also a pool track",
                    machine.id,
                    machine.track
                );
            }
            for cargo_type in &machine.cargo_types {
                if !cargo_ids.contains(cargo_type.0.as_str()) {
                    bail!("warehouse machine '{}' cargo '{}' is not a known cargo", machine.id, cargo_type);
                }
            }
        }
    }
    Ok(())
}

pub fn load_content(content_dir: &str) -> Result<YardContent> {
    let dir = Path::new(content_dir);
    let constants: Constants = read_json(dir, "constants.json")?;
    let cargo: CargoTables = read_json(dir, "cargo.json")?;
    let stations_file: StationsFile = read_json(dir, "stations.json")?;
    let content = YardContent {
        content_version: stations_file.content_version,
        cargo,
        stations: stations_file.stations,
        constants,
    };
    validate_content(&content).context("validating content")?;
    info!(
        version = %content.content_version,
        stations = content.stations.len(),
        "loaded content"
    );
    Ok(content)
}

/// Scatters idle trainsets over every station's storage tracks, as if left
/// behind by earlier players. Some are still loaded with a cargo the station
/// ships or receives.
pub fn build_initial_stock(
    content: &YardContent,
    trainsets_per_station: u32,
    rng: &mut impl Rng,
) -> Vec<RollingStockUnit> {
    let wagons: Vec<_> = content
        .cargo
        .car_types
        .iter()
        .filter(|c| !c.locomotive)
        .collect();
    let mut stock = Vec::new();
    let mut trainset_counter = 1u64;
    for station in &content.stations {
        let storage: Vec<_> = station
            .tracks
            .iter()
            .filter(|t| t.pool == TrackPool::Storage)
            .collect();
        for _ in 0..trainsets_per_station {
            let (Some(track), Some(wagon)) = (storage.choose(rng), wagons.choose(rng)) else {
                continue;
            };
            let cargo = station
                .ruleset
                .inbound
                .iter()
                .chain(&station.ruleset.outbound)
                .flat_map(|g| g.cargo_types.iter())
                .filter(|cargo| {
                    content.cargo.cargo_types.iter().any(|def| {
                        &def.id == *cargo && def.containers.contains(&wagon.container)
                    })
                })
                .collect::<Vec<_>>()
                .choose(rng)
                .map(|cargo| (*cargo).clone())
                .filter(|_| rng.gen_bool(0.3));
            let trainset = TrainsetId(format!("ts_{trainset_counter:04}"));
            trainset_counter += 1;
            for _ in 0..rng.gen_range(1..=3) {
                stock.push(RollingStockUnit {
                    id: CarId(format!("car_{:05}", stock.len() + 1)),
                    car_type: wagon.id.clone(),
                    track: Some(track.id.clone()),
                    cargo_amount: if cargo.is_some() { 1.0 } else { 0.0 },
                    cargo: cargo.clone(),
                    trainset: trainset.clone(),
                    player_spawned: false,
                    position: station.position,
                });
            }
        }
    }
    stock
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use yard_core::test_fixtures::base_content;
    use yard_core::{CargoType, StationId, TrackId};

    #[test]
    fn test_fixture_content_passes_validation() {
        validate_content(&base_content()).unwrap();
    }

    #[test]
    fn test_unknown_partner_station_errors() {
        let mut content = base_content();
        content.stations[0].ruleset.outbound[0].stations = vec![StationId::from("Nowhere")];
        let err = validate_content(&content).unwrap_err().to_string();
        assert!(err.contains("is not a known other station"), "{err}");
    }

    #[test]
    fn test_self_partner_errors() {
        let mut content = base_content();
        content.stations[0].ruleset.outbound[0].stations = vec![StationId::from("A")];
        assert!(validate_content(&content).is_err());
    }

    #[test]
    fn test_unknown_group_cargo_errors() {
        let mut content = base_content();
        content.stations[1].ruleset.inbound[0].cargo_types.push(CargoType::from("ghost"));
        let err = validate_content(&content).unwrap_err().to_string();
        assert!(err.contains("'B-grain'"), "{err}");
        assert!(err.contains("not a known cargo"), "{err}");
    }

    #[test]
    fn test_duplicate_track_errors() {
        let mut content = base_content();
        content.stations[1].tracks[0].id = TrackId::from("A-S1");
        let err = validate_content(&content).unwrap_err().to_string();
        assert!(err.contains("defined more than once"), "{err}");
    }

    #[test]
    fn test_machine_on_pool_track_errors() {
        let mut content = base_content();
        content.stations[0].warehouse_machines[0].track = TrackId::from("A-S1");
        assert!(validate_content(&content).is_err());
    }

    #[test]
    fn test_empty_car_range_errors() {
        let mut content = base_content();
        content.stations[2].ruleset.min_cars_per_job = 9;
        let err = validate_content(&content).unwrap_err().to_string();
        assert!(err.contains("car range"), "{err}");
    }

    #[test]
    fn test_initial_stock_stands_on_storage_tracks() {
        let content = base_content();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let stock = build_initial_stock(&content, 4, &mut rng);
        assert!(stock.len() >= 12);
        let storage: HashSet<&TrackId> = content
            .stations
            .iter()
            .flat_map(|s| s.tracks.iter())
            .filter(|t| t.pool == TrackPool::Storage)
            .map(|t| &t.id)
            .collect();
        let mut ids = HashSet::new();
        for car in &stock {
            assert!(storage.contains(car.track.as_ref().unwrap()));
            assert!(ids.insert(car.id.clone()), "duplicate car id {}", car.id);
            assert_ne!(car.car_type.0, "shunter");
        }
        // Loaded cars carry something their station trades.
        for car in stock.iter().filter(|c| c.cargo.is_some()) {
            let station = content
                .stations
                .iter()
                .find(|s| s.tracks.iter().any(|t| Some(&t.id) == car.track.as_ref()))
                .unwrap();
            let cargo = car.cargo.as_ref().unwrap();
            assert!(station
                .ruleset
                .inbound
                .iter()
                .chain(&station.ruleset.outbound)
                .any(|g| g.cargo_types.contains(cargo)));
        }
    }
}
