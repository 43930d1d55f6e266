//! Content validation tests for the shipped yard data.
//!
//! These tests load the actual `content/*.json` files and check that the
//! network is workable: every cargo group has a loading machine, every
//! cargo fits some car type, and stations are far enough apart for
//! reclamation to clear abandoned cars while the player is elsewhere.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::sync::OnceLock;
use yard_core::{Licenses, TrackPool, YardContent};
use yard_world::{build_initial_stock, load_content};

/// Integration tests run from the crate directory, so we go up two levels.
fn content_dir() -> String {
    let manifest = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    format!("{manifest}/../../content")
}

fn load_test_content() -> &'static YardContent {
    static CONTENT: OnceLock<YardContent> = OnceLock::new();
    CONTENT.get_or_init(|| {
        load_content(&content_dir()).expect("load_content should succeed for production content")
    })
}

// =========================================================================
// Schema and ranges
// =========================================================================

#[test]
fn content_loads_successfully() {
    let content = load_test_content();
    assert!(!content.stations.is_empty());
    assert!(!content.content_version.is_empty());
}

#[test]
fn every_station_has_each_track_pool() {
    for station in &load_test_content().stations {
        for pool in [TrackPool::Storage, TrackPool::TransferIn, TrackPool::TransferOut] {
            assert!(
                station.tracks.iter().any(|t| t.pool == pool),
                "station {} has no {pool:?} track",
                station.id
            );
        }
    }
}

#[test]
fn station_car_caps_fit_license_caps() {
    let content = load_test_content();
    let cap = content.constants.licensing.max_cars(Licenses::ALL);
    for station in &content.stations {
        assert!(
            station.ruleset.max_cars_per_job as usize <= cap,
            "station {} allows more cars than any license",
            station.id
        );
    }
}

// =========================================================================
// Cross-references
// =========================================================================

#[test]
fn outbound_cargo_is_handled_by_a_machine() {
    for station in &load_test_content().stations {
        let handled: HashSet<_> = station
            .warehouse_machines
            .iter()
            .flat_map(|m| m.cargo_types.iter())
            .collect();
        for group in &station.ruleset.outbound {
            for cargo in &group.cargo_types {
                assert!(
                    handled.contains(cargo),
                    "{} ships {cargo} but no machine loads it",
                    station.id
                );
            }
        }
    }
}

#[test]
fn every_cargo_fits_a_wagon() {
    let cargo = &load_test_content().cargo;
    for def in &cargo.cargo_types {
        assert!(
            cargo
                .car_types
                .iter()
                .any(|car| !car.locomotive && def.containers.contains(&car.container)),
            "no wagon carries {}",
            def.id
        );
    }
}

#[test]
fn hazardous_groups_carry_their_cargo_licenses() {
    let content = load_test_content();
    for station in &content.stations {
        for group in station.ruleset.outbound.iter().chain(&station.ruleset.inbound) {
            let needed = content
                .cargo
                .cargo_types
                .iter()
                .filter(|def| group.cargo_types.contains(&def.id))
                .fold(Licenses::NONE, |acc, def| acc | def.licenses);
            assert!(
                group.licenses.contains(needed),
                "group {} is missing {:?}",
                group.id,
                needed.names()
            );
        }
    }
}

// =========================================================================
// Playability
// =========================================================================

#[test]
fn stations_are_beyond_delete_distance_of_each_other() {
    let content = load_test_content();
    let delete = content.constants.effective_delete_sqr_distance();
    for a in &content.stations {
        for b in content.stations.iter().filter(|b| b.id != a.id) {
            assert!(
                a.position.sqr_distance(b.position) > delete,
                "{} and {} are too close for reclamation",
                a.id,
                b.id
            );
        }
    }
}

#[test]
fn initial_stock_covers_every_station() {
    let content = load_test_content();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let stock = build_initial_stock(content, 3, &mut rng);
    for station in &content.stations {
        assert!(
            stock.iter().any(|car| station
                .tracks
                .iter()
                .any(|t| Some(&t.id) == car.track.as_ref())),
            "no cars at {}",
            station.id
        );
    }
}

// =========================================================================
// Loading errors
// =========================================================================

fn copy_content_to(dir: &std::path::Path) {
    for name in ["cargo.json", "stations.json", "constants.json"] {
        std::fs::copy(format!("{}/{name}", content_dir()), dir.join(name)).unwrap();
    }
}

#[test]
fn missing_file_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    copy_content_to(dir.path());
    std::fs::remove_file(dir.path().join("cargo.json")).unwrap();
    let err = load_content(dir.path().to_str().unwrap()).unwrap_err();
    assert!(format!("{err:#}").contains("reading cargo.json"), "{err:#}");
}

#[test]
fn malformed_file_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    copy_content_to(dir.path());
    std::fs::write(dir.path().join("stations.json"), "{ \"stations\": 3 }").unwrap();
    let err = load_content(dir.path().to_str().unwrap()).unwrap_err();
    assert!(format!("{err:#}").contains("parsing stations.json"), "{err:#}");
}

#[test]
fn constants_fall_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    copy_content_to(dir.path());
    std::fs::write(dir.path().join("constants.json"), "{}").unwrap();
    let content = load_content(dir.path().to_str().unwrap()).unwrap();
    assert_eq!(content.constants.station_jobs_per_visit, 2);
    assert!(content.constants.preserve_unabsorbed_cars);
}
