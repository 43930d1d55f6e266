//! Shared test fixtures for yard_core and downstream crates.
//!
//! `base_content()` provides three stations (a grain yard, a mill and a
//! refinery) with enough tracks, cargo groups and warehouse machines to
//! exercise every job kind. `TestHost` is an in-memory host with knobs for
//! licenses, player presence and injected failures.

use std::collections::{BTreeMap, BTreeSet};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::host::{
    CarRegistry, LicenseProvider, PaymentCalculator, PersistenceStore, Spawner, TrackOccupancy,
    UnusedCarTracker,
};
use crate::{
    CarId, CarType, CarTypeDef, CargoGroup, CargoGroupId, CargoTables, CargoType, CargoTypeDef,
    Constants, ContainerType, ContainerTypeDef, EngineError, JobKind, JobsRuleset, Licenses,
    MachineId, PaymentData, Position, RollingStockUnit, StationDef, StationId, TrackDef, TrackId,
    TrackPool, TrainsetId, WarehouseMachineDef, YardContent,
};

fn car_type(id: &str, container: &str, length_m: f32, locomotive: bool) -> CarTypeDef {
    CarTypeDef {
        id: CarType::from(id),
        container: ContainerType::from(container),
        length_m,
        locomotive,
    }
}

fn cargo(id: &str, container: &str, licenses: Licenses) -> CargoTypeDef {
    CargoTypeDef {
        id: CargoType::from(id),
        containers: vec![ContainerType::from(container)],
        licenses,
    }
}

fn track(id: &str, pool: TrackPool, length_m: f32) -> TrackDef {
    TrackDef {
        id: TrackId::from(id),
        pool,
        length_m,
    }
}

fn group(id: &str, cargo_types: &[&str], stations: &[&str], licenses: Licenses) -> CargoGroup {
    CargoGroup {
        id: CargoGroupId::from(id),
        cargo_types: cargo_types.iter().map(|c| CargoType::from(*c)).collect(),
        stations: stations.iter().map(|s| StationId::from(*s)).collect(),
        licenses,
    }
}

fn machine(id: &str, track: &str, cargo_types: &[&str]) -> WarehouseMachineDef {
    WarehouseMachineDef {
        id: MachineId::from(id),
        track: TrackId::from(track),
        cargo_types: cargo_types.iter().map(|c| CargoType::from(*c)).collect(),
    }
}

fn ruleset(inbound: Vec<CargoGroup>, outbound: Vec<CargoGroup>) -> JobsRuleset {
    JobsRuleset {
        min_cars_per_job: 1,
        max_cars_per_job: 5,
        max_shunting_storage_tracks: 2,
        inbound,
        outbound,
    }
}

/// Three stations: A "Harvest Yard" ships grain to B and oil to C and
/// receives tools from B; B "Mill" ships tools back; C "Refinery" trades oil
/// with A. Oil needs Hazmat1.
pub fn base_content() -> YardContent {
    YardContent {
        content_version: "test".to_string(),
        cargo: CargoTables {
            car_types: vec![
                car_type("hopper", "hopper", 14.0, false),
                car_type("boxcar", "boxcar", 16.0, false),
                car_type("tanker", "tank", 18.0, false),
                car_type("shunter", "none", 8.0, true),
            ],
            container_types: vec![ContainerTypeDef {
                id: ContainerType::from("tank"),
                licenses: Licenses::NONE,
            }],
            cargo_types: vec![
                cargo("grain", "hopper", Licenses::NONE),
                cargo("coal", "hopper", Licenses::NONE),
                cargo("tools", "boxcar", Licenses::NONE),
                cargo("oil", "tank", Licenses::HAZMAT1),
            ],
        },
        stations: vec![
            StationDef {
                id: StationId::from("A"),
                name: "Harvest Yard".to_string(),
                position: Position::new(0.0, 0.0, 0.0),
                ruleset: ruleset(
                    vec![group("A-tools", &["tools"], &["B"], Licenses::NONE)],
                    vec![
                        group("A-grain", &["grain"], &["B"], Licenses::NONE),
                        group("A-oil", &["oil"], &["C"], Licenses::HAZMAT1),
                    ],
                ),
                tracks: vec![
                    track("A-S1", TrackPool::Storage, 120.0),
                    track("A-S2", TrackPool::Storage, 80.0),
                    track("A-S3", TrackPool::Storage, 200.0),
                    track("A-I1", TrackPool::TransferIn, 150.0),
                    track("A-O1", TrackPool::TransferOut, 150.0),
                ],
                warehouse_machines: vec![machine("A-M1", "A-L1", &["grain", "oil", "tools"])],
            },
            StationDef {
                id: StationId::from("B"),
                name: "Mill".to_string(),
                position: Position::new(1000.0, 0.0, 0.0),
                ruleset: ruleset(
                    vec![group("B-grain", &["grain"], &["A"], Licenses::NONE)],
                    vec![group("B-tools", &["tools"], &["A"], Licenses::NONE)],
                ),
                tracks: vec![
                    track("B-S1", TrackPool::Storage, 150.0),
                    track("B-S2", TrackPool::Storage, 150.0),
                    track("B-I1", TrackPool::TransferIn, 200.0),
                    track("B-O1", TrackPool::TransferOut, 200.0),
                ],
                warehouse_machines: vec![machine("B-M1", "B-L1", &["grain", "tools"])],
            },
            StationDef {
                id: StationId::from("C"),
                name: "Refinery".to_string(),
                position: Position::new(0.0, 0.0, 3000.0),
                ruleset: ruleset(
                    vec![group("C-oil-in", &["oil"], &["A"], Licenses::HAZMAT1)],
                    vec![group("C-oil", &["oil"], &["A"], Licenses::HAZMAT1)],
                ),
                tracks: vec![
                    track("C-S1", TrackPool::Storage, 150.0),
                    track("C-I1", TrackPool::TransferIn, 200.0),
                    track("C-O1", TrackPool::TransferOut, 200.0),
                ],
                warehouse_machines: vec![machine("C-M1", "C-L1", &["oil"])],
            },
        ],
        constants: Constants::default(),
    }
}

/// In-memory host. Cars stand at the position of the station owning their
/// track; occupancy is the cars' lengths plus separation gaps plus anything
/// added with [`TestHost::occupy`].
#[derive(Debug, Clone)]
pub struct TestHost {
    content: YardContent,
    pub cars: BTreeMap<CarId, RollingStockUnit>,
    pub licenses: Licenses,
    pub max_cars: usize,
    pub player_present: bool,
    pub fast_travelling: bool,
    pub fail_spawn: bool,
    pub fail_set_cargo: bool,
    /// Cars whose delete conditions never hold.
    pub undeletable: BTreeSet<CarId>,
    pub marked: Vec<CarId>,
    pub jobless: Vec<CarId>,
    pub deleted: Vec<CarId>,
    pub store: BTreeMap<String, serde_json::Value>,
    extra_occupancy: BTreeMap<TrackId, f32>,
    next_car: u64,
}

impl TestHost {
    pub fn new(content: &YardContent) -> Self {
        Self {
            content: content.clone(),
            cars: BTreeMap::new(),
            licenses: Licenses::ALL,
            max_cars: 5,
            player_present: true,
            fast_travelling: false,
            fail_spawn: false,
            fail_set_cargo: false,
            undeletable: BTreeSet::new(),
            marked: Vec::new(),
            jobless: Vec::new(),
            deleted: Vec::new(),
            store: BTreeMap::new(),
            extra_occupancy: BTreeMap::new(),
            next_car: 0,
        }
    }

    pub fn occupy(&mut self, track: &TrackId, length: f32) {
        *self.extra_occupancy.entry(track.clone()).or_default() += length;
    }

    fn station_position(&self, track: &TrackId) -> Position {
        self.content
            .stations
            .iter()
            .find(|station| {
                station.tracks.iter().any(|t| &t.id == track)
                    || station.warehouse_machines.iter().any(|m| &m.track == track)
            })
            .map(|station| station.position)
            .unwrap_or_default()
    }

    /// Puts a car on `track`. Cars without a trainset get one of their own;
    /// cars with cargo are fully loaded.
    pub fn place_car(
        &mut self,
        car_type: &CarType,
        track: &str,
        trainset: Option<&str>,
        cargo: Option<&str>,
    ) -> CarId {
        self.next_car += 1;
        let id = CarId(format!("car_{:04}", self.next_car));
        let track = TrackId::from(track);
        let unit = RollingStockUnit {
            id: id.clone(),
            car_type: car_type.clone(),
            position: self.station_position(&track),
            track: Some(track),
            cargo: cargo.map(CargoType::from),
            cargo_amount: if cargo.is_some() { 1.0 } else { 0.0 },
            trainset: TrainsetId(trainset.map_or_else(|| format!("ts_{}", id.0), str::to_string)),
            player_spawned: false,
        };
        self.cars.insert(id.clone(), unit);
        id
    }

    pub fn move_car(&mut self, id: &CarId, position: Position) {
        if let Some(car) = self.cars.get_mut(id) {
            car.position = position;
        }
    }

    /// Moves `cars` onto `track`, at its station.
    pub fn move_cars_to_track(&mut self, cars: &[CarId], track: &TrackId) {
        let position = self.station_position(track);
        for id in cars {
            if let Some(car) = self.cars.get_mut(id) {
                car.track = Some(track.clone());
                car.position = position;
            }
        }
    }

    fn car_length(&self, car_type: &CarType) -> f32 {
        self.content
            .cargo
            .car_types
            .iter()
            .find(|def| &def.id == car_type)
            .map_or(0.0, |def| def.length_m)
    }
}

impl CarRegistry for TestHost {
    fn car(&self, id: &CarId) -> Option<&RollingStockUnit> {
        self.cars.get(id)
    }

    fn set_cargo(
        &mut self,
        id: &CarId,
        cargo: Option<CargoType>,
        amount: f32,
    ) -> Result<(), EngineError> {
        if self.fail_set_cargo {
            return Err(EngineError::UnknownCar(id.clone()));
        }
        let car = self
            .cars
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownCar(id.clone()))?;
        car.cargo_amount = if cargo.is_some() { amount } else { 0.0 };
        car.cargo = cargo;
        Ok(())
    }

    fn convert_player_spawned(&mut self, id: &CarId) {
        if let Some(car) = self.cars.get_mut(id) {
            car.player_spawned = false;
        }
    }
}

impl Spawner for TestHost {
    fn spawn_cars(&mut self, car_types: &[CarType], track: &TrackId) -> Option<Vec<CarId>> {
        if self.fail_spawn || car_types.is_empty() {
            return None;
        }
        let trainset = format!("spawned_{}", self.next_car + 1);
        let cars = car_types
            .iter()
            .map(|car_type| self.place_car(car_type, &track.0, Some(&trainset), None))
            .collect();
        Some(cars)
    }

    fn delete_cars(&mut self, cars: &[CarId], _force_instant: bool) {
        for id in cars {
            if self.cars.remove(id).is_some() {
                self.deleted.push(id.clone());
            }
        }
    }
}

impl TrackOccupancy for TestHost {
    fn occupied_length(&self, track: &TrackId) -> f32 {
        let on_track: Vec<&RollingStockUnit> = self
            .cars
            .values()
            .filter(|car| car.track.as_ref() == Some(track))
            .collect();
        let mut length: f32 = on_track.iter().map(|car| self.car_length(&car.car_type)).sum();
        if !on_track.is_empty() {
            length += self.content.constants.car_separation_m * (on_track.len() + 1) as f32;
        }
        length + self.extra_occupancy.get(track).copied().unwrap_or(0.0)
    }
}

impl LicenseProvider for TestHost {
    fn is_license_acquired(&self, licenses: Licenses) -> bool {
        self.licenses.contains(licenses)
    }

    fn max_cars_per_job(&self) -> usize {
        self.max_cars
    }

    fn licenses_for_job_kind(&self, kind: JobKind) -> Licenses {
        kind.license()
    }

    fn licenses_for_cargo_types(&self, cargo_types: &[CargoType]) -> Licenses {
        self.content
            .cargo
            .cargo_types
            .iter()
            .filter(|def| cargo_types.contains(&def.id))
            .fold(Licenses::NONE, |acc, def| acc | def.licenses)
    }

    fn licenses_for_container_types(&self, container_types: &[ContainerType]) -> Licenses {
        self.content
            .cargo
            .container_types
            .iter()
            .filter(|def| container_types.contains(&def.id))
            .fold(Licenses::NONE, |acc, def| acc | def.licenses)
    }

    fn licenses_for_car_count(&self, count: usize) -> Licenses {
        self.content.constants.licensing.licenses_for_car_count(count)
    }
}

impl PaymentCalculator for TestHost {
    fn distance_between(&self, from: &StationId, to: &StationId) -> f32 {
        match (self.content.station(from), self.content.station(to)) {
            (Some(a), Some(b)) => a.position.distance(b.position),
            _ => 0.0,
        }
    }

    fn haul_bonus_time_limit(&self, distance: f32) -> f32 {
        self.content.constants.payment.haul_bonus_time_limit(distance)
    }

    fn shunting_bonus_time_limit(&self, track_count: usize) -> f32 {
        self.content
            .constants
            .payment
            .shunting_bonus_time_limit(track_count)
    }

    fn job_payment(&self, kind: JobKind, distance: f32, data: &PaymentData) -> f32 {
        self.content.constants.payment.job_payment(kind, distance, data)
    }
}

impl UnusedCarTracker for TestHost {
    fn take_marked_for_delete(&mut self) -> Vec<CarId> {
        std::mem::take(&mut self.marked)
    }

    fn mark_for_delete(&mut self, cars: &[CarId]) {
        for id in cars {
            if !self.marked.contains(id) {
                self.marked.push(id.clone());
            }
        }
    }

    fn delete_conditions_fulfilled(&self, car: &CarId) -> bool {
        self.cars.contains_key(car) && !self.undeletable.contains(car)
    }

    fn register_jobless_cars(&mut self, cars: &[CarId]) {
        self.jobless.extend(cars.iter().cloned());
    }

    fn is_player_present(&self) -> bool {
        self.player_present
    }

    fn is_fast_travelling(&self) -> bool {
        self.fast_travelling
    }
}

impl PersistenceStore for TestHost {
    fn read(&self, key: &str) -> Option<serde_json::Value> {
        self.store.get(key).cloned()
    }

    fn write(&mut self, key: &str, value: serde_json::Value) {
        self.store.insert(key.to_string(), value);
    }
}

/// Deterministic RNG seeded with 42.
pub fn make_rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(42)
}
