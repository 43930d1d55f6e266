//! In-memory host: rolling stock, occupancy, licenses, pay and the save store.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;
use yard_core::host::{
    CarRegistry, LicenseProvider, PaymentCalculator, PersistenceStore, Spawner, TrackOccupancy,
    UnusedCarTracker,
};
use yard_core::{
    CarId, CarType, CargoType, ContainerType, EngineError, JobKind, Licenses, PaymentData,
    Position, RollingStockUnit, StationId, TrackId, TrainsetId, YardContent,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct HostSnapshot {
    pub cars: usize,
    pub loaded: usize,
    pub unused: usize,
    pub jobless: usize,
    pub player_station: Option<StationId>,
}

/// The simulated railway. Cars stand at the position of the station owning
/// their track. The player follows the crew from station to station.
#[derive(Debug, Clone)]
pub struct SimHost {
    content: YardContent,
    track_stations: BTreeMap<TrackId, StationId>,
    cars: BTreeMap<CarId, RollingStockUnit>,
    pub licenses: Licenses,
    pub player: Position,
    pub player_present: bool,
    pub fast_travelling: bool,
    unused: Vec<CarId>,
    jobless: BTreeSet<CarId>,
    store: BTreeMap<String, serde_json::Value>,
    next_car: u64,
    next_trainset: u64,
}

impl SimHost {
    /// Builds a host holding `stock`. All of it starts out abandoned, so the
    /// first reclamation pass sees every car.
    pub fn new(content: &YardContent, stock: Vec<RollingStockUnit>) -> Self {
        let mut track_stations = BTreeMap::new();
        for station in &content.stations {
            for track in &station.tracks {
                track_stations.insert(track.id.clone(), station.id.clone());
            }
            for machine in &station.warehouse_machines {
                track_stations.insert(machine.track.clone(), station.id.clone());
            }
        }
        let unused = stock.iter().map(|car| car.id.clone()).collect();
        // Restored stock may have gaps, so continue after the highest number.
        let next_car = stock
            .iter()
            .filter_map(|car| car.id.0.strip_prefix("car_")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            .max(stock.len() as u64);
        let cars = stock.into_iter().map(|car| (car.id.clone(), car)).collect();
        Self {
            content: content.clone(),
            track_stations,
            cars,
            licenses: Licenses::ALL,
            player: Position::default(),
            player_present: true,
            fast_travelling: false,
            unused,
            jobless: BTreeSet::new(),
            store: BTreeMap::new(),
            next_car,
            next_trainset: 0,
        }
    }

    pub fn cars(&self) -> impl Iterator<Item = &RollingStockUnit> {
        self.cars.values()
    }

    pub fn unused(&self) -> &[CarId] {
        &self.unused
    }

    pub fn jobless(&self) -> &BTreeSet<CarId> {
        &self.jobless
    }

    pub fn station_of_track(&self, track: &TrackId) -> Option<&StationId> {
        self.track_stations.get(track)
    }

    fn track_position(&self, track: &TrackId) -> Option<Position> {
        let station = self.track_stations.get(track)?;
        self.content.station(station).map(|s| s.position)
    }

    /// Puts the player at `station`.
    pub fn move_player_to(&mut self, station: &StationId) {
        if let Some(def) = self.content.station(station) {
            self.player = def.position;
        }
    }

    /// The station whose position the player stands on, if any.
    pub fn player_station(&self) -> Option<StationId> {
        self.content
            .stations
            .iter()
            .find(|s| s.position.sqr_distance(self.player) < 1.0)
            .map(|s| s.id.clone())
    }

    /// Shunts `cars` onto `track`. Unknown tracks leave the cars where they are.
    pub fn move_cars_to_track(&mut self, cars: &[CarId], track: &TrackId) {
        let Some(position) = self.track_position(track) else {
            debug!(%track, "move to unknown track ignored");
            return;
        };
        for id in cars {
            if let Some(car) = self.cars.get_mut(id) {
                car.track = Some(track.clone());
                car.position = position;
            }
        }
    }

    /// Cars that finished their chains and were left standing become
    /// candidates for reclamation. Returns how many were handed over.
    pub fn abandon_jobless(&mut self) -> usize {
        let left: Vec<CarId> = std::mem::take(&mut self.jobless).into_iter().collect();
        let count = left.len();
        self.mark_for_delete(&left);
        count
    }

    pub fn persisted(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.store
    }

    pub fn restore_persisted(&mut self, store: BTreeMap<String, serde_json::Value>) {
        self.store = store;
    }

    pub fn snapshot(&self) -> HostSnapshot {
        let threshold = self.content.constants.loaded_cargo_threshold;
        HostSnapshot {
            cars: self.cars.len(),
            loaded: self.cars.values().filter(|c| !c.is_empty(threshold)).count(),
            unused: self.unused.len(),
            jobless: self.jobless.len(),
            player_station: self.player_station(),
        }
    }

    fn car_length(&self, car_type: &CarType) -> Option<f32> {
        self.content
            .cargo
            .car_types
            .iter()
            .find(|def| &def.id == car_type)
            .map(|def| def.length_m)
    }
}

impl CarRegistry for SimHost {
    fn car(&self, id: &CarId) -> Option<&RollingStockUnit> {
        self.cars.get(id)
    }

    fn set_cargo(
        &mut self,
        id: &CarId,
        cargo: Option<CargoType>,
        amount: f32,
    ) -> Result<(), EngineError> {
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

impl Spawner for SimHost {
    fn spawn_cars(&mut self, car_types: &[CarType], track: &TrackId) -> Option<Vec<CarId>> {
        let position = self.track_position(track)?;
        if car_types.is_empty() || car_types.iter().any(|t| self.car_length(t).is_none()) {
            return None;
        }
        self.next_trainset += 1;
        let trainset = TrainsetId(format!("spawned_{:04}", self.next_trainset));
        let mut spawned = Vec::with_capacity(car_types.len());
        for car_type in car_types {
            self.next_car += 1;
            let id = CarId(format!("car_{:05}", self.next_car));
            self.cars.insert(
                id.clone(),
                RollingStockUnit {
                    id: id.clone(),
                    car_type: car_type.clone(),
                    track: Some(track.clone()),
                    cargo: None,
                    cargo_amount: 0.0,
                    trainset: trainset.clone(),
                    player_spawned: false,
                    position,
                },
            );
            spawned.push(id);
        }
        debug!(%track, count = spawned.len(), "spawned cars");
        Some(spawned)
    }

    fn delete_cars(&mut self, cars: &[CarId], _force_instant: bool) {
        for id in cars {
            self.cars.remove(id);
            self.jobless.remove(id);
        }
        self.unused.retain(|id| !cars.contains(id));
        debug!(count = cars.len(), "deleted cars");
    }
}

impl TrackOccupancy for SimHost {
    fn occupied_length(&self, track: &TrackId) -> f32 {
        let mut count = 0usize;
        let mut length = 0.0;
        for car in self.cars.values().filter(|c| c.track.as_ref() == Some(track)) {
            count += 1;
            length += self.car_length(&car.car_type).unwrap_or(0.0);
        }
        if count == 0 {
            return 0.0;
        }
        length + self.content.constants.car_separation_m * (count + 1) as f32
    }
}

impl LicenseProvider for SimHost {
    fn is_license_acquired(&self, licenses: Licenses) -> bool {
        self.licenses.contains(licenses)
    }

    fn max_cars_per_job(&self) -> usize {
        self.content.constants.licensing.max_cars(self.licenses)
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

impl PaymentCalculator for SimHost {
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

impl UnusedCarTracker for SimHost {
    fn take_marked_for_delete(&mut self) -> Vec<CarId> {
        std::mem::take(&mut self.unused)
    }

    fn mark_for_delete(&mut self, cars: &[CarId]) {
        for id in cars {
            if !self.unused.contains(id) {
                self.unused.push(id.clone());
            }
        }
    }

    /// Only cars out of the player's sight may disappear.
    fn delete_conditions_fulfilled(&self, car: &CarId) -> bool {
        let limit = self.content.constants.effective_delete_sqr_distance();
        self.cars
            .get(car)
            .is_some_and(|unit| unit.position.sqr_distance(self.player) > limit)
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

impl PersistenceStore for SimHost {
    fn read(&self, key: &str) -> Option<serde_json::Value> {
        self.store.get(key).cloned()
    }

    fn write(&mut self, key: &str, value: serde_json::Value) {
        self.store.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yard_core::test_fixtures::base_content;

    fn hopper(id: &str, track: &str, position: Position) -> RollingStockUnit {
        RollingStockUnit {
            id: CarId::from(id),
            car_type: CarType::from("hopper"),
            track: Some(TrackId::from(track)),
            cargo: None,
            cargo_amount: 0.0,
            trainset: TrainsetId::from("t1"),
            player_spawned: false,
            position,
        }
    }

    #[test]
    fn initial_stock_starts_abandoned() {
        let content = base_content();
        let host = SimHost::new(&content, vec![hopper("car_00001", "A-S1", Position::default())]);
        assert_eq!(host.unused(), &[CarId::from("car_00001")]);
        assert!(host.is_occupied(&TrackId::from("A-S1")));
    }

    #[test]
    fn spawned_ids_continue_after_stock() {
        let content = base_content();
        let mut host =
            SimHost::new(&content, vec![hopper("car_00001", "A-S1", Position::default())]);
        let cars = host
            .spawn_cars(&[CarType::from("boxcar")], &TrackId::from("B-S1"))
            .unwrap();
        assert_eq!(cars, vec![CarId::from("car_00002")]);
        let car = host.car(&cars[0]).unwrap();
        assert!((car.position.x - 1000.0).abs() < 1e-5);
        assert!(host
            .spawn_cars(&[CarType::from("boxcar")], &TrackId::from("nowhere"))
            .is_none());
    }

    #[test]
    fn spawned_ids_skip_past_gaps_in_restored_stock() {
        let content = base_content();
        let stock = vec![
            hopper("car_00001", "A-S1", Position::default()),
            hopper("car_00007", "A-S1", Position::default()),
        ];
        let mut host = SimHost::new(&content, stock);
        let cars = host
            .spawn_cars(&[CarType::from("hopper")], &TrackId::from("A-S2"))
            .unwrap();
        assert_eq!(cars, vec![CarId::from("car_00008")]);
    }

    #[test]
    fn nearby_cars_cannot_be_deleted() {
        let content = base_content();
        let near = hopper("near", "A-S1", Position::default());
        let far = hopper("far", "A-S1", Position::new(0.0, 0.0, 3000.0));
        let mut host = SimHost::new(&content, vec![near, far]);
        host.move_player_to(&StationId::from("A"));
        assert!(!host.delete_conditions_fulfilled(&CarId::from("near")));
        assert!(host.delete_conditions_fulfilled(&CarId::from("far")));
        assert!(!host.delete_conditions_fulfilled(&CarId::from("gone")));
    }

    #[test]
    fn occupancy_counts_cars_and_gaps() {
        let content = base_content();
        let stock = vec![
            hopper("c1", "A-S1", Position::default()),
            hopper("c2", "A-S1", Position::default()),
        ];
        let host = SimHost::new(&content, stock);
        let occupied = host.occupied_length(&TrackId::from("A-S1"));
        assert!((occupied - (2.0 * 14.0 + 3.0 * 0.5)).abs() < 1e-5);
        assert!(host.occupied_length(&TrackId::from("A-S2")).abs() < 1e-5);
    }

    #[test]
    fn jobless_cars_are_handed_to_reclamation() {
        let content = base_content();
        let mut host = SimHost::new(&content, vec![hopper("c1", "A-S1", Position::default())]);
        host.take_marked_for_delete();
        host.register_jobless_cars(&[CarId::from("c1")]);
        assert_eq!(host.abandon_jobless(), 1);
        assert!(host.jobless().is_empty());
        assert_eq!(host.unused(), &[CarId::from("c1")]);
    }

    #[test]
    fn license_cap_follows_held_train_length_licenses() {
        let content = base_content();
        let mut host = SimHost::new(&content, Vec::new());
        assert_eq!(host.max_cars_per_job(), 20);
        host.licenses = Licenses::SHUNTING | Licenses::FREIGHT_HAUL;
        assert_eq!(host.max_cars_per_job(), 5);
        host.licenses = host.licenses | Licenses::TRAIN_LENGTH1;
        assert_eq!(host.max_cars_per_job(), 10);
    }
}
