//! Interfaces to the host simulation.
//!
//! The engine never owns rolling stock, occupancy sensing, licenses, prices or
//! save files. It reaches them only through these traits.

use crate::{
    CarId, CarType, CargoType, ContainerType, EngineError, JobKind, Licenses, PaymentData,
    RollingStockUnit, StationId, TrackId,
};

pub trait CarRegistry {
    fn car(&self, id: &CarId) -> Option<&RollingStockUnit>;

    fn set_cargo(
        &mut self,
        id: &CarId,
        cargo: Option<CargoType>,
        amount: f32,
    ) -> Result<(), EngineError>;

    /// Clears the player-spawned flag so the car is treated as job stock.
    fn convert_player_spawned(&mut self, id: &CarId);
}

pub trait Spawner {
    /// Spawns one car per entry of `car_types` on `track`, coupled as one
    /// trainset. `None` means nothing was spawned.
    fn spawn_cars(&mut self, car_types: &[CarType], track: &TrackId) -> Option<Vec<CarId>>;

    fn delete_cars(&mut self, cars: &[CarId], force_instant: bool);
}

pub trait TrackOccupancy {
    /// Length physically taken by rolling stock standing on `track`.
    fn occupied_length(&self, track: &TrackId) -> f32;

    fn is_occupied(&self, track: &TrackId) -> bool {
        self.occupied_length(track) > 0.0
    }
}

pub trait LicenseProvider {
    fn is_license_acquired(&self, licenses: Licenses) -> bool;

    fn max_cars_per_job(&self) -> usize;

    fn licenses_for_job_kind(&self, kind: JobKind) -> Licenses;

    fn licenses_for_cargo_types(&self, cargo_types: &[CargoType]) -> Licenses;

    fn licenses_for_container_types(&self, container_types: &[ContainerType]) -> Licenses;

    fn licenses_for_car_count(&self, count: usize) -> Licenses;
}

pub trait PaymentCalculator {
    fn distance_between(&self, from: &StationId, to: &StationId) -> f32;

    fn haul_bonus_time_limit(&self, distance: f32) -> f32;

    fn shunting_bonus_time_limit(&self, track_count: usize) -> f32;

    fn job_payment(&self, kind: JobKind, distance: f32, data: &PaymentData) -> f32;
}

/// The host's pool of abandoned cars waiting for reclamation.
pub trait UnusedCarTracker {
    /// Drains and returns the marked-for-delete list.
    fn take_marked_for_delete(&mut self) -> Vec<CarId>;

    fn mark_for_delete(&mut self, cars: &[CarId]);

    fn delete_conditions_fulfilled(&self, car: &CarId) -> bool;

    /// Hands cars back to the host as stock with no job.
    fn register_jobless_cars(&mut self, cars: &[CarId]);

    fn is_player_present(&self) -> bool;

    fn is_fast_travelling(&self) -> bool;
}

/// Save-game key/value storage.
pub trait PersistenceStore {
    fn read(&self, key: &str) -> Option<serde_json::Value>;

    fn write(&mut self, key: &str, value: serde_json::Value);
}

/// Everything the engine needs from a running host.
pub trait Host:
    CarRegistry + Spawner + TrackOccupancy + LicenseProvider + PaymentCalculator + UnusedCarTracker
{
}

impl<T> Host for T where
    T: CarRegistry
        + Spawner
        + TrackOccupancy
        + LicenseProvider
        + PaymentCalculator
        + UnusedCarTracker
{
}
