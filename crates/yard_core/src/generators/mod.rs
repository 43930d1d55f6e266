//! Job generators. Each kind has a with-existing-cars entry point and a
//! with-car-spawning one; both return an unfinalized chain or `None` when the
//! job is infeasible right now.

pub mod empty_haul;
pub mod shunting_load;
pub mod shunting_unload;
pub mod transport;

use std::collections::BTreeSet;
use std::ops::Range;

use rand::Rng;
use tracing::warn;

use crate::chain::{ChainEntry, FollowOnPolicy, JobChain};
use crate::host::Host;
use crate::id::{generate_chain_id, next_job_id};
use crate::sampling::{pick, split_evenly};
use crate::tracks::TrackAllocator;
use crate::{
    CarId, CarType, CargoCapabilityIndex, CargoType, Constants, Counters, JobDefinition, JobId,
    JobKind, Licenses, PaymentData, StationDef, StationId, TrackId, TrackPool, WarehouseMachineDef,
    YardContent,
};

/// Everything a generator reads or mutates, borrowed for one call.
pub struct GenerationEnv<'a, H: Host> {
    pub content: &'a YardContent,
    pub index: &'a CargoCapabilityIndex,
    pub tracks: &'a TrackAllocator,
    pub counters: &'a mut Counters,
    pub host: &'a mut H,
}

impl<'a, H: Host> GenerationEnv<'a, H> {
    pub fn constants(&self) -> &'a Constants {
        &self.content.constants
    }

    pub fn station(&self, id: &StationId) -> Option<&'a StationDef> {
        let station = self.content.station(id);
        if station.is_none() {
            warn!(station = %id, "unknown station");
        }
        station
    }

    pub fn train_length(&self, car_types: &[CarType]) -> f32 {
        self.tracks.train_length(self.index, car_types)
    }

    /// Car types of `cars` in order; `None` if any car is unknown.
    pub fn car_types_of(&self, cars: &[CarId]) -> Option<Vec<CarType>> {
        cars.iter()
            .map(|id| {
                let car = self.host.car(id);
                if car.is_none() {
                    warn!(car = %id, "unknown car handed to generator");
                }
                car.map(|car| car.car_type.clone())
            })
            .collect()
    }

    pub fn next_job_id(&mut self, kind: JobKind) -> JobId {
        next_job_id(self.counters, kind)
    }

    /// Shunting bonus time and wage: distance is a fixed length per track
    /// handled.
    pub fn shunting_bonus_and_wage(
        &self,
        kind: JobKind,
        track_count: usize,
        car_types: &[CarType],
        cargo: &[Option<CargoType>],
    ) -> (f32, f32) {
        let distance = track_count as f32 * self.constants().shunting_distance_per_track_m;
        let bonus = self.host.shunting_bonus_time_limit(track_count);
        let wage = self
            .host
            .job_payment(kind, distance, &payment_data(car_types, cargo));
        (bonus, wage)
    }

    pub fn haul_bonus_and_wage(
        &self,
        kind: JobKind,
        from: &StationId,
        to: &StationId,
        car_types: &[CarType],
        cargo: &[Option<CargoType>],
    ) -> (f32, f32) {
        let distance = self.host.distance_between(from, to);
        let bonus = self.host.haul_bonus_time_limit(distance);
        let wage = self
            .host
            .job_payment(kind, distance, &payment_data(car_types, cargo));
        (bonus, wage)
    }

    pub fn licenses_for(&self, kind: JobKind, cargo: &[Option<CargoType>], cars: usize) -> Licenses {
        let cargo: Vec<CargoType> = cargo.iter().flatten().cloned().collect();
        self.host.licenses_for_job_kind(kind)
            | self.host.licenses_for_cargo_types(&cargo)
            | self.host.licenses_for_car_count(cars)
    }

    /// Random warehouse machine of `station` that handles any of `cargo`.
    pub fn pick_machine<R: Rng + ?Sized>(
        &self,
        station: &'a StationDef,
        cargo: &[Option<CargoType>],
        rng: &mut R,
    ) -> Option<&'a WarehouseMachineDef> {
        let supported: Vec<&WarehouseMachineDef> = station
            .warehouse_machines
            .iter()
            .filter(|machine| {
                cargo
                    .iter()
                    .flatten()
                    .any(|c| machine.cargo_types.contains(c))
            })
            .collect();
        let machine = pick(&supported, rng).copied();
        if machine.is_none() {
            warn!(station = %station.id, "found no supported warehouse machine");
        }
        machine
    }

    /// Track of `pool` at `station` with room for `required`, preferring
    /// tracks nothing stands on.
    pub fn destination_track<R: Rng + ?Sized>(
        &self,
        station: &StationId,
        pool: TrackPool,
        required: f32,
        rng: &mut R,
    ) -> Option<TrackId> {
        let candidates = self.tracks.pool_tracks(station, pool);
        let unoccupied = self.tracks.unoccupied(&*self.host, candidates);
        self.tracks
            .select_track_with_space(&*self.host, &unoccupied, required, rng)
            .or_else(|| {
                self.tracks
                    .select_track_with_space(&*self.host, candidates, required, rng)
            })
    }

    pub fn track_with_space<R: Rng + ?Sized>(
        &self,
        station: &StationId,
        pool: TrackPool,
        required: f32,
        rng: &mut R,
    ) -> Option<TrackId> {
        self.tracks.select_track_with_space(
            &*self.host,
            self.tracks.pool_tracks(station, pool),
            required,
            rng,
        )
    }

    /// Unoccupied track of `pool` at `station` with room for `required`.
    pub fn free_unoccupied_track<R: Rng + ?Sized>(
        &self,
        station: &StationId,
        pool: TrackPool,
        required: f32,
        rng: &mut R,
    ) -> Option<TrackId> {
        let unoccupied = self
            .tracks
            .unoccupied(&*self.host, self.tracks.pool_tracks(station, pool));
        self.tracks
            .select_track_with_space(&*self.host, &unoccupied, required, rng)
    }

    /// Splits `car_types` across up to `max_tracks` distinct storage tracks of
    /// `station`. Each slice needs a track that fits its own length. On
    /// failure the split is retried with one track fewer.
    pub fn split_across_storage<R: Rng + ?Sized>(
        &self,
        station: &StationId,
        car_types: &[CarType],
        max_tracks: usize,
        rng: &mut R,
    ) -> Option<Vec<(Range<usize>, TrackId)>> {
        let storage = self.tracks.pool_tracks(station, TrackPool::Storage);
        let mut count = max_tracks.min(car_types.len()).max(1);
        while count > 0 {
            let mut chosen: Vec<(Range<usize>, TrackId)> = Vec::with_capacity(count);
            let mut used: BTreeSet<TrackId> = BTreeSet::new();
            for range in split_evenly(car_types.len(), count) {
                let required = self.train_length(&car_types[range.clone()]);
                let remaining: Vec<TrackId> = storage
                    .iter()
                    .filter(|t| !used.contains(*t))
                    .cloned()
                    .collect();
                let Some(track) =
                    self.tracks
                        .select_track_with_space(&*self.host, &remaining, required, rng)
                else {
                    break;
                };
                used.insert(track.clone());
                chosen.push((range, track));
            }
            if chosen.len() == count {
                return Some(chosen);
            }
            count -= 1;
        }
        warn!(%station, "couldn't find storage tracks with enough free space for train");
        None
    }

    /// Packs a definition into a fresh single-job chain.
    pub fn chain_for<R: Rng + ?Sized>(
        &self,
        definition: JobDefinition,
        policy: FollowOnPolicy,
        rng: &mut R,
    ) -> JobChain {
        let entry = ChainEntry::new(definition, self.tracks, self.index);
        JobChain::new(generate_chain_id(rng), policy, entry)
    }

    /// Removes cars spawned for a job that could not be built.
    pub fn discard_spawned(&mut self, cars: &[CarId]) {
        if !cars.is_empty() {
            warn!(count = cars.len(), "deleting cars spawned for a failed job");
            self.host.delete_cars(cars, true);
        }
    }
}

pub fn payment_data(car_types: &[CarType], cargo: &[Option<CargoType>]) -> PaymentData {
    let mut data = PaymentData::default();
    for car_type in car_types {
        *data.car_types.entry(car_type.clone()).or_insert(0) += 1;
    }
    for cargo_type in cargo.iter().flatten() {
        *data.cargo_types.entry(cargo_type.clone()).or_insert(0) += 1;
    }
    data
}
