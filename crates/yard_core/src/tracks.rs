use ahash::AHashMap;
use rand::Rng;
use tracing::{error, warn};

use crate::host::TrackOccupancy;
use crate::{
    CarType, CargoCapabilityIndex, EngineError, StationId, TrackId, TrackPool, TrackSelection,
    YardContent,
};

#[derive(Debug, Clone)]
struct TrackSlot {
    station: StationId,
    pool: TrackPool,
    length: f32,
}

/// Owner of every track reservation counter.
///
/// Free space is always `length - occupied - reserved`; no other component
/// computes it.
#[derive(Debug, Clone)]
pub struct TrackAllocator {
    slots: AHashMap<TrackId, TrackSlot>,
    pools: AHashMap<(StationId, TrackPool), Vec<TrackId>>,
    reserved: AHashMap<TrackId, f32>,
    policy: TrackSelection,
    car_separation_m: f32,
}

impl TrackAllocator {
    pub fn new(content: &YardContent) -> Self {
        let mut slots = AHashMap::new();
        let mut pools: AHashMap<(StationId, TrackPool), Vec<TrackId>> = AHashMap::new();
        for station in &content.stations {
            for track in &station.tracks {
                slots.insert(
                    track.id.clone(),
                    TrackSlot {
                        station: station.id.clone(),
                        pool: track.pool,
                        length: track.length_m,
                    },
                );
                pools
                    .entry((station.id.clone(), track.pool))
                    .or_default()
                    .push(track.id.clone());
            }
        }
        Self {
            slots,
            pools,
            reserved: AHashMap::new(),
            policy: content.constants.track_selection,
            car_separation_m: content.constants.car_separation_m,
        }
    }

    pub fn track_length(&self, track: &TrackId) -> Option<f32> {
        self.slots.get(track).map(|slot| slot.length)
    }

    pub fn reserved(&self, track: &TrackId) -> f32 {
        self.reserved.get(track).copied().unwrap_or(0.0)
    }

    pub fn pool_of(&self, track: &TrackId) -> Option<(&StationId, TrackPool)> {
        self.slots.get(track).map(|slot| (&slot.station, slot.pool))
    }

    pub fn pool_tracks(&self, station: &StationId, pool: TrackPool) -> &[TrackId] {
        self.pools
            .get(&(station.clone(), pool))
            .map_or(&[], Vec::as_slice)
    }

    pub fn free_space(&self, occupancy: &impl TrackOccupancy, track: &TrackId) -> f32 {
        let Some(length) = self.track_length(track) else {
            return 0.0;
        };
        (length - occupancy.occupied_length(track) - self.reserved(track)).max(0.0)
    }

    /// Tracks with no stock standing on them and nothing reserved.
    pub fn unoccupied(&self, occupancy: &impl TrackOccupancy, tracks: &[TrackId]) -> Vec<TrackId> {
        tracks
            .iter()
            .filter(|t| !occupancy.is_occupied(t) && self.reserved(t) <= 0.0)
            .cloned()
            .collect()
    }

    /// Picks a track whose free space is strictly greater than `required`.
    pub fn select_track_with_space<R: Rng + ?Sized>(
        &self,
        occupancy: &impl TrackOccupancy,
        candidates: &[TrackId],
        required: f32,
        rng: &mut R,
    ) -> Option<TrackId> {
        let fitting: Vec<(&TrackId, f32)> = candidates
            .iter()
            .map(|t| (t, self.free_space(occupancy, t)))
            .filter(|(_, free)| *free > required)
            .collect();
        if fitting.is_empty() {
            return None;
        }
        match self.policy {
            TrackSelection::BestFit => fitting
                .iter()
                .fold(None::<(&TrackId, f32)>, |best, &(track, free)| match best {
                    Some((_, best_free)) if best_free <= free => best,
                    _ => Some((track, free)),
                })
                .map(|(track, _)| track.clone()),
            TrackSelection::Random => {
                let (track, _) = fitting[rng.gen_range(0..fitting.len())];
                Some(track.clone())
            }
        }
    }

    pub fn reserve(&mut self, track: &TrackId, length: f32) -> Result<(), EngineError> {
        let total = self
            .track_length(track)
            .ok_or_else(|| EngineError::UnknownTrack(track.clone()))?;
        let reserved = self.reserved(track);
        if reserved + length > total {
            return Err(EngineError::Overcommit {
                track: track.clone(),
                length,
                reserved,
                total,
            });
        }
        self.reserved.insert(track.clone(), reserved + length);
        Ok(())
    }

    pub fn release(&mut self, track: &TrackId, length: f32) {
        let reserved = self.reserved(track);
        if length > reserved + f32::EPSILON {
            warn!(
                %track,
                length,
                reserved,
                "releasing more track space than is reserved; clamping to zero"
            );
        }
        let remaining = (reserved - length).max(0.0);
        if remaining > 0.0 {
            self.reserved.insert(track.clone(), remaining);
        } else {
            self.reserved.remove(track);
        }
    }

    /// Finds another track in `old`'s station for a reservation `old` can no
    /// longer hold, searching pools in the order [`TrackPool::replacement_order`]
    /// gives for `old`'s pool.
    pub fn find_replacement_track<R: Rng + ?Sized>(
        &self,
        occupancy: &impl TrackOccupancy,
        old: &TrackId,
        required: f32,
        rng: &mut R,
    ) -> Option<TrackId> {
        let Some((station, pool)) = self.pool_of(old) else {
            error!(track = %old, "can't find the pool of track; skipping replacement");
            return None;
        };
        let replacement = pool.replacement_order().into_iter().find_map(|candidate_pool| {
            self.select_track_with_space(
                occupancy,
                self.pool_tracks(station, candidate_pool),
                required,
                rng,
            )
        });
        if replacement.is_none() {
            warn!(track = %old, %station, required, "can't find any track to replace reserved track");
        }
        replacement
    }

    pub fn separation_length(&self, car_count: usize) -> f32 {
        self.car_separation_m * (car_count + 1) as f32
    }

    /// Sum of car lengths plus coupling separation.
    pub fn train_length(&self, index: &CargoCapabilityIndex, car_types: &[CarType]) -> f32 {
        let cars: f32 = car_types
            .iter()
            .map(|car_type| index.car_length(car_type).unwrap_or(0.0))
            .sum();
        cars + self.separation_length(car_types.len())
    }

    pub fn clear_reservations(&mut self) {
        self.reserved.clear();
    }
}
