//! Job chains: ordered jobs over one set of cars, with the follow-on policy
//! that decides what happens when the last job completes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::tracks::TrackAllocator;
use crate::{
    CarId, CarType, CargoCapabilityIndex, ChainId, JobDefinition, JobId, JobKind, JobPayload,
    JobState, StationId, TrackReservation,
};

pub type Reservations = SmallVec<[TrackReservation; 2]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainState {
    Pending,
    InProgress,
    Complete,
    Abandoned,
}

/// What a chain generates once its last job completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowOnPolicy {
    /// Unload leads to empty hauls, load to transport, transport to unload.
    EmptyHaulGeneration,
    TransportGeneration,
    ShuntingUnloadGeneration,
    Terminal,
}

impl FollowOnPolicy {
    /// Policy for a chain whose first job is of `kind`, built from stock
    /// the reclamation pass absorbed.
    pub fn for_reclaimed(kind: JobKind) -> Self {
        match kind {
            JobKind::ShuntingLoad => FollowOnPolicy::TransportGeneration,
            JobKind::Transport => FollowOnPolicy::ShuntingUnloadGeneration,
            JobKind::EmptyHaul => FollowOnPolicy::Terminal,
            JobKind::ShuntingUnload => FollowOnPolicy::EmptyHaulGeneration,
        }
    }

    pub fn for_generated(kind: JobKind) -> Self {
        match kind {
            JobKind::EmptyHaul => FollowOnPolicy::Terminal,
            _ => FollowOnPolicy::EmptyHaulGeneration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub definition: JobDefinition,
    /// Persisted separately, keyed by job id.
    #[serde(skip)]
    pub reservations: Reservations,
    /// True while the reservations are counted by the allocator.
    #[serde(skip)]
    pub held: bool,
}

impl ChainEntry {
    pub fn new(
        definition: JobDefinition,
        tracks: &TrackAllocator,
        index: &CargoCapabilityIndex,
    ) -> Self {
        let reservations = planned_reservations(&definition, tracks, index);
        Self {
            definition,
            reservations,
            held: false,
        }
    }
}

/// Track space a job will need at its destination once taken.
pub fn planned_reservations(
    definition: &JobDefinition,
    tracks: &TrackAllocator,
    index: &CargoCapabilityIndex,
) -> Reservations {
    match &definition.payload {
        JobPayload::ShuntingLoad { .. } => Reservations::new(),
        JobPayload::Transport {
            destination_track, ..
        }
        | JobPayload::EmptyHaul {
            destination_track, ..
        } => smallvec::smallvec![TrackReservation {
            track: destination_track.clone(),
            length: tracks.train_length(index, &definition.car_types),
        }],
        JobPayload::ShuntingUnload {
            destination_tracks, ..
        } => destination_tracks
            .iter()
            .map(|cpt| {
                let car_types: Vec<CarType> = cpt
                    .cars
                    .iter()
                    .filter_map(|car| {
                        let at = definition.cars.iter().position(|c| c == car)?;
                        definition.car_types.get(at).cloned()
                    })
                    .collect();
                TrackReservation {
                    track: cpt.track.clone(),
                    length: tracks.train_length(index, &car_types),
                }
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobChain {
    pub id: ChainId,
    pub entries: Vec<ChainEntry>,
    pub cars: Vec<CarId>,
    pub state: ChainState,
    pub policy: FollowOnPolicy,
    pub current: usize,
}

impl JobChain {
    pub fn new(id: ChainId, policy: FollowOnPolicy, first: ChainEntry) -> Self {
        Self {
            id,
            cars: first.definition.cars.clone(),
            entries: vec![first],
            state: ChainState::Pending,
            policy,
            current: 0,
        }
    }

    pub fn first_job(&self) -> &JobDefinition {
        &self.entries[0].definition
    }

    pub fn current_entry(&self) -> Option<&ChainEntry> {
        self.entries.get(self.current)
    }

    pub fn current_entry_mut(&mut self) -> Option<&mut ChainEntry> {
        self.entries.get_mut(self.current)
    }

    pub fn current_job(&self) -> Option<&JobDefinition> {
        self.current_entry().map(|entry| &entry.definition)
    }

    pub fn last_job(&self) -> Option<&JobDefinition> {
        self.entries.last().map(|entry| &entry.definition)
    }

    pub fn is_last(&self, job: &JobId) -> bool {
        self.last_job().is_some_and(|last| &last.id == job)
    }

    pub fn position_of(&self, job: &JobId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| &entry.definition.id == job)
    }

    /// True once the current job has been taken.
    pub fn is_taken(&self) -> bool {
        self.current_job()
            .is_some_and(|job| job.state == JobState::InProgress)
    }
}

/// Every live chain, ordered by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainBook {
    chains: BTreeMap<ChainId, JobChain>,
}

impl ChainBook {
    pub fn insert(&mut self, chain: JobChain) {
        self.chains.insert(chain.id.clone(), chain);
    }

    pub fn get(&self, id: &ChainId) -> Option<&JobChain> {
        self.chains.get(id)
    }

    pub fn get_mut(&mut self, id: &ChainId) -> Option<&mut JobChain> {
        self.chains.get_mut(id)
    }

    pub fn remove(&mut self, id: &ChainId) -> Option<JobChain> {
        self.chains.remove(id)
    }

    pub fn chain_of_job(&self, job: &JobId) -> Option<&ChainId> {
        self.chains
            .values()
            .find(|chain| chain.position_of(job).is_some())
            .map(|chain| &chain.id)
    }

    pub fn job(&self, job: &JobId) -> Option<&JobDefinition> {
        self.chains
            .values()
            .flat_map(|chain| chain.entries.iter())
            .map(|entry| &entry.definition)
            .find(|definition| &definition.id == job)
    }

    pub fn values(&self) -> impl Iterator<Item = &JobChain> {
        self.chains.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut JobChain> {
        self.chains.values_mut()
    }

    /// Current jobs that can be taken, optionally only those posted at `station`.
    pub fn available_jobs<'a>(
        &'a self,
        station: Option<&'a StationId>,
    ) -> impl Iterator<Item = &'a JobDefinition> + 'a {
        self.chains
            .values()
            .filter_map(JobChain::current_job)
            .filter(|job| job.state == JobState::Available)
            .filter(move |job| station.map_or(true, |s| &job.station == s))
    }

    /// Cars that belong to some live chain.
    pub fn cars_in_chains(&self) -> impl Iterator<Item = &CarId> {
        self.chains.values().flat_map(|chain| chain.cars.iter())
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn clear(&mut self) {
        self.chains.clear();
    }
}
