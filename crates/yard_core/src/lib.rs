//! `yard_core`: freight-yard job generation and track reservation.
//!
//! No IO, no network. The host simulation is reached only through the traits
//! in [`host`]; all randomness comes from a passed-in Rng.

pub mod capability;
pub mod chain;
pub mod context;
pub mod controller;
mod error;
mod follow_on;
pub mod generators;
pub mod grouping;
pub mod host;
mod id;
mod licenses;
pub mod matching;
pub mod persistence;
pub mod planner;
pub mod reclamation;
pub mod sampling;
pub mod station_jobs;
pub mod tracks;
mod types;

pub use capability::CargoCapabilityIndex;
pub use chain::{ChainBook, ChainState, FollowOnPolicy, JobChain};
pub use context::EngineContext;
pub use controller::{abandon_job, complete_job, take_job, TakeOutcome};
pub use error::EngineError;
pub use id::{generate_chain_id, generate_uuid};
pub use licenses::Licenses;
pub use reclamation::{run_reclamation_cycle, PassStatus, ReclamationPass, ReclamationReport};
pub use station_jobs::{generate_station_job, generate_station_jobs};
pub use tracks::TrackAllocator;
pub use types::*;

pub(crate) fn emit(counters: &mut Counters, cycle: u64, event: Event) -> EventEnvelope {
    let id = EventId(format!("evt_{:06}", counters.next_event_id));
    counters.next_event_id += 1;
    EventEnvelope { id, cycle, event }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_fixtures;

#[cfg(test)]
mod tests;
