//! Host simulation and crew autopilot that exercise `yard_core` end to end.

mod host;
mod run_state;

pub use host::{HostSnapshot, SimHost};
pub use run_state::{Restored, RunState};

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};
use yard_core::host::CarRegistry;
use yard_core::{
    abandon_job, complete_job, generate_station_jobs, take_job, EngineContext, EngineError,
    EventEnvelope, JobDefinition, JobId, JobKind, JobPayload, StationId, TakeOutcome,
    YardContent,
};

/// Something that plays the player's part: visits stations and works jobs.
pub trait Operator {
    fn step<R: Rng + ?Sized>(
        &mut self,
        ctx: &mut EngineContext,
        content: &YardContent,
        host: &mut SimHost,
        rng: &mut R,
        events: &mut Vec<EventEnvelope>,
    ) -> Result<CrewAction, EngineError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CrewAction {
    Took(JobId),
    Completed(JobId),
    Abandoned(JobId),
    Travelled(StationId),
    Idle,
}

/// Works one job at a time:
/// 1. On arrival at a station, let it populate its job board.
/// 2. Finish the job in hand: do the shunting, then complete it.
/// 3. Otherwise take the first available job posted here.
/// 4. With nothing to do here, travel to the busiest station.
#[derive(Debug, Clone)]
pub struct CrewController {
    location: StationId,
    active: Option<JobId>,
    /// Every n-th job in hand is abandoned instead of completed.
    abandon_every: Option<u64>,
    steps: u64,
    pub completed: u64,
    pub abandoned: u64,
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Station where the crew ends up once `job` is done.
fn end_station(job: &JobDefinition) -> &StationId {
    match job.kind() {
        JobKind::Transport | JobKind::EmptyHaul => &job.destination,
        JobKind::ShuntingLoad | JobKind::ShuntingUnload => &job.station,
    }
}

/// Does what the player would do for `job`: load or unload at the warehouse
/// and leave the cars on the job's destination tracks.
fn perform_work(host: &mut SimHost, job: &JobDefinition) -> Result<(), EngineError> {
    match &job.payload {
        JobPayload::ShuntingLoad {
            destination_track,
            loads,
            ..
        } => {
            for load in loads {
                let per_car = load.amount / load.cars.len().max(1) as f32;
                for car in &load.cars {
                    host.set_cargo(car, Some(load.cargo.clone()), per_car)?;
                }
            }
            host.move_cars_to_track(&job.cars, destination_track);
        }
        JobPayload::Transport {
            destination_track, ..
        }
        | JobPayload::EmptyHaul {
            destination_track, ..
        } => host.move_cars_to_track(&job.cars, destination_track),
        JobPayload::ShuntingUnload {
            destination_tracks, ..
        } => {
            for set in destination_tracks {
                for car in &set.cars {
                    host.set_cargo(car, None, 0.0)?;
                }
                host.move_cars_to_track(&set.cars, &set.track);
            }
        }
    }
    Ok(())
}

/// Station with the most takeable jobs, ties broken by id.
fn busiest_station(ctx: &EngineContext, content: &YardContent) -> Option<StationId> {
    content
        .stations
        .iter()
        .map(|station| {
            let count = ctx.chains.available_jobs(Some(&station.id)).count();
            (count, &station.id)
        })
        .filter(|(count, _)| *count > 0)
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
        .map(|(_, id)| id.clone())
}

// ---------------------------------------------------------------------------
// CrewController
// ---------------------------------------------------------------------------

impl CrewController {
    pub fn new(start: StationId) -> Self {
        Self {
            location: start,
            active: None,
            abandon_every: None,
            steps: 0,
            completed: 0,
            abandoned: 0,
        }
    }

    #[must_use]
    pub fn abandoning_every(mut self, jobs: u64) -> Self {
        self.abandon_every = (jobs > 0).then_some(jobs);
        self
    }

    pub fn location(&self) -> &StationId {
        &self.location
    }

    pub fn active_job(&self) -> Option<&JobId> {
        self.active.as_ref()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn travel(&mut self, host: &mut SimHost, to: &StationId) {
        self.location = to.clone();
        host.move_player_to(to);
    }

    fn finish_active<R: Rng + ?Sized>(
        &mut self,
        job_id: JobId,
        ctx: &mut EngineContext,
        content: &YardContent,
        host: &mut SimHost,
        rng: &mut R,
        events: &mut Vec<EventEnvelope>,
    ) -> Result<CrewAction, EngineError> {
        let Some(job) = ctx.chains.job(&job_id).cloned() else {
            debug!(job = %job_id, "job in hand no longer exists");
            return Ok(CrewAction::Idle);
        };
        let handled = self.completed + self.abandoned + 1;
        if self.abandon_every.is_some_and(|n| handled % n == 0) {
            abandon_job(ctx, host, &job_id, events)?;
            self.abandoned += 1;
            return Ok(CrewAction::Abandoned(job_id));
        }
        perform_work(host, &job)?;
        complete_job(ctx, content, host, &job_id, rng, events)?;
        self.completed += 1;
        self.travel(host, end_station(&job));
        info!(job = %job_id, station = %self.location, "crew completed job");
        Ok(CrewAction::Completed(job_id))
    }

    fn take_here<R: Rng + ?Sized>(
        &mut self,
        ctx: &mut EngineContext,
        content: &YardContent,
        host: &mut SimHost,
        rng: &mut R,
        events: &mut Vec<EventEnvelope>,
    ) -> Result<Option<JobId>, EngineError> {
        let mut candidates: Vec<JobId> = ctx
            .chains
            .available_jobs(Some(&self.location))
            .map(|job| job.id.clone())
            .collect();
        candidates.sort();
        for job in candidates {
            match take_job(ctx, content, host, &job, rng, events)? {
                TakeOutcome::Taken => return Ok(Some(job)),
                TakeOutcome::Blocked | TakeOutcome::Expired => {}
            }
        }
        Ok(None)
    }
}

impl Operator for CrewController {
    fn step<R: Rng + ?Sized>(
        &mut self,
        ctx: &mut EngineContext,
        content: &YardContent,
        host: &mut SimHost,
        rng: &mut R,
        events: &mut Vec<EventEnvelope>,
    ) -> Result<CrewAction, EngineError> {
        self.steps += 1;
        host.move_player_to(&self.location);
        let station = self.location.clone();
        generate_station_jobs(ctx, content, host, &station, rng, events)?;

        let action = if let Some(job) = self.active.take() {
            self.finish_active(job, ctx, content, host, rng, events)?
        } else if let Some(job) = self.take_here(ctx, content, host, rng, events)? {
            self.active = Some(job.clone());
            CrewAction::Took(job)
        } else if let Some(next) = busiest_station(ctx, content).filter(|s| s != &station) {
            self.travel(host, &next);
            CrewAction::Travelled(next)
        } else {
            CrewAction::Idle
        };

        let left = host.abandon_jobless();
        if left > 0 {
            debug!(count = left, "crew left cars behind");
        }
        Ok(action)
    }
}
