//! Chain lifecycle: finalize, take, complete, abandon.

use rand::Rng;
use tracing::{debug, info, warn};

use crate::chain::{ChainState, JobChain, Reservations};
use crate::context::EngineContext;
use crate::follow_on::run_follow_on;
use crate::host::{CarRegistry, Host, TrackOccupancy};
use crate::tracks::TrackAllocator;
use crate::{
    emit, ChainId, Counters, EngineError, Event, EventEnvelope, JobDefinition, JobId, JobKind,
    JobPayload, JobState, TrackId, YardContent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeOutcome {
    Taken,
    /// A job car stands on the warehouse track; try again once it moves.
    Blocked,
    /// The cars wandered too far from the posting station.
    Expired,
}

/// Puts the first job's cars into the cargo state the job expects.
fn force_cargo_state(
    registry: &mut impl CarRegistry,
    job: &JobDefinition,
) -> Result<(), EngineError> {
    match &job.payload {
        JobPayload::ShuntingLoad { .. } | JobPayload::EmptyHaul { .. } => {
            for car in &job.cars {
                registry.set_cargo(car, None, 0.0)?;
            }
        }
        JobPayload::Transport {
            cargo_per_car,
            amount_per_car,
            ..
        } => {
            for (i, car) in job.cars.iter().enumerate() {
                let cargo = cargo_per_car.get(i).cloned().flatten();
                let amount = amount_per_car.get(i).copied().unwrap_or(1.0);
                registry.set_cargo(car, cargo, amount)?;
            }
        }
        JobPayload::ShuntingUnload { unloads, .. } => {
            for load in unloads {
                let per_car = load.amount / load.cars.len().max(1) as f32;
                for car in &load.cars {
                    registry.set_cargo(car, Some(load.cargo.clone()), per_car)?;
                }
            }
        }
    }
    Ok(())
}

/// Activates a freshly generated chain and registers it.
pub fn finalize<H: Host>(
    ctx: &mut EngineContext,
    host: &mut H,
    mut chain: JobChain,
    events: &mut Vec<EventEnvelope>,
) -> Result<ChainId, EngineError> {
    let first = chain.first_job();
    if first.force_correct_cargo_state {
        force_cargo_state(host, first)?;
    }
    for car in &chain.cars {
        host.convert_player_spawned(car);
    }
    chain.state = ChainState::InProgress;
    chain.current = 0;
    if let Some(entry) = chain.current_entry_mut() {
        entry.definition.state = JobState::Available;
    }

    let first = chain.first_job();
    ctx.emit(
        events,
        Event::ChainGenerated {
            chain_id: chain.id.clone(),
            job_id: first.id.clone(),
            kind: first.kind(),
            station: first.station.clone(),
            destination: first.destination.clone(),
            car_count: chain.cars.len(),
        },
    );
    info!(chain = %chain.id, job = %first.id, kind = %first.kind(), station = %first.station, "generated job chain");
    let id = chain.id.clone();
    ctx.chains.insert(chain);
    Ok(id)
}

/// Reserves every not-yet-held reservation of `chain`. A reservation that no
/// longer fits moves to a replacement track of the same station and the job
/// is rewritten to match; with no replacement it is dropped.
pub fn reserve_or_replace<R: Rng + ?Sized>(
    tracks: &mut TrackAllocator,
    occupancy: &impl TrackOccupancy,
    chain: &mut JobChain,
    counters: &mut Counters,
    cycle: u64,
    rng: &mut R,
    events: &mut Vec<EventEnvelope>,
) -> Result<(), EngineError> {
    for entry in chain
        .entries
        .iter_mut()
        .filter(|entry| !entry.held && entry.definition.state != JobState::Completed)
    {
        let mut kept = Reservations::new();
        for mut reservation in std::mem::take(&mut entry.reservations) {
            let free = tracks.free_space(occupancy, &reservation.track);
            if free >= reservation.length {
                tracks.reserve(&reservation.track, reservation.length)?;
                kept.push(reservation);
                continue;
            }
            let Some(replacement) = tracks.find_replacement_track(
                occupancy,
                &reservation.track,
                reservation.length,
                rng,
            ) else {
                warn!(
                    job = %entry.definition.id,
                    track = %reservation.track,
                    length = reservation.length,
                    "no replacement track; job proceeds without a reservation"
                );
                continue;
            };
            tracks.reserve(&replacement, reservation.length)?;
            entry
                .definition
                .replace_track(&reservation.track, &replacement);
            events.push(emit(
                counters,
                cycle,
                Event::TrackReplaced {
                    job_id: entry.definition.id.clone(),
                    old_track: reservation.track.clone(),
                    new_track: replacement.clone(),
                },
            ));
            reservation.track = replacement;
            kept.push(reservation);
        }
        entry.reservations = kept;
        entry.held = true;
    }
    Ok(())
}

fn release_held(tracks: &mut TrackAllocator, chain: &mut JobChain, only: Option<usize>) {
    for (i, entry) in chain.entries.iter_mut().enumerate() {
        if !entry.held || only.is_some_and(|index| index != i) {
            continue;
        }
        for reservation in &entry.reservations {
            tracks.release(&reservation.track, reservation.length);
        }
        entry.held = false;
    }
}

fn locate(ctx: &EngineContext, job: &JobId) -> Result<(ChainId, usize), EngineError> {
    let chain_id = ctx
        .chains
        .chain_of_job(job)
        .cloned()
        .ok_or_else(|| EngineError::UnknownJob(job.clone()))?;
    let chain = ctx
        .chains
        .get(&chain_id)
        .ok_or_else(|| EngineError::UnknownChain(chain_id.clone()))?;
    let position = chain
        .position_of(job)
        .ok_or_else(|| EngineError::UnknownJob(job.clone()))?;
    if position != chain.current {
        return Err(EngineError::NotActiveJob { job: job.clone() });
    }
    Ok((chain_id, position))
}

fn machine_track(content: &YardContent, job: &JobDefinition) -> Option<TrackId> {
    let machine = match &job.payload {
        JobPayload::ShuntingLoad { machine, .. } | JobPayload::ShuntingUnload { machine, .. } => {
            machine
        }
        JobPayload::Transport { .. } | JobPayload::EmptyHaul { .. } => return None,
    };
    content
        .station(&job.station)?
        .warehouse_machines
        .iter()
        .find(|m| &m.id == machine)
        .map(|m| m.track.clone())
}

/// Accepts the current job of a chain on the player's behalf.
pub fn take_job<H: Host, R: Rng + ?Sized>(
    ctx: &mut EngineContext,
    content: &YardContent,
    host: &mut H,
    job: &JobId,
    rng: &mut R,
    events: &mut Vec<EventEnvelope>,
) -> Result<TakeOutcome, EngineError> {
    let (chain_id, _) = locate(ctx, job)?;
    let Some(chain) = ctx.chains.get(&chain_id) else {
        return Err(EngineError::UnknownChain(chain_id));
    };
    let Some(definition) = chain.current_job().filter(|d| d.state == JobState::Available) else {
        return Err(EngineError::NotActiveJob { job: job.clone() });
    };

    let warehouse = machine_track(content, definition);
    if let Some(track) = &warehouse {
        let on_machine = definition
            .cars
            .iter()
            .filter_map(|id| host.car(id))
            .any(|car| car.track.as_ref() == Some(track));
        if on_machine {
            debug!(%job, %track, "job cars stand on the warehouse track");
            return Ok(TakeOutcome::Blocked);
        }
    }

    let station_position = content
        .station(&definition.station)
        .ok_or_else(|| EngineError::UnknownStation(definition.station.clone()))?
        .position;
    let limit = content.constants.job_destroy_sqr_distance;
    let in_range = definition
        .cars
        .iter()
        .filter_map(|id| host.car(id))
        .any(|car| car.position.sqr_distance(station_position) <= limit);
    if !in_range {
        info!(%job, "job cars are out of range of the posting station; expiring job");
        ctx.emit(events, Event::JobExpired { job_id: job.clone() });
        discard_chain(ctx, host, &chain_id, JobState::Expired, events)?;
        return Ok(TakeOutcome::Expired);
    }

    let kind = definition.kind();
    let cycle = ctx.cycle;
    let EngineContext {
        tracks,
        chains,
        counters,
        ..
    } = &mut *ctx;
    let chain = chains
        .get_mut(&chain_id)
        .ok_or_else(|| EngineError::UnknownChain(chain_id.clone()))?;
    if kind == JobKind::ShuntingLoad {
        if let (Some(track), Some(entry)) = (warehouse, chain.current_entry_mut()) {
            if let JobPayload::ShuntingLoad {
                destination_track, ..
            } = &mut entry.definition.payload
            {
                *destination_track = track;
            }
        }
    } else {
        reserve_or_replace(tracks, &*host, chain, counters, cycle, rng, events)?;
    }
    if let Some(entry) = chain.current_entry_mut() {
        entry.definition.state = JobState::InProgress;
    }
    ctx.emit(events, Event::JobTaken { job_id: job.clone() });
    Ok(TakeOutcome::Taken)
}

/// Marks the current job done. Completing the last job runs the chain's
/// follow-on policy and retires the chain; otherwise the next job opens.
pub fn complete_job<H: Host, R: Rng + ?Sized>(
    ctx: &mut EngineContext,
    content: &YardContent,
    host: &mut H,
    job: &JobId,
    rng: &mut R,
    events: &mut Vec<EventEnvelope>,
) -> Result<(), EngineError> {
    let (chain_id, position) = locate(ctx, job)?;
    let EngineContext { tracks, chains, .. } = &mut *ctx;
    let chain = chains
        .get_mut(&chain_id)
        .ok_or_else(|| EngineError::UnknownChain(chain_id.clone()))?;
    release_held(tracks, chain, Some(position));
    let kind = {
        let entry = &mut chain.entries[position];
        entry.definition.state = JobState::Completed;
        entry.definition.kind()
    };
    let last = chain.is_last(job);
    ctx.emit(
        events,
        Event::JobCompleted {
            job_id: job.clone(),
            kind,
        },
    );

    if !last {
        if let Some(chain) = ctx.chains.get_mut(&chain_id) {
            chain.current = position + 1;
            if let Some(entry) = chain.current_entry_mut() {
                entry.definition.state = JobState::Available;
            }
        }
        return Ok(());
    }

    let Some(mut chain) = ctx.chains.remove(&chain_id) else {
        return Err(EngineError::UnknownChain(chain_id));
    };
    if ctx.is_broken() {
        debug!(chain = %chain.id, "job generation disabled; skipping follow-on work");
    } else if let Err(err) = run_follow_on(ctx, content, host, &mut chain, rng, events) {
        ctx.on_critical_failure(&err, events);
    }
    chain.state = ChainState::Complete;
    if !chain.cars.is_empty() {
        host.register_jobless_cars(&chain.cars);
    }
    ctx.emit(
        events,
        Event::ChainCompleted {
            chain_id: chain.id.clone(),
        },
    );
    info!(chain = %chain.id, "job chain completed");
    Ok(())
}

fn discard_chain<H: Host>(
    ctx: &mut EngineContext,
    host: &mut H,
    chain_id: &ChainId,
    job_state: JobState,
    events: &mut Vec<EventEnvelope>,
) -> Result<(), EngineError> {
    let mut chain = ctx
        .chains
        .remove(chain_id)
        .ok_or_else(|| EngineError::UnknownChain(chain_id.clone()))?;
    release_held(&mut ctx.tracks, &mut chain, None);
    chain.state = ChainState::Abandoned;
    if let Some(entry) = chain.current_entry_mut() {
        entry.definition.state = job_state;
    }
    host.register_jobless_cars(&chain.cars);
    ctx.emit(
        events,
        Event::ChainAbandoned {
            chain_id: chain.id.clone(),
        },
    );
    Ok(())
}

/// Gives up the current job. Reservations are returned and the cars go back
/// to the jobless pool; no follow-on work is generated.
pub fn abandon_job<H: Host>(
    ctx: &mut EngineContext,
    host: &mut H,
    job: &JobId,
    events: &mut Vec<EventEnvelope>,
) -> Result<(), EngineError> {
    let (chain_id, _) = locate(ctx, job)?;
    info!(%job, chain = %chain_id, "abandoning job chain");
    discard_chain(ctx, host, &chain_id, JobState::Abandoned, events)
}
